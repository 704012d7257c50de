use axum::{
    extract::{Extension, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::Utc;
use std::sync::Arc;

use crate::{
    error::AppResult,
    extractors::ValidatedJson,
    middlewares::auth::JwtClaims,
    models::achievement::CreateAchievementRequest,
    services::{achievement_service::AchievementService, AppState},
};

pub async fn grant_achievement(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    ValidatedJson(req): ValidatedJson<CreateAchievementRequest>,
) -> AppResult<impl IntoResponse> {
    let service = AchievementService::new(state.store.clone());
    let achievement = service
        .grant(&claims.sub, &req.achievement_name, Utc::now())
        .await?;
    Ok((StatusCode::CREATED, Json(achievement)))
}

pub async fn recent_achievements(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
) -> AppResult<impl IntoResponse> {
    let service = AchievementService::new(state.store.clone());
    Ok(Json(service.recent(&claims.sub).await?))
}
