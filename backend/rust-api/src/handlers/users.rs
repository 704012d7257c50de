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
    models::user::{CreateProfileRequest, UpdateExperienceRequest, UpdateResolvedIncidentsRequest},
    services::{user_service::UserService, AppState},
};

pub async fn create_profile(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    ValidatedJson(req): ValidatedJson<CreateProfileRequest>,
) -> AppResult<impl IntoResponse> {
    let service = UserService::new(state.store.clone());
    let info = service.create_profile(&claims.sub, req, Utc::now()).await?;
    Ok((StatusCode::CREATED, Json(info)))
}

pub async fn get_me(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
) -> AppResult<impl IntoResponse> {
    let service = UserService::new(state.store.clone());
    Ok(Json(service.get_user_info(&claims.sub).await?))
}

pub async fn update_resolved_incidents(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    ValidatedJson(req): ValidatedJson<UpdateResolvedIncidentsRequest>,
) -> AppResult<impl IntoResponse> {
    let service = UserService::new(state.store.clone());
    let info = service
        .update_resolved_incidents(&claims.sub, req.resolved_incidents)
        .await?;
    Ok(Json(info))
}

pub async fn update_experience(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    ValidatedJson(req): ValidatedJson<UpdateExperienceRequest>,
) -> AppResult<impl IntoResponse> {
    let service = UserService::new(state.store.clone());
    let info = service
        .update_experience_level(&claims.sub, &req.experience_level)
        .await?;
    Ok(Json(info))
}
