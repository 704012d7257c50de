use axum::{
    extract::{Extension, State},
    response::IntoResponse,
    Json,
};
use chrono::Utc;
use std::sync::Arc;

use crate::{
    error::AppResult,
    middlewares::auth::JwtClaims,
    services::{daily_quiz_service::DailyQuizService, AppState},
};

/// Forces a new daily quiz for today, replacing the current one.
pub async fn regenerate_daily_quiz(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
) -> AppResult<impl IntoResponse> {
    tracing::info!("Daily quiz regeneration requested by admin {}", claims.sub);

    let service =
        DailyQuizService::new(state.store.clone(), state.generator.clone(), &state.config);
    let daily = service.regenerate_daily_quiz(Utc::now()).await?;

    Ok(Json(daily))
}
