use axum::{
    extract::{Extension, Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::Utc;
use std::sync::Arc;

use crate::{
    error::AppResult,
    extractors::{AppJson, ValidatedJson},
    middlewares::auth::JwtClaims,
    models::incident::{AnalyzeIncidentRequest, IncidentQuizSubmission, UpdateIncidentRequest},
    services::{incident_service::IncidentService, AppState},
};

fn incident_service(state: &AppState) -> IncidentService {
    IncidentService::new(
        state.store.clone(),
        state.generator.clone(),
        state.transaction_retry(),
        state.config.generator.analysis_timeout(),
    )
}

pub async fn analyze_incident(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    ValidatedJson(req): ValidatedJson<AnalyzeIncidentRequest>,
) -> AppResult<impl IntoResponse> {
    tracing::info!("Analyzing incident video for user {}", claims.sub);

    let incident = incident_service(&state)
        .analyze_video(&claims.sub, &req.video_url, Utc::now())
        .await?;

    Ok((StatusCode::CREATED, Json(incident)))
}

pub async fn list_incidents(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
) -> AppResult<impl IntoResponse> {
    let incidents = incident_service(&state).list_incidents(&claims.sub).await?;
    Ok(Json(incidents))
}

pub async fn get_incident(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(incident_id): Path<String>,
) -> AppResult<impl IntoResponse> {
    let incident = incident_service(&state)
        .get_incident(&claims.sub, &incident_id)
        .await?;
    Ok(Json(incident))
}

pub async fn update_incident(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(incident_id): Path<String>,
    ValidatedJson(req): ValidatedJson<UpdateIncidentRequest>,
) -> AppResult<impl IntoResponse> {
    let incident = incident_service(&state)
        .update_incident(&claims.sub, &incident_id, &req)
        .await?;
    Ok(Json(incident))
}

pub async fn delete_incident(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(incident_id): Path<String>,
) -> AppResult<impl IntoResponse> {
    incident_service(&state)
        .delete_incident(&claims.sub, &incident_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn submit_incident_quiz(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(incident_id): Path<String>,
    AppJson(req): AppJson<IncidentQuizSubmission>,
) -> AppResult<impl IntoResponse> {
    let result = incident_service(&state)
        .submit_incident_quiz(&claims.sub, &incident_id, req.selected_answer_index)
        .await?;
    Ok(Json(result))
}
