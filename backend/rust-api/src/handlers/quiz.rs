use axum::{
    extract::{Extension, Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::Utc;
use std::sync::Arc;
use validator::Validate;

use crate::{
    error::AppResult,
    extractors::AppJson,
    middlewares::auth::JwtClaims,
    models::quiz::{GenerateQuizRequest, SubmitQuizRequest},
    services::{
        quiz_pool_service::QuizPoolService, quiz_submission_service::QuizSubmissionService,
        AppState,
    },
};

fn pool_service(state: &AppState) -> QuizPoolService {
    QuizPoolService::new(
        state.store.clone(),
        state.generator.clone(),
        state.config.quiz_pool.clone(),
        state.config.generator.quiz_timeout(),
    )
}

pub async fn submit_quiz(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(quiz_id): Path<String>,
    AppJson(req): AppJson<SubmitQuizRequest>,
) -> AppResult<impl IntoResponse> {
    req.validate()?;

    tracing::info!(
        "Submitting quiz {} for user {} ({} answers)",
        quiz_id,
        claims.sub,
        req.answers.len()
    );

    let service = QuizSubmissionService::new(state.store.clone(), state.transaction_retry());
    let result = service
        .submit(&claims.sub, &quiz_id, &req.answers, Utc::now())
        .await?;

    Ok((StatusCode::CREATED, Json(result)))
}

pub async fn get_active_quizzes(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
) -> AppResult<impl IntoResponse> {
    let quizzes = pool_service(&state)
        .get_active_quizzes(&claims.sub, Utc::now())
        .await?;
    Ok(Json(quizzes))
}

pub async fn get_quiz_history(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
) -> AppResult<impl IntoResponse> {
    let history = pool_service(&state).get_quiz_history(&claims.sub).await?;
    Ok(Json(history))
}

pub async fn generate_quiz(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    AppJson(req): AppJson<GenerateQuizRequest>,
) -> AppResult<impl IntoResponse> {
    req.validate()?;

    tracing::info!("Generating quiz on {:?} for user {}", req.topic, claims.sub);

    let quiz = pool_service(&state)
        .generate_quiz_for_user(&claims.sub, &req.topic, req.experience, Utc::now())
        .await?;

    Ok((StatusCode::CREATED, Json(quiz)))
}
