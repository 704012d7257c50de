use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::services::content_generator::GenerationError;
use crate::store::{ConflictAware, StoreError};

#[derive(Debug, Error)]
pub enum AppError {
    #[error("quiz {0} was already submitted")]
    AlreadySubmitted(String),

    #[error("quiz {0} not found")]
    QuizNotFound(String),

    #[error("user profile {0} not found")]
    UserNotFound(String),

    #[error("incident {0} not found")]
    IncidentNotFound(String),

    #[error("access denied: {0}")]
    Forbidden(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("user profile {0} already exists")]
    ProfileExists(String),

    #[error("content generation failed: {0}")]
    GenerationFailure(#[from] GenerationError),

    #[error("quiz {0} has no questions")]
    InvalidQuiz(String),

    #[error("concurrent update, please retry: {0}")]
    StoreConflict(String),

    #[error("store error: {0}")]
    Store(StoreError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            AppError::AlreadySubmitted(_) => (StatusCode::CONFLICT, "ALREADY_SUBMITTED"),
            AppError::QuizNotFound(_) => (StatusCode::NOT_FOUND, "QUIZ_NOT_FOUND"),
            AppError::UserNotFound(_) => (StatusCode::NOT_FOUND, "USER_NOT_FOUND"),
            AppError::IncidentNotFound(_) => (StatusCode::NOT_FOUND, "INCIDENT_NOT_FOUND"),
            AppError::Forbidden(_) => (StatusCode::FORBIDDEN, "FORBIDDEN"),
            AppError::Validation(_) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
            AppError::ProfileExists(_) => (StatusCode::CONFLICT, "PROFILE_EXISTS"),
            AppError::GenerationFailure(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "GENERATION_FAILED")
            }
            AppError::InvalidQuiz(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INVALID_QUIZ"),
            AppError::StoreConflict(_) => (StatusCode::SERVICE_UNAVAILABLE, "STORE_CONFLICT"),
            AppError::Store(_) => (StatusCode::INTERNAL_SERVER_ERROR, "STORE_ERROR"),
            AppError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        }
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict(message) => AppError::StoreConflict(message),
            other => AppError::Store(other),
        }
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(errors: validator::ValidationErrors) -> Self {
        AppError::Validation(errors.to_string())
    }
}

impl ConflictAware for AppError {
    fn is_conflict(&self) -> bool {
        matches!(self, AppError::StoreConflict(_))
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();

        // Store and internal failures are logged in full but not echoed back.
        let message = match &self {
            AppError::Store(_) | AppError::Internal(_) => {
                tracing::error!("Request failed: {}", self);
                "An internal server error occurred".to_string()
            }
            AppError::GenerationFailure(_) | AppError::InvalidQuiz(_) => {
                tracing::error!("Request failed: {}", self);
                self.to_string()
            }
            _ => self.to_string(),
        };

        let body = Json(json!({
            "error": {
                "code": code,
                "message": message,
            },
            "detail": message,
        }));

        (status, body).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    async fn render(err: AppError) -> (StatusCode, serde_json::Value) {
        let response = err.into_response();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_status_mapping() {
        let (status, body) = render(AppError::AlreadySubmitted("q1".into())).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"]["code"], "ALREADY_SUBMITTED");
        assert_eq!(body["detail"], "quiz q1 was already submitted");

        let (status, _) = render(AppError::Forbidden("not yours".into())).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, _) = render(AppError::from(StoreError::Conflict("x".into()))).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_store_errors_are_not_leaked() {
        let (status, body) =
            render(AppError::from(StoreError::Backend("connection refused".into()))).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["detail"], "An internal server error occurred");
    }

    #[test]
    fn test_conflict_awareness() {
        assert!(AppError::from(StoreError::Conflict("x".into())).is_conflict());
        assert!(!AppError::AlreadySubmitted("q".into()).is_conflict());
    }
}
