use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use safecircle_core::CoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("Invalid request: {0}")]
    BadRequest(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::Core(CoreError::Validation(_)) | ApiError::BadRequest(_) => {
                StatusCode::BAD_REQUEST
            }
            ApiError::Core(CoreError::NotFound(_)) => StatusCode::NOT_FOUND,
            ApiError::Core(CoreError::InvalidState(_)) => StatusCode::CONFLICT,
            ApiError::Core(CoreError::Backend(_)) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = serde_json::json!({
            "error": self.to_string(),
        });

        (status, axum::Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
