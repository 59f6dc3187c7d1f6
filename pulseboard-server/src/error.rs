//! Mapping from core errors to HTTP responses

use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use pulseboard_core::Error;
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Core(#[from] Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn validation(message: impl Into<String>) -> Self {
        ApiError::Core(Error::validation(message))
    }
}

impl From<actix_web::error::BlockingError> for ApiError {
    fn from(e: actix_web::error::BlockingError) -> Self {
        ApiError::Internal(e.to_string())
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Core(Error::Validation(_)) => StatusCode::BAD_REQUEST,
            ApiError::Core(Error::SessionNotFound(_) | Error::TaskNotFound(_)) => {
                StatusCode::NOT_FOUND
            }
            ApiError::Core(Error::StoreUnavailable(_)) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        }

        let body = match self {
            ApiError::Core(Error::Validation(message)) => json!({ "error": message }),
            ApiError::Core(Error::StoreUnavailable(_)) => json!({
                "status": "unavailable",
                "error": "store unavailable",
            }),
            _ => json!({ "error": self.to_string() }),
        };
        HttpResponse::build(status).json(body)
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;
