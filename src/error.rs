use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
#[allow(clippy::enum_variant_names)]
pub enum AppError {
    #[error("Embedding backend failed: {0}")]
    ModelError(String),

    #[error("Invalid input: {0}")]
    ValidationError(String),

    #[error("Service temporarily unavailable: {0}")]
    ResourceError(String),

    #[error("Storage failure: {0}")]
    StorageError(String),

    #[error("Tool source failed: {0}")]
    ToolSourceError(String),
}

impl AppError {
    /// True for failures that mean "server busy or down" rather than a bad request.
    pub fn is_transient(&self) -> bool {
        matches!(self, AppError::ResourceError(_))
    }

    fn status(&self) -> StatusCode {
        match self {
            AppError::ModelError(_) | AppError::StorageError(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            AppError::ValidationError(_) => StatusCode::BAD_REQUEST,
            AppError::ResourceError(_) | AppError::ToolSourceError(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    code: u16,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            AppError::ModelError(e) => {
                tracing::error!(error = %e, "Embedding backend error");
                self.to_string()
            }
            AppError::ValidationError(msg) => {
                tracing::warn!(error = %msg, "Validation error");
                msg.clone()
            }
            AppError::ResourceError(msg) => {
                tracing::warn!(error = %msg, "Resource error");
                msg.clone()
            }
            AppError::StorageError(msg) => {
                tracing::error!(error = %msg, "Storage error");
                self.to_string()
            }
            AppError::ToolSourceError(msg) => {
                tracing::error!(error = %msg, "Tool source error");
                self.to_string()
            }
        };

        let body = Json(ErrorResponse {
            error: message,
            code: status.as_u16(),
        });

        (status, body).into_response()
    }
}

#[cfg(feature = "onnx")]
impl From<ort::Error> for AppError {
    fn from(err: ort::Error) -> Self {
        AppError::ModelError(err.to_string())
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        // Anything that fails on the wire is treated as "server busy or down".
        AppError::ResourceError(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            AppError::ValidationError("x".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::ModelError("x".into()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            AppError::ResourceError("x".into()).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn test_only_resource_errors_are_transient() {
        assert!(AppError::ResourceError("down".into()).is_transient());
        assert!(!AppError::ModelError("boom".into()).is_transient());
        assert!(!AppError::ValidationError("empty".into()).is_transient());
    }
}
