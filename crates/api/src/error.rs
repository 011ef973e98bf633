use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use promptreel_core::error::CoreError;
use promptreel_pipeline::ComposeError;
use serde::Serialize;

const INTERNAL_MESSAGE: &str = "An internal error occurred";

/// Error type of every HTTP handler.
///
/// Rendered as `{"success": false, "error", "code", "details"?}` with the
/// matching status code. Internal failures are logged and replaced by a
/// generic message.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Core(#[from] CoreError),

    /// The generation service rejected or failed a call made for this
    /// request. `details` carries the service's own message.
    #[error("{message}: {details}")]
    Upstream { message: String, details: String },

    /// Malformed request body.
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

pub type AppResult<T> = Result<T, AppError>;

impl From<ComposeError> for AppError {
    fn from(err: ComposeError) -> Self {
        match err {
            ComposeError::Core(core) => AppError::Core(core),
            ComposeError::Submit(source) => AppError::Upstream {
                message: "Failed to submit compose job".to_string(),
                details: source.to_string(),
            },
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    success: bool,
    error: String,
    code: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

impl AppError {
    /// Status, machine-readable code, client-facing message and optional
    /// details.
    fn parts(&self) -> (StatusCode, &'static str, String, Option<String>) {
        match self {
            AppError::Core(CoreError::NotFound { entity, id }) => (
                StatusCode::NOT_FOUND,
                "NOT_FOUND",
                format!("{entity} with id {id} not found"),
                None,
            ),
            AppError::Core(CoreError::Validation(msg)) => {
                (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone(), None)
            }
            AppError::Core(CoreError::Conflict(msg)) => {
                (StatusCode::CONFLICT, "CONFLICT", msg.clone(), None)
            }
            AppError::Core(CoreError::Configuration(msg)) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "CONFIGURATION_ERROR",
                msg.clone(),
                None,
            ),
            AppError::Core(CoreError::InvalidTransition { .. } | CoreError::Internal(_))
            | AppError::InternalError(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                INTERNAL_MESSAGE.to_string(),
                None,
            ),
            AppError::Upstream { message, details } => (
                StatusCode::BAD_GATEWAY,
                "UPSTREAM_ERROR",
                message.clone(),
                Some(details.clone()),
            ),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone(), None),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, error, details) = self.parts();

        match code {
            "CONFIGURATION_ERROR" => {
                tracing::warn!(error = %self, "Request rejected: server not configured");
            }
            "INTERNAL_ERROR" => tracing::error!(error = %self, "Internal error"),
            "UPSTREAM_ERROR" => tracing::warn!(error = %self, "Upstream call failed"),
            _ => tracing::debug!(error = %self, code, "Request failed"),
        }

        let body = ErrorBody {
            success: false,
            error,
            code,
            details,
        };
        (status, Json(body)).into_response()
    }
}
