use crate::domain::error::PipelineError;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};

/// HTTP face of [`PipelineError`].
#[derive(Debug)]
pub struct ApiError(pub PipelineError);

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        Self(err)
    }
}

impl ApiError {
    /// Status, stable error code and the message the client may see.
    /// Internal failures are logged here and masked.
    pub fn parts(&self) -> (StatusCode, &'static str, String) {
        match &self.0 {
            PipelineError::Validation(msg) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "validation_error",
                msg.clone(),
            ),
            PipelineError::DuplicateIdentity(msg) => {
                (StatusCode::CONFLICT, "duplicate_identity", msg.clone())
            }
            PipelineError::GatewayUnavailable(msg) => {
                tracing::error!("payment gateway unavailable: {msg}");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "gateway_unavailable",
                    "payment gateway unavailable".to_string(),
                )
            }
            PipelineError::Provider(msg) => {
                tracing::error!("payment provider rejected request: {msg}");
                (
                    StatusCode::BAD_GATEWAY,
                    "provider_error",
                    "payment provider rejected the request".to_string(),
                )
            }
            PipelineError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg.clone()),
            PipelineError::Unauthorized(msg) => {
                (StatusCode::UNAUTHORIZED, "unauthorized", msg.clone())
            }
            PipelineError::Forbidden(msg) => (StatusCode::FORBIDDEN, "forbidden", msg.clone()),
            PipelineError::InvalidState(msg) => {
                (StatusCode::CONFLICT, "invalid_state", msg.clone())
            }
            PipelineError::WebhookSignature(_) => (
                StatusCode::BAD_REQUEST,
                "webhook_error",
                "invalid webhook signature".to_string(),
            ),
            err @ (PipelineError::SideEffect { .. } | PipelineError::Upstream { .. }) => {
                tracing::error!("upstream error: {err}");
                (
                    StatusCode::BAD_GATEWAY,
                    "upstream_error",
                    "a dependent service failed".to_string(),
                )
            }
            PipelineError::Database(err) => {
                tracing::error!("database error: {err}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "internal error".to_string(),
                )
            }
            PipelineError::Serialization(err) => {
                tracing::error!("serialization error: {err}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "internal error".to_string(),
                )
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = self.parts();
        let body = serde_json::json!({
            "error_code": error_code,
            "message": message,
        });
        (status, Json(body)).into_response()
    }
}
