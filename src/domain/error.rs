use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("validation: {0}")]
    Validation(String),

    #[error("duplicate identity: {0}")]
    DuplicateIdentity(String),

    /// Provider unconfigured, unreachable, timed out or answered 5xx.
    #[error("payment gateway unavailable: {0}")]
    GatewayUnavailable(String),

    /// Provider answered but rejected the request.
    #[error("provider: {0}")]
    Provider(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("side effect {step} failed: {message}")]
    SideEffect { step: String, message: String },

    /// A collaborating service (content store, membership, sync, mail) failed.
    #[error("upstream {service}: {message}")]
    Upstream { service: String, message: String },

    #[error("database: {0}")]
    Database(#[from] sqlx::Error),

    #[error("serialization: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("webhook signature: {0}")]
    WebhookSignature(String),
}

impl PipelineError {
    pub fn upstream(service: &str, message: impl Into<String>) -> Self {
        Self::Upstream {
            service: service.to_string(),
            message: message.into(),
        }
    }

    /// Worth retrying later: the same call may succeed without any change on our side.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::GatewayUnavailable(_) | Self::Upstream { .. } | Self::Database(_)
        )
    }
}
