use derive_more::Display;
use serde::{Deserialize, Serialize};

use super::error::PipelineError;

/// Provider-assigned payment identifier (`cs_xxx` for checkout sessions).
///
/// Payments that never touch the provider get a synthesized `free_xxx` id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Display, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProviderPaymentId(String);

impl ProviderPaymentId {
    pub fn new(id: impl Into<String>) -> Result<Self, PipelineError> {
        let id = id.into();
        if id.trim().is_empty() || id.chars().any(char::is_whitespace) {
            return Err(PipelineError::Validation(format!(
                "provider payment id must be a non-empty token, got: {id:?}"
            )));
        }
        Ok(Self(id))
    }

    pub fn synthesized() -> Self {
        Self(format!("free_{}", uuid::Uuid::now_v7().simple()))
    }

    pub fn is_synthesized(&self) -> bool {
        self.0.starts_with("free_")
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}
