//! The opaque text-completion capability every generation step goes through.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// What to generate: `instruction` becomes the system prompt, `context` the user turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub instruction: String,
    pub context: String,
    pub max_tokens: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Completion {
    pub text: String,
    /// Cost reported by the provider. Billing keys off this value alone.
    pub tokens_used: i64,
}

#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    /// The provider did not answer in time. `tokens_used` is set only when the provider
    /// reported a cost before the deadline.
    #[error("completion timed out")]
    Timeout { tokens_used: Option<i64> },

    #[error("provider error: {0}")]
    Provider(String),
}

#[async_trait]
pub trait CompletionGateway: Send + Sync {
    async fn generate(&self, request: CompletionRequest) -> Result<Completion, GatewayError>;
}

/// Parses a JSON reply, tolerating the markdown fences models like to add.
pub fn parse_json_reply<T: serde::de::DeserializeOwned>(text: &str) -> Option<T> {
    serde_json::from_str(super::strip_json_fences(text)).ok()
}
