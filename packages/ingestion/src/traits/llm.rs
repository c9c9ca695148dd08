//! Generic LLM client contract.
//!
//! The pipeline assumes nothing provider-specific beyond JSON-mode output
//! and a retry policy for transient failures. Implementations wrap concrete
//! providers; tests use the scripted mock in [`crate::testing`].

use async_trait::async_trait;
use thiserror::Error;

/// Errors from an LLM call.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("rate limit exceeded: {0}")]
    RateLimited(String),

    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("provider error: {0}")]
    Provider(String),

    #[error("empty response from model")]
    EmptyResponse,
}

impl LlmError {
    /// Transient errors are worth retrying with backoff.
    pub fn is_transient(&self) -> bool {
        matches!(self, LlmError::RateLimited(_) | LlmError::Timeout(_))
    }
}

/// Options for a single call.
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    /// System message, when the provider supports one.
    pub system: Option<String>,
    /// Force a JSON object response.
    pub json_mode: bool,
    /// Optional JSON schema for structured output.
    pub json_schema: Option<serde_json::Value>,
    /// Provider reasoning effort hint.
    pub reasoning_effort: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

impl CallOptions {
    /// Plain-text call with defaults.
    pub fn text() -> Self {
        Self::default()
    }

    /// JSON-mode call.
    pub fn json() -> Self {
        Self {
            json_mode: true,
            ..Self::default()
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

/// Response from a call.
#[derive(Debug, Clone)]
pub struct LlmResponse {
    pub output_text: String,
    pub reasoning: Option<String>,
}

/// The single-method provider contract.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn call(&self, prompt: &str, opts: &CallOptions) -> Result<LlmResponse, LlmError>;
}
