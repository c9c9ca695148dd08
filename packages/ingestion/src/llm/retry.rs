//! Exponential-backoff retry for transient LLM failures.
//!
//! Only rate-limit and timeout errors are retried; anything else fails
//! immediately so the caller's own fallback can take over.

use std::time::Duration;

use crate::traits::llm::{CallOptions, LlmClient, LlmError, LlmResponse};

/// Bounded retry with doubling delay.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// No sleeping between attempts; for tests.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay: Duration::ZERO,
        }
    }
}

/// Call the client, retrying transient errors per the policy.
pub async fn call_with_retry(
    client: &dyn LlmClient,
    prompt: &str,
    opts: &CallOptions,
    policy: &RetryPolicy,
) -> Result<LlmResponse, LlmError> {
    let mut delay = policy.initial_delay;
    for attempt in 1..=policy.max_attempts {
        match client.call(prompt, opts).await {
            Ok(response) => {
                if attempt > 1 {
                    tracing::info!(attempt, "LLM call succeeded after retry");
                }
                return Ok(response);
            }
            Err(err) if err.is_transient() && attempt < policy.max_attempts => {
                tracing::warn!(
                    error = %err,
                    attempt,
                    max_attempts = policy.max_attempts,
                    "transient LLM error, backing off"
                );
                tokio::time::sleep(delay).await;
                delay = delay.saturating_mul(2);
            }
            Err(err) => return Err(err),
        }
    }
    Err(LlmError::Provider("retry attempts exhausted".to_string()))
}
