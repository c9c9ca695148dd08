//! LLM client implementations and the shared retry policy.

pub mod retry;

#[cfg(feature = "openai")]
pub mod openai;

pub use retry::{call_with_retry, RetryPolicy};

#[cfg(feature = "openai")]
pub use openai::OpenAiClient;
