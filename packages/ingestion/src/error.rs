//! Typed errors for the ingestion library.
//!
//! Uses `thiserror` for library errors (not `anyhow`) so callers can match
//! on the failure they care about. Each subsystem keeps its own error enum;
//! `IngestionError` composes them at the pipeline boundary.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::jobs::LockError;
use crate::sync::SyncError;
use crate::traits::llm::LlmError;
use crate::traits::ocr::OcrError;
use crate::traits::store::StoreError;

/// Errors that can surface from workers and the extraction pipeline.
#[derive(Debug, Error)]
pub enum IngestionError {
    /// Job lock could not be acquired or a transition was rejected
    #[error("job lock error: {0}")]
    Lock(#[from] LockError),

    /// Object store operation failed
    #[error("object store error: {0}")]
    Store(#[from] StoreError),

    /// LLM call failed after retries
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    /// OCR engine failure
    #[error("OCR error: {0}")]
    Ocr(#[from] OcrError),

    /// Relational sync failure
    #[error("database sync error: {0}")]
    Sync(#[from] SyncError),

    /// Page has no OCR text to work with
    #[error("page {page} has no OCR text")]
    EmptyPage { page: u32 },

    /// Page is not present in the book's metadata document
    #[error("page {page} missing from book metadata")]
    MissingPageMeta { page: u32 },

    /// LLM returned a payload the pipeline could not use
    #[error("invalid LLM response: {0}")]
    InvalidResponse(String),

    /// JSON (de)serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Bulk upload preflight rejected the request
    #[error("bulk upload rejected: {0}")]
    UploadRejected(String),
}

/// Result type alias for ingestion operations.
pub type Result<T> = std::result::Result<T, IngestionError>;

/// Classification of a per-page failure.
///
/// `Retryable` marks failures worth re-running the page for; everything
/// unrecognized is `Terminal` so the pipeline never burns tokens on
/// hopeless cases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorKind {
    Retryable,
    Terminal,
}

const RETRYABLE_PATTERNS: &[&str] = &["rate limit", "429", "timeout", "connection", "temporary"];

/// Classify an error message as retryable or terminal.
///
/// Case-insensitive substring match over a fixed pattern set.
pub fn classify_error(message: &str) -> ErrorKind {
    let lowered = message.to_lowercase();
    if RETRYABLE_PATTERNS.iter().any(|p| lowered.contains(p)) {
        ErrorKind::Retryable
    } else {
        ErrorKind::Terminal
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limit_is_retryable() {
        assert_eq!(classify_error("Rate limit exceeded (429)"), ErrorKind::Retryable);
        assert_eq!(classify_error("HTTP 429 from provider"), ErrorKind::Retryable);
    }

    #[test]
    fn timeout_and_connection_are_retryable() {
        assert_eq!(classify_error("request timeout after 60s"), ErrorKind::Retryable);
        assert_eq!(classify_error("Connection refused"), ErrorKind::Retryable);
        assert_eq!(classify_error("temporary failure in name resolution"), ErrorKind::Retryable);
    }

    #[test]
    fn unknown_errors_are_terminal() {
        assert_eq!(classify_error("invalid image"), ErrorKind::Terminal);
        assert_eq!(classify_error("cannot decode PNG header"), ErrorKind::Terminal);
        assert_eq!(classify_error(""), ErrorKind::Terminal);
    }

    #[test]
    fn error_kind_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&ErrorKind::Retryable).unwrap(), "\"retryable\"");
        assert_eq!(serde_json::to_string(&ErrorKind::Terminal).unwrap(), "\"terminal\"");
    }
}
