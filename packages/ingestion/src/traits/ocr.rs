//! OCR engine contract.
//!
//! The engine owns both image normalization (raw upload to canonical PNG)
//! and text recognition. Model choice and tuning live behind this seam.

use async_trait::async_trait;
use thiserror::Error;

/// Errors from the OCR engine.
#[derive(Debug, Error)]
pub enum OcrError {
    /// The input bytes are not a decodable image.
    #[error("invalid image: {0}")]
    InvalidImage(String),

    /// Transient failure (throttling, timeouts); safe to retry.
    #[error("transient OCR failure: {0}")]
    Transient(String),

    /// Everything else the engine can report.
    #[error("OCR engine error: {0}")]
    Engine(String),
}

impl OcrError {
    pub fn is_transient(&self) -> bool {
        matches!(self, OcrError::Transient(_))
    }
}

#[async_trait]
pub trait OcrEngine: Send + Sync {
    /// Convert a raw upload into the canonical normalized PNG form.
    async fn normalize(&self, raw: &[u8], extension: &str) -> Result<Vec<u8>, OcrError>;

    /// Extract text from a canonical image.
    async fn recognize(&self, image: &[u8]) -> Result<String, OcrError>;
}
