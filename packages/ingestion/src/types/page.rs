//! Per-page metadata and the page guideline document.

use serde::{Deserialize, Serialize};

/// OCR outcome for one page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OcrStatus {
    #[default]
    Pending,
    Completed,
    Failed,
}

/// Metadata entry for one page inside the book's metadata document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageMeta {
    /// Object key of the raw upload.
    pub raw_image_key: String,
    /// Object key of the canonical normalized image, once converted.
    #[serde(default)]
    pub image_key: Option<String>,
    /// Object key of the extracted OCR text, once recognized.
    #[serde(default)]
    pub text_key: Option<String>,
    /// Upload lifecycle status, opaque to the pipeline.
    #[serde(default = "default_page_status")]
    pub status: String,
    #[serde(default)]
    pub ocr_status: OcrStatus,
    #[serde(default)]
    pub ocr_error: Option<String>,
}

fn default_page_status() -> String {
    "uploaded".to_string()
}

impl PageMeta {
    /// Entry for a freshly uploaded raw image.
    pub fn new(raw_image_key: impl Into<String>) -> Self {
        Self {
            raw_image_key: raw_image_key.into(),
            image_key: None,
            text_key: None,
            status: default_page_status(),
            ocr_status: OcrStatus::Pending,
            ocr_error: None,
        }
    }
}

/// Per-page minisummary, stored as `pages/{page:03}.page_guideline.json`.
///
/// Only used as context for subsequent pages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageGuideline {
    pub page: u32,
    pub summary: String,
}
