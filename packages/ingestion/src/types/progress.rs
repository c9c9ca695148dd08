//! Progress-detail payloads serialized into the job table.
//!
//! `progress_detail` is an opaque JSON string from the job table's point of
//! view; these types define what the workers actually write there.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::ErrorKind;

/// One recorded per-page failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageError {
    pub error: String,
    pub error_type: ErrorKind,
}

/// Per-page errors plus running stats, keyed by decimal page number.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(bound(deserialize = "S: serde::Deserialize<'de> + Default"))]
pub struct ProgressDetail<S> {
    #[serde(default)]
    pub page_errors: BTreeMap<String, PageError>,
    #[serde(default)]
    pub stats: S,
}

impl<S: Serialize> ProgressDetail<S> {
    /// Serialize for the job table's `progress_detail` column.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Running stats for a bulk OCR job.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct OcrRunStats {
    #[serde(default)]
    pub pages_processed: u32,
    #[serde(default)]
    pub completed: u32,
    #[serde(default)]
    pub failed: u32,
}

/// Running stats for an extraction job.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ExtractionRunStats {
    #[serde(default)]
    pub pages_processed: u32,
    #[serde(default)]
    pub subtopics_created: u32,
    #[serde(default)]
    pub subtopics_merged: u32,
}

/// Running stats for a finalization job.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct FinalizationRunStats {
    #[serde(default)]
    pub subtopics_finalized: u32,
    #[serde(default)]
    pub subtopics_renamed: u32,
    #[serde(default)]
    pub duplicates_merged: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detail_round_trips_page_errors() {
        let mut detail = ProgressDetail::<OcrRunStats>::default();
        detail.page_errors.insert(
            "3".into(),
            PageError {
                error: "Rate limit exceeded (429)".into(),
                error_type: ErrorKind::Retryable,
            },
        );
        detail.stats.completed = 4;
        detail.stats.failed = 1;

        let json = detail.to_json().unwrap();
        let back: ProgressDetail<OcrRunStats> = serde_json::from_str(&json).unwrap();
        assert_eq!(back.page_errors["3"].error_type, ErrorKind::Retryable);
        assert!(back.page_errors["3"].error.contains("429"));
        assert_eq!(back.stats.completed, 4);
    }
}
