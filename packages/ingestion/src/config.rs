//! Pipeline configuration and upload preflight limits.

/// Raw image formats the bulk upload path accepts.
pub const SUPPORTED_FORMATS: &[&str] = &["png", "jpg", "jpeg", "webp"];

/// Per-file size cap for raw uploads.
pub const MAX_FILE_SIZE: usize = 20 * 1024 * 1024;

/// Maximum number of files in one bulk upload request.
pub const MAX_BULK_FILES: usize = 200;

/// Tunables for the extraction pipeline and its component services.
///
/// Defaults mirror the production values; tests occasionally shrink the
/// thresholds to exercise boundaries.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Pages without an update after which an open subtopic turns stable.
    pub stability_threshold: u32,
    /// How many trailing page summaries go into the context pack.
    pub recent_pages: usize,
    /// Character cap on shard guideline previews in the context pack.
    pub guidelines_preview_chars: usize,
    /// Character cap on page text fed to the minisummary call.
    pub minisummary_input_chars: usize,
    /// Words of leading page text used when the minisummary call fails.
    pub minisummary_fallback_words: usize,
    /// Character cap on guidelines fed to summary calls.
    pub summary_guidelines_chars: usize,
    /// Character cap on guidelines fed to name refinement.
    pub refine_guidelines_chars: usize,
    /// Character cap on shard previews in the deduplication prompt.
    pub dedup_preview_chars: usize,
    /// Fixed confidence recorded for page index assignments.
    pub page_confidence: f32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            stability_threshold: 5,
            recent_pages: 5,
            guidelines_preview_chars: 300,
            minisummary_input_chars: 3000,
            minisummary_fallback_words: 60,
            summary_guidelines_chars: 3000,
            refine_guidelines_chars: 2000,
            dedup_preview_chars: 200,
            page_confidence: 0.9,
        }
    }
}
