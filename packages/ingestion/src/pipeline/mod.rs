//! The extraction pipeline: page-sequential orchestration, its component
//! services, and the finalization pass.
//!
//! Per page: load OCR text, minisummary, context pack, boundary detection
//! plus guideline extraction, shard create/merge, summaries, index updates,
//! stability sweep, progress. At book end a separate finalization job marks
//! subtopics final, refines names, merges duplicates, and syncs to the
//! relational store.

pub mod boundary;
pub mod context;
pub mod dedup;
pub mod finalize;
pub mod indices;
pub mod merge;
pub mod minisummary;
pub mod orchestrator;
pub mod prompts;
pub mod refine;
pub mod summary;

pub use boundary::{BoundaryDecision, BoundaryDetector};
pub use context::ContextPackBuilder;
pub use dedup::{DuplicateDetector, DuplicatePair};
pub use finalize::{FinalizationPass, FinalizationReport};
pub use indices::IndexManager;
pub use merge::GuidelineMerger;
pub use minisummary::MinisummaryService;
pub use orchestrator::{plan_run, ExtractionOrchestrator, ExtractionReport, RunPlan};
pub use refine::{NameRefiner, RefinedNames};
pub use summary::SummaryService;

/// Truncate to at most `max_chars` characters on a char boundary.
pub(crate) fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// First `max_words` whitespace-delimited tokens.
pub(crate) fn first_words(text: &str, max_words: usize) -> String {
    text.split_whitespace()
        .take(max_words)
        .collect::<Vec<_>>()
        .join(" ")
}
