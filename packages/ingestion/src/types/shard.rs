//! Subtopic shards, the unit of guideline aggregation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One consolidated guideline document per `(topic, subtopic)` pair.
///
/// Shards carry no status of their own; the guidelines index is the single
/// source of status truth. `version` increments on every mutation, and the
/// page range only ever extends.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubtopicShard {
    pub topic_key: String,
    pub topic_title: String,
    pub subtopic_key: String,
    pub subtopic_title: String,
    pub source_page_start: u32,
    pub source_page_end: u32,
    pub guidelines: String,
    #[serde(default)]
    pub subtopic_summary: String,
    pub version: u64,
    pub updated_at: DateTime<Utc>,
}

impl SubtopicShard {
    /// Fresh shard opened by a single page.
    pub fn new(
        topic_key: impl Into<String>,
        topic_title: impl Into<String>,
        subtopic_key: impl Into<String>,
        subtopic_title: impl Into<String>,
        page: u32,
        guidelines: impl Into<String>,
    ) -> Self {
        Self {
            topic_key: topic_key.into(),
            topic_title: topic_title.into(),
            subtopic_key: subtopic_key.into(),
            subtopic_title: subtopic_title.into(),
            source_page_start: page,
            source_page_end: page,
            guidelines: guidelines.into(),
            subtopic_summary: String::new(),
            version: 1,
            updated_at: Utc::now(),
        }
    }

    /// Replace the guidelines with a merged text and extend the range to
    /// cover `page`.
    pub fn merge_page(&mut self, merged_guidelines: String, page: u32) {
        self.guidelines = merged_guidelines;
        self.source_page_end = self.source_page_end.max(page);
        self.version += 1;
        self.updated_at = Utc::now();
    }

    /// Fold a duplicate shard into this one: merged guidelines, unioned
    /// page range, bumped version.
    pub fn absorb(&mut self, other: &SubtopicShard, merged_guidelines: String) {
        self.guidelines = merged_guidelines;
        self.source_page_start = self.source_page_start.min(other.source_page_start);
        self.source_page_end = self.source_page_end.max(other.source_page_end);
        self.version += 1;
        self.updated_at = Utc::now();
    }

    /// Page range in the "start-end" form the index stores.
    pub fn page_range(&self) -> String {
        format!("{}-{}", self.source_page_start, self.source_page_end)
    }

    /// Mark a metadata-only mutation (rename, summary refresh).
    pub fn touch(&mut self) {
        self.version += 1;
        self.updated_at = Utc::now();
    }
}
