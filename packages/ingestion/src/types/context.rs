//! The context pack assembled for boundary detection.
//!
//! Keeps the prompt compact: book reference data, the last few page
//! summaries, and every open subtopic with a short guideline preview,
//! instead of replaying the whole book.

use serde::{Deserialize, Serialize};

/// Minisummary of a recently processed page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecentPageSummary {
    pub page: u32,
    pub summary: String,
}

/// An open or stable subtopic the current page may continue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenSubtopicInfo {
    pub subtopic_key: String,
    pub subtopic_title: String,
    pub page_start: u32,
    pub page_end: u32,
    /// Leading slice of the shard's guidelines.
    pub guidelines_preview: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenTopicInfo {
    pub topic_key: String,
    pub topic_title: String,
    pub subtopics: Vec<OpenSubtopicInfo>,
}

/// Table-of-contents hints. Currently just the trailing topic.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TocHints {
    pub current_chapter: Option<String>,
}

/// Everything the boundary detector sees besides the page text itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextPack {
    pub book_id: String,
    pub current_page: u32,
    pub grade: i32,
    pub subject: String,
    pub board: String,
    pub total_pages: u32,
    pub open_topics: Vec<OpenTopicInfo>,
    pub recent_pages: Vec<RecentPageSummary>,
    pub toc: TocHints,
}

impl ContextPack {
    /// True when nothing has been extracted yet (the first-page case).
    pub fn is_empty(&self) -> bool {
        self.open_topics.is_empty() && self.recent_pages.is_empty()
    }
}
