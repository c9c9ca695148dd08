//! The guidelines index and the page index.
//!
//! The guidelines index is the authoritative registry of topics and
//! subtopics and the single source of subtopic status. The page index maps
//! page numbers to their assigned subtopic and is off the critical path;
//! finalization and reporting read it.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle of a subtopic, tracked only in the index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubtopicStatus {
    Open,
    Stable,
    Final,
    NeedsReview,
}

impl SubtopicStatus {
    /// Open or stable subtopics still accept merges and appear in context packs.
    pub fn is_active(self) -> bool {
        matches!(self, SubtopicStatus::Open | SubtopicStatus::Stable)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubtopicEntry {
    pub subtopic_key: String,
    pub subtopic_title: String,
    /// "start-end" page bounds.
    pub page_range: String,
    pub status: SubtopicStatus,
    #[serde(default)]
    pub subtopic_summary: String,
}

impl SubtopicEntry {
    pub fn page_start(&self) -> Option<u32> {
        self.page_range.split_once('-')?.0.parse().ok()
    }

    pub fn page_end(&self) -> Option<u32> {
        self.page_range.split_once('-')?.1.parse().ok()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicEntry {
    pub topic_key: String,
    pub topic_title: String,
    #[serde(default)]
    pub topic_summary: String,
    pub subtopics: Vec<SubtopicEntry>,
}

/// `books/{book_id}/guidelines/index.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuidelinesIndex {
    pub book_id: String,
    pub version: u64,
    pub last_updated: DateTime<Utc>,
    pub topics: Vec<TopicEntry>,
}

impl GuidelinesIndex {
    pub fn new(book_id: impl Into<String>) -> Self {
        Self {
            book_id: book_id.into(),
            version: 1,
            last_updated: Utc::now(),
            topics: Vec::new(),
        }
    }

    pub fn topic(&self, topic_key: &str) -> Option<&TopicEntry> {
        self.topics.iter().find(|t| t.topic_key == topic_key)
    }

    pub fn topic_mut(&mut self, topic_key: &str) -> Option<&mut TopicEntry> {
        self.topics.iter_mut().find(|t| t.topic_key == topic_key)
    }

    pub fn subtopic(&self, topic_key: &str, subtopic_key: &str) -> Option<&SubtopicEntry> {
        self.topic(topic_key)?
            .subtopics
            .iter()
            .find(|s| s.subtopic_key == subtopic_key)
    }

    /// Count of subtopic entries across all topics.
    pub fn subtopic_count(&self) -> usize {
        self.topics.iter().map(|t| t.subtopics.len()).sum()
    }

    /// All `(topic_key, subtopic_key)` pairs, in index order.
    pub fn subtopic_keys(&self) -> Vec<(String, String)> {
        self.topics
            .iter()
            .flat_map(|t| {
                t.subtopics
                    .iter()
                    .map(move |s| (t.topic_key.clone(), s.subtopic_key.clone()))
            })
            .collect()
    }

    /// Create or update a subtopic entry, creating its topic if needed.
    #[allow(clippy::too_many_arguments)]
    pub fn upsert_subtopic(
        &mut self,
        topic_key: &str,
        topic_title: &str,
        subtopic_key: &str,
        subtopic_title: &str,
        page_range: &str,
        status: SubtopicStatus,
        subtopic_summary: &str,
    ) {
        let position = self.topics.iter().position(|t| t.topic_key == topic_key);
        let topic = match position {
            Some(i) => &mut self.topics[i],
            None => {
                tracing::info!(topic = %topic_key, title = %topic_title, "created new topic");
                self.topics.push(TopicEntry {
                    topic_key: topic_key.to_string(),
                    topic_title: topic_title.to_string(),
                    topic_summary: String::new(),
                    subtopics: Vec::new(),
                });
                let last = self.topics.len() - 1;
                &mut self.topics[last]
            }
        };

        match topic.subtopics.iter().position(|s| s.subtopic_key == subtopic_key) {
            Some(i) => {
                let entry = &mut topic.subtopics[i];
                entry.subtopic_title = subtopic_title.to_string();
                entry.page_range = page_range.to_string();
                entry.status = status;
                entry.subtopic_summary = subtopic_summary.to_string();
            }
            None => {
                tracing::info!(topic = %topic_key, subtopic = %subtopic_key, "created new subtopic");
                topic.subtopics.push(SubtopicEntry {
                    subtopic_key: subtopic_key.to_string(),
                    subtopic_title: subtopic_title.to_string(),
                    page_range: page_range.to_string(),
                    status,
                    subtopic_summary: subtopic_summary.to_string(),
                });
            }
        }
    }

    /// Update a subtopic's status. Returns false when the entry is missing.
    pub fn set_status(&mut self, topic_key: &str, subtopic_key: &str, status: SubtopicStatus) -> bool {
        if let Some(topic) = self.topic_mut(topic_key) {
            if let Some(entry) = topic.subtopics.iter_mut().find(|s| s.subtopic_key == subtopic_key) {
                entry.status = status;
                return true;
            }
        }
        false
    }

    pub fn set_topic_summary(&mut self, topic_key: &str, summary: &str) {
        if let Some(topic) = self.topic_mut(topic_key) {
            topic.topic_summary = summary.to_string();
        }
    }

    /// Remove a subtopic; its topic is dropped once empty.
    pub fn remove_subtopic(&mut self, topic_key: &str, subtopic_key: &str) {
        if let Some(topic) = self.topic_mut(topic_key) {
            topic.subtopics.retain(|s| s.subtopic_key != subtopic_key);
        }
        self.topics
            .retain(|t| t.topic_key != topic_key || !t.subtopics.is_empty());
    }

    /// Move a subtopic entry to new keys/titles, preserving its status,
    /// range, and summary. The old topic is dropped once empty.
    pub fn rename_subtopic(
        &mut self,
        old_topic_key: &str,
        old_subtopic_key: &str,
        new_topic_key: &str,
        new_topic_title: &str,
        new_subtopic_key: &str,
        new_subtopic_title: &str,
    ) {
        let Some(entry) = self
            .subtopic(old_topic_key, old_subtopic_key)
            .cloned()
        else {
            tracing::warn!(
                topic = %old_topic_key,
                subtopic = %old_subtopic_key,
                "rename target not present in index"
            );
            return;
        };

        self.remove_subtopic(old_topic_key, old_subtopic_key);
        self.upsert_subtopic(
            new_topic_key,
            new_topic_title,
            new_subtopic_key,
            new_subtopic_title,
            &entry.page_range,
            entry.status,
            &entry.subtopic_summary,
        );
    }
}

/// Assignment of one page to a subtopic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageAssignment {
    pub topic_key: String,
    pub subtopic_key: String,
    pub confidence: f32,
    pub provisional: bool,
}

/// `books/{book_id}/guidelines/page_index.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageIndex {
    pub book_id: String,
    pub version: u64,
    pub last_updated: DateTime<Utc>,
    pub pages: BTreeMap<u32, PageAssignment>,
}

impl PageIndex {
    pub fn new(book_id: impl Into<String>) -> Self {
        Self {
            book_id: book_id.into(),
            version: 1,
            last_updated: Utc::now(),
            pages: BTreeMap::new(),
        }
    }

    pub fn assign(&mut self, page: u32, assignment: PageAssignment) {
        self.pages.insert(page, assignment);
    }

    /// Pages assigned to one subtopic, ascending.
    pub fn pages_for_subtopic(&self, topic_key: &str, subtopic_key: &str) -> Vec<u32> {
        self.pages
            .iter()
            .filter(|(_, a)| a.topic_key == topic_key && a.subtopic_key == subtopic_key)
            .map(|(page, _)| *page)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index_with_one_subtopic() -> GuidelinesIndex {
        let mut index = GuidelinesIndex::new("b1");
        index.upsert_subtopic(
            "fractions",
            "Fractions",
            "halves",
            "Halves",
            "2-4",
            SubtopicStatus::Open,
            "Intro to halves",
        );
        index
    }

    #[test]
    fn upsert_creates_topic_and_subtopic() {
        let index = index_with_one_subtopic();
        assert_eq!(index.topics.len(), 1);
        let entry = index.subtopic("fractions", "halves").unwrap();
        assert_eq!(entry.status, SubtopicStatus::Open);
        assert_eq!(entry.page_start(), Some(2));
        assert_eq!(entry.page_end(), Some(4));
    }

    #[test]
    fn upsert_updates_existing_entry() {
        let mut index = index_with_one_subtopic();
        index.upsert_subtopic(
            "fractions",
            "Fractions",
            "halves",
            "Halves",
            "2-7",
            SubtopicStatus::Open,
            "More halves",
        );
        assert_eq!(index.subtopic_count(), 1);
        let entry = index.subtopic("fractions", "halves").unwrap();
        assert_eq!(entry.page_end(), Some(7));
        assert_eq!(entry.subtopic_summary, "More halves");
    }

    #[test]
    fn remove_drops_empty_topic() {
        let mut index = index_with_one_subtopic();
        index.remove_subtopic("fractions", "halves");
        assert!(index.topics.is_empty());
    }

    #[test]
    fn rename_preserves_status_and_range() {
        let mut index = index_with_one_subtopic();
        index.set_status("fractions", "halves", SubtopicStatus::Final);
        index.rename_subtopic(
            "fractions",
            "halves",
            "fractions-basics",
            "Fractions Basics",
            "understanding-halves",
            "Understanding Halves",
        );
        assert!(index.subtopic("fractions", "halves").is_none());
        let entry = index.subtopic("fractions-basics", "understanding-halves").unwrap();
        assert_eq!(entry.status, SubtopicStatus::Final);
        assert_eq!(entry.page_range, "2-4");
    }

    #[test]
    fn page_index_filters_by_subtopic() {
        let mut pi = PageIndex::new("b1");
        for page in [1, 2, 5] {
            pi.assign(
                page,
                PageAssignment {
                    topic_key: "fractions".into(),
                    subtopic_key: "halves".into(),
                    confidence: 0.9,
                    provisional: false,
                },
            );
        }
        pi.assign(
            3,
            PageAssignment {
                topic_key: "shapes".into(),
                subtopic_key: "circles".into(),
                confidence: 0.9,
                provisional: false,
            },
        );
        assert_eq!(pi.pages_for_subtopic("fractions", "halves"), vec![1, 2, 5]);
    }
}
