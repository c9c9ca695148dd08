//! Relational sync target for finalized guidelines.
//!
//! Finalization snapshots the whole book into `teaching_guidelines`:
//! dependents are cascade-deleted, prior rows for the book removed, and one
//! fresh row inserted per shard, all in a single transaction.

#[cfg(feature = "postgres")]
pub mod postgres;

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

#[cfg(feature = "postgres")]
pub use postgres::PgGuidelineRepository;

/// Review state stamped on every freshly synced row.
pub const REVIEW_STATUS_TO_BE_REVIEWED: &str = "TO_BE_REVIEWED";

/// Errors from the relational sync target.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("database error: {0}")]
    Database(String),
}

/// One row of `teaching_guidelines`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "postgres", derive(sqlx::FromRow))]
pub struct GuidelineRow {
    pub id: Uuid,
    pub book_id: String,
    pub country: String,
    pub grade: i32,
    pub subject: String,
    pub board: String,
    pub topic_key: String,
    pub subtopic_key: String,
    pub topic_title: String,
    pub subtopic_title: String,
    pub topic_summary: String,
    pub subtopic_summary: String,
    pub guidelines: String,
    pub source_page_start: i32,
    pub source_page_end: i32,
    pub status: String,
    pub version: i64,
    pub review_status: String,
}

/// Sync target contract.
#[async_trait]
pub trait GuidelineRepository: Send + Sync {
    /// Replace every guideline row for the book with `rows`, atomically.
    /// Returns the inserted row ids in input order.
    async fn replace_book_guidelines(
        &self,
        book_id: &str,
        rows: &[GuidelineRow],
    ) -> Result<Vec<Uuid>, SyncError>;

    /// Current rows for a book, for monitoring and tests.
    async fn guidelines_for_book(&self, book_id: &str) -> Result<Vec<GuidelineRow>, SyncError>;
}

/// In-memory sync target for testing and development.
#[derive(Default)]
pub struct MemoryGuidelineRepository {
    rows: RwLock<HashMap<String, Vec<GuidelineRow>>>,
}

impl MemoryGuidelineRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl GuidelineRepository for MemoryGuidelineRepository {
    async fn replace_book_guidelines(
        &self,
        book_id: &str,
        rows: &[GuidelineRow],
    ) -> Result<Vec<Uuid>, SyncError> {
        let mut map = self.rows.write().unwrap();
        map.insert(book_id.to_string(), rows.to_vec());
        Ok(rows.iter().map(|r| r.id).collect())
    }

    async fn guidelines_for_book(&self, book_id: &str) -> Result<Vec<GuidelineRow>, SyncError> {
        Ok(self
            .rows
            .read()
            .unwrap()
            .get(book_id)
            .cloned()
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(book_id: &str, subtopic_key: &str) -> GuidelineRow {
        GuidelineRow {
            id: Uuid::new_v4(),
            book_id: book_id.into(),
            country: "India".into(),
            grade: 3,
            subject: "Math".into(),
            board: "CBSE".into(),
            topic_key: "t".into(),
            subtopic_key: subtopic_key.into(),
            topic_title: "T".into(),
            subtopic_title: subtopic_key.to_uppercase(),
            topic_summary: String::new(),
            subtopic_summary: String::new(),
            guidelines: "g".into(),
            source_page_start: 1,
            source_page_end: 2,
            status: "synced".into(),
            version: 1,
            review_status: REVIEW_STATUS_TO_BE_REVIEWED.into(),
        }
    }

    #[tokio::test]
    async fn replace_discards_prior_rows() {
        let repo = MemoryGuidelineRepository::new();
        repo.replace_book_guidelines("b1", &[row("b1", "s1"), row("b1", "s2")])
            .await
            .unwrap();
        repo.replace_book_guidelines("b1", &[row("b1", "s3")]).await.unwrap();

        let rows = repo.guidelines_for_book("b1").await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].subtopic_key, "s3");
    }

    #[tokio::test]
    async fn books_are_isolated() {
        let repo = MemoryGuidelineRepository::new();
        repo.replace_book_guidelines("b1", &[row("b1", "s1")]).await.unwrap();
        repo.replace_book_guidelines("b2", &[row("b2", "s9")]).await.unwrap();
        assert_eq!(repo.guidelines_for_book("b1").await.unwrap().len(), 1);
        assert_eq!(repo.guidelines_for_book("b2").await.unwrap().len(), 1);
    }
}
