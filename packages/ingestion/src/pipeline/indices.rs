//! Index persistence with version bumps and best-effort snapshots.
//!
//! Indices follow read-modify-write discipline: loaded, mutated in memory,
//! and overwritten. There is no compare-and-swap; single-writer discipline
//! comes from the job lock. Every save bumps the document's version. When
//! a snapshot is requested, the outgoing version is copied aside first and
//! a snapshot failure never blocks the primary write.

use std::sync::Arc;

use chrono::Utc;

use crate::layout;
use crate::traits::store::{ObjectStore, ObjectStoreExt, StoreError};
use crate::types::{GuidelinesIndex, PageIndex};

pub struct IndexManager {
    store: Arc<dyn ObjectStore>,
}

impl IndexManager {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    pub async fn load_index(&self, book_id: &str) -> Result<GuidelinesIndex, StoreError> {
        self.store.get_json(&layout::guidelines_index(book_id)).await
    }

    pub async fn get_or_create_index(&self, book_id: &str) -> Result<GuidelinesIndex, StoreError> {
        match self.load_index(book_id).await {
            Ok(index) => Ok(index),
            Err(StoreError::NotFound { .. }) => {
                tracing::info!(book_id, "no index found, creating new one");
                Ok(GuidelinesIndex::new(book_id))
            }
            Err(err) => Err(err),
        }
    }

    pub async fn save_index(
        &self,
        index: &mut GuidelinesIndex,
        create_snapshot: bool,
    ) -> Result<(), StoreError> {
        if create_snapshot {
            self.snapshot_index(&index.book_id).await;
        }
        index.version += 1;
        index.last_updated = Utc::now();
        self.store
            .put_json(&layout::guidelines_index(&index.book_id), index)
            .await?;
        tracing::debug!(
            book_id = %index.book_id,
            version = index.version,
            topics = index.topics.len(),
            "index saved"
        );
        Ok(())
    }

    pub async fn load_page_index(&self, book_id: &str) -> Result<PageIndex, StoreError> {
        self.store.get_json(&layout::page_index(book_id)).await
    }

    pub async fn get_or_create_page_index(&self, book_id: &str) -> Result<PageIndex, StoreError> {
        match self.load_page_index(book_id).await {
            Ok(index) => Ok(index),
            Err(StoreError::NotFound { .. }) => {
                tracing::info!(book_id, "no page index found, creating new one");
                Ok(PageIndex::new(book_id))
            }
            Err(err) => Err(err),
        }
    }

    pub async fn save_page_index(
        &self,
        page_index: &mut PageIndex,
        create_snapshot: bool,
    ) -> Result<(), StoreError> {
        if create_snapshot {
            self.snapshot_page_index(&page_index.book_id).await;
        }
        page_index.version += 1;
        page_index.last_updated = Utc::now();
        self.store
            .put_json(&layout::page_index(&page_index.book_id), page_index)
            .await?;
        Ok(())
    }

    async fn snapshot_index(&self, book_id: &str) {
        match self.load_index(book_id).await {
            Ok(old) => {
                let key = layout::index_snapshot(book_id, old.version);
                match self.store.put_json(&key, &old).await {
                    Ok(()) => tracing::info!(%key, "created index snapshot"),
                    Err(err) => tracing::warn!(%key, error = %err, "failed to create index snapshot"),
                }
            }
            Err(StoreError::NotFound { .. }) => {} // first save
            Err(err) => tracing::warn!(book_id, error = %err, "failed to read index for snapshot"),
        }
    }

    async fn snapshot_page_index(&self, book_id: &str) {
        match self.load_page_index(book_id).await {
            Ok(old) => {
                let key = layout::page_index_snapshot(book_id, old.version);
                match self.store.put_json(&key, &old).await {
                    Ok(()) => tracing::info!(%key, "created page index snapshot"),
                    Err(err) => tracing::warn!(%key, error = %err, "failed to create page index snapshot"),
                }
            }
            Err(StoreError::NotFound { .. }) => {}
            Err(err) => tracing::warn!(book_id, error = %err, "failed to read page index for snapshot"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stores::MemoryObjectStore;
    use crate::types::SubtopicStatus;

    #[tokio::test]
    async fn versions_increase_across_saves() {
        let store = Arc::new(MemoryObjectStore::new());
        let manager = IndexManager::new(store);
        let mut index = manager.get_or_create_index("b1").await.unwrap();
        let v0 = index.version;
        manager.save_index(&mut index, false).await.unwrap();
        let v1 = index.version;
        manager.save_index(&mut index, false).await.unwrap();
        assert!(v0 < v1 && v1 < index.version);
    }

    #[tokio::test]
    async fn snapshot_preserves_outgoing_version() {
        let store = Arc::new(MemoryObjectStore::new());
        let manager = IndexManager::new(store.clone());

        let mut index = manager.get_or_create_index("b1").await.unwrap();
        index.upsert_subtopic("t", "T", "s", "S", "1-1", SubtopicStatus::Open, "");
        manager.save_index(&mut index, true).await.unwrap();
        // No prior index, so no snapshot on first save.
        assert!(store.keys_with_prefix("books/b1/guidelines/snapshots/").is_empty());

        let saved_version = index.version;
        manager.save_index(&mut index, true).await.unwrap();
        let snapshot_key = layout::index_snapshot("b1", saved_version);
        assert!(store.contains(&snapshot_key));
    }

    #[tokio::test]
    async fn page_index_round_trip() {
        let store = Arc::new(MemoryObjectStore::new());
        let manager = IndexManager::new(store);
        let mut pi = manager.get_or_create_page_index("b1").await.unwrap();
        pi.assign(
            3,
            crate::types::PageAssignment {
                topic_key: "t".into(),
                subtopic_key: "s".into(),
                confidence: 0.9,
                provisional: false,
            },
        );
        manager.save_page_index(&mut pi, false).await.unwrap();
        let loaded = manager.load_page_index("b1").await.unwrap();
        assert_eq!(loaded.pages.len(), 1);
        assert!(loaded.pages.contains_key(&3));
    }
}
