//! Object-store abstraction.
//!
//! Keys are plain strings; reads of missing keys surface a distinguishable
//! `StoreError::NotFound`. The pipeline never needs range reads or listing:
//! everything reachable is reachable through the indices.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

use crate::layout;
use crate::types::BookMetadata;

/// Errors from object-store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The key does not exist.
    #[error("object not found: {key}")]
    NotFound { key: String },

    /// The object exists but is not the JSON shape the caller expected.
    #[error("invalid JSON at {key}: {source}")]
    Json {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    /// The object exists but is not valid UTF-8 text.
    #[error("invalid UTF-8 at {key}")]
    Utf8 { key: String },

    /// Backend failure (network, credentials, throttling).
    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Object store contract the pipeline is written against.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn upload_bytes(
        &self,
        key: &str,
        data: Vec<u8>,
        content_type: Option<&str>,
    ) -> Result<(), StoreError>;

    async fn download_bytes(&self, key: &str) -> Result<Vec<u8>, StoreError>;

    async fn delete_file(&self, key: &str) -> Result<(), StoreError>;

    /// Temporary access URL for one object.
    async fn get_presigned_url(&self, key: &str, expires_in_secs: u64) -> Result<String, StoreError>;

    async fn upload_json(&self, key: &str, value: &serde_json::Value) -> Result<(), StoreError> {
        let data = serde_json::to_vec_pretty(value).map_err(|source| StoreError::Json {
            key: key.to_string(),
            source,
        })?;
        self.upload_bytes(key, data, Some("application/json")).await
    }

    async fn download_json(&self, key: &str) -> Result<serde_json::Value, StoreError> {
        let bytes = self.download_bytes(key).await?;
        serde_json::from_slice(&bytes).map_err(|source| StoreError::Json {
            key: key.to_string(),
            source,
        })
    }
}

/// Typed JSON and text helpers over any [`ObjectStore`].
#[async_trait]
pub trait ObjectStoreExt: ObjectStore {
    async fn put_json<T: Serialize + Sync>(&self, key: &str, value: &T) -> Result<(), StoreError> {
        let value = serde_json::to_value(value).map_err(|source| StoreError::Json {
            key: key.to_string(),
            source,
        })?;
        self.upload_json(key, &value).await
    }

    async fn get_json<T: DeserializeOwned + Send>(&self, key: &str) -> Result<T, StoreError> {
        let value = self.download_json(key).await?;
        serde_json::from_value(value).map_err(|source| StoreError::Json {
            key: key.to_string(),
            source,
        })
    }

    async fn download_text(&self, key: &str) -> Result<String, StoreError> {
        let bytes = self.download_bytes(key).await?;
        String::from_utf8(bytes).map_err(|_| StoreError::Utf8 { key: key.to_string() })
    }

    /// Overwrite the book's metadata document.
    async fn update_metadata_json(
        &self,
        book_id: &str,
        metadata: &BookMetadata,
    ) -> Result<(), StoreError> {
        self.put_json(&layout::metadata(book_id), metadata).await
    }
}

#[async_trait]
impl<T: ObjectStore + ?Sized> ObjectStoreExt for T {}
