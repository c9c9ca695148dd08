//! In-memory object store for testing and development.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use crate::traits::store::{ObjectStore, StoreError};

/// In-memory key/value object store.
///
/// Useful for testing and development. Not suitable for production as data
/// is lost on restart.
#[derive(Default)]
pub struct MemoryObjectStore {
    objects: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// All stored keys, sorted. Handy for assertions.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.objects.read().unwrap().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Keys under a prefix, sorted.
    pub fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        let mut keys: Vec<String> = self
            .objects
            .read()
            .unwrap()
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.objects.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.read().unwrap().is_empty()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.objects.read().unwrap().contains_key(key)
    }

    /// Clear all stored data.
    pub fn clear(&self) {
        self.objects.write().unwrap().clear();
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn upload_bytes(
        &self,
        key: &str,
        data: Vec<u8>,
        _content_type: Option<&str>,
    ) -> Result<(), StoreError> {
        self.objects.write().unwrap().insert(key.to_string(), data);
        Ok(())
    }

    async fn download_bytes(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        self.objects
            .read()
            .unwrap()
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound { key: key.to_string() })
    }

    async fn delete_file(&self, key: &str) -> Result<(), StoreError> {
        self.objects.write().unwrap().remove(key);
        Ok(())
    }

    async fn get_presigned_url(&self, key: &str, _expires_in_secs: u64) -> Result<String, StoreError> {
        if self.contains(key) {
            Ok(format!("memory://{key}"))
        } else {
            Err(StoreError::NotFound { key: key.to_string() })
        }
    }
}
