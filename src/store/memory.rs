//! In-memory object store.
//!
//! Deterministic, token-paginated map of buckets to sorted keys. Backs
//! the engine tests and works for local development without credentials.

use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::sync::Mutex;

use async_trait::async_trait;

use super::{ObjectPage, ObjectStore, RemoteObject, StoreError};

#[derive(Debug, Clone)]
struct StoredObject {
    body: Vec<u8>,
    content_type: String,
}

/// Object store backed by an in-process map.
#[derive(Default)]
pub struct MemoryStore {
    buckets: Mutex<HashMap<String, BTreeMap<String, StoredObject>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an object directly, bypassing the trait.
    pub fn insert(&self, bucket: &str, key: &str, body: impl Into<Vec<u8>>) {
        let mut buckets = self.buckets.lock().unwrap();
        buckets.entry(bucket.to_string()).or_default().insert(
            key.to_string(),
            StoredObject {
                body: body.into(),
                content_type: "application/octet-stream".to_string(),
            },
        );
    }

    /// Read an object's body without going through the trait.
    pub fn get(&self, bucket: &str, key: &str) -> Option<Vec<u8>> {
        let buckets = self.buckets.lock().unwrap();
        buckets.get(bucket)?.get(key).map(|o| o.body.clone())
    }

    /// Content type recorded for a stored object.
    pub fn content_type(&self, bucket: &str, key: &str) -> Option<String> {
        let buckets = self.buckets.lock().unwrap();
        buckets.get(bucket)?.get(key).map(|o| o.content_type.clone())
    }

    /// Number of objects in a bucket.
    pub fn len(&self, bucket: &str) -> usize {
        let buckets = self.buckets.lock().unwrap();
        buckets.get(bucket).map(|b| b.len()).unwrap_or(0)
    }

    pub fn is_empty(&self, bucket: &str) -> bool {
        self.len(bucket) == 0
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
        continuation: Option<&str>,
        max_keys: usize,
    ) -> Result<ObjectPage, StoreError> {
        let buckets = self.buckets.lock().unwrap();
        let Some(objects) = buckets.get(bucket) else {
            return Ok(ObjectPage::default());
        };

        let lower = match continuation {
            Some(token) => Bound::Excluded(token.to_string()),
            None => Bound::Unbounded,
        };

        let matching: Vec<(&String, &StoredObject)> = objects
            .range((lower, Bound::Unbounded))
            .filter(|(key, _)| key.starts_with(prefix))
            .take(max_keys + 1)
            .collect();

        let truncated = matching.len() > max_keys;
        let page: Vec<RemoteObject> = matching
            .into_iter()
            .take(max_keys)
            .map(|(key, object)| RemoteObject {
                key: key.clone(),
                size_bytes: object.body.len() as u64,
            })
            .collect();

        let next_continuation = if truncated {
            page.last().map(|o| o.key.clone())
        } else {
            None
        };

        Ok(ObjectPage {
            objects: page,
            next_continuation,
        })
    }

    async fn get_object(&self, bucket: &str, key: &str) -> Result<Vec<u8>, StoreError> {
        self.get(bucket, key)
            .ok_or_else(|| StoreError::NotFound(key.to_string()))
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Vec<u8>,
        content_type: &str,
    ) -> Result<(), StoreError> {
        let mut buckets = self.buckets.lock().unwrap();
        buckets.entry(bucket.to_string()).or_default().insert(
            key.to_string(),
            StoredObject {
                body,
                content_type: content_type.to_string(),
            },
        );
        Ok(())
    }
}
