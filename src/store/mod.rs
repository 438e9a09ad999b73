//! Remote object store boundary.
//!
//! The sync engine consumes object storage through the [`ObjectStore`]
//! trait: paginated key listing, whole-object get, whole-object put.
//! Adapters for S3-compatible services and Google Cloud Storage are built
//! on OpenDAL; an in-memory store backs tests and local development.

pub mod gcs;
pub mod memory;
pub mod s3;

use async_trait::async_trait;
use futures::TryStreamExt;
use opendal::Operator;
use thiserror::Error;

pub use gcs::GcsStore;
pub use memory::MemoryStore;
pub use s3::{S3Provider, S3Store};

/// One listed object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteObject {
    pub key: String,
    pub size_bytes: u64,
}

/// One page of a listing.
#[derive(Debug, Clone, Default)]
pub struct ObjectPage {
    pub objects: Vec<RemoteObject>,
    /// Token resuming the listing after this page; `None` when exhausted.
    pub next_continuation: Option<String>,
}

/// Errors from the object store boundary.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("object not found: {0}")]
    NotFound(String),

    #[error("storage backend error: {0}")]
    Backend(#[from] opendal::Error),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Durable key/blob storage addressed by bucket + key.
///
/// Listings may include the prefix root itself and directory markers
/// (keys with a trailing `/`); callers are expected to skip them.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// List up to `max_keys` objects under `prefix`, resuming from a
    /// continuation token returned by a previous page.
    async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
        continuation: Option<&str>,
        max_keys: usize,
    ) -> Result<ObjectPage, StoreError>;

    /// Fetch the full contents of one object.
    async fn get_object(&self, bucket: &str, key: &str) -> Result<Vec<u8>, StoreError>;

    /// Store one object, replacing any existing content.
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Vec<u8>,
        content_type: &str,
    ) -> Result<(), StoreError>;
}

/// Drive an OpenDAL lister one page at a time. The continuation token is
/// the last key of a full page.
pub(crate) async fn list_page(
    operator: &Operator,
    prefix: &str,
    continuation: Option<&str>,
    max_keys: usize,
) -> Result<ObjectPage, StoreError> {
    let mut lister = match continuation {
        Some(token) => {
            operator
                .lister_with(prefix)
                .recursive(true)
                .start_after(token)
                .await?
        }
        None => operator.lister_with(prefix).recursive(true).await?,
    };

    let mut objects = Vec::new();
    while objects.len() < max_keys {
        match lister.try_next().await? {
            Some(entry) => {
                let metadata = entry.metadata();
                objects.push(RemoteObject {
                    key: entry.path().to_string(),
                    size_bytes: metadata.content_length(),
                });
            }
            None => {
                return Ok(ObjectPage {
                    objects,
                    next_continuation: None,
                })
            }
        }
    }

    let next_continuation = objects.last().map(|o| o.key.clone());
    Ok(ObjectPage {
        objects,
        next_continuation,
    })
}

pub(crate) async fn read_object(operator: &Operator, key: &str) -> Result<Vec<u8>, StoreError> {
    match operator.read(key).await {
        Ok(buffer) => Ok(buffer.to_vec()),
        Err(err) if err.kind() == opendal::ErrorKind::NotFound => {
            Err(StoreError::NotFound(key.to_string()))
        }
        Err(err) => Err(err.into()),
    }
}

pub(crate) async fn write_object(
    operator: &Operator,
    key: &str,
    body: Vec<u8>,
    content_type: &str,
) -> Result<(), StoreError> {
    operator
        .write_with(key, body)
        .content_type(content_type)
        .await?;
    Ok(())
}
