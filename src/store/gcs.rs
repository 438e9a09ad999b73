//! Google Cloud Storage adapter using OpenDAL.

use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::{Context, Result};
use async_trait::async_trait;
use opendal::{services::Gcs, Operator};

use super::{ObjectPage, ObjectStore, StoreError};

/// Object store over Google Cloud Storage.
///
/// Without an explicit credential, the standard Google chain applies
/// (GOOGLE_APPLICATION_CREDENTIALS, gcloud config, metadata server,
/// workload identity).
#[derive(Default)]
pub struct GcsStore {
    credential: Option<String>,
    operators: Mutex<HashMap<String, Operator>>,
}

impl GcsStore {
    /// Application-default credentials.
    pub fn new() -> Self {
        Self::default()
    }

    /// Use an explicit service account credential (JSON content).
    pub fn with_credential(credential: &str) -> Self {
        Self {
            credential: Some(credential.to_string()),
            operators: Mutex::new(HashMap::new()),
        }
    }

    /// Load the credential from a service account JSON file.
    pub fn from_service_account(path: &str) -> Result<Self> {
        let credential =
            std::fs::read_to_string(path).context("Failed to read service account file")?;
        Ok(Self::with_credential(&credential))
    }

    fn operator_for(&self, bucket: &str) -> Result<Operator, StoreError> {
        let mut operators = self.operators.lock().unwrap();
        if let Some(operator) = operators.get(bucket) {
            return Ok(operator.clone());
        }

        let mut builder = Gcs::default().bucket(bucket);
        if let Some(credential) = &self.credential {
            builder = builder.credential(credential);
        }

        let operator = Operator::new(builder)?.finish();
        operators.insert(bucket.to_string(), operator.clone());
        Ok(operator)
    }
}

#[async_trait]
impl ObjectStore for GcsStore {
    async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
        continuation: Option<&str>,
        max_keys: usize,
    ) -> Result<ObjectPage, StoreError> {
        let operator = self.operator_for(bucket)?;
        super::list_page(&operator, prefix, continuation, max_keys).await
    }

    async fn get_object(&self, bucket: &str, key: &str) -> Result<Vec<u8>, StoreError> {
        let operator = self.operator_for(bucket)?;
        super::read_object(&operator, key).await
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Vec<u8>,
        content_type: &str,
    ) -> Result<(), StoreError> {
        let operator = self.operator_for(bucket)?;
        super::write_object(&operator, key, body, content_type).await
    }
}
