//! S3 and S3-compatible object store adapter using OpenDAL.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use opendal::{services::S3, Operator};

use super::{ObjectPage, ObjectStore, StoreError};

/// S3-compatible storage providers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum S3Provider {
    Aws,
    Minio,
    CloudflareR2,
    DigitalOcean,
    Custom { endpoint: String },
}

impl S3Provider {
    /// Endpoint URL for this provider; `None` means the AWS default.
    fn endpoint(&self, region: &str) -> Option<String> {
        match self {
            S3Provider::Aws => None,
            S3Provider::Minio => Some("http://localhost:9000".to_string()),
            S3Provider::CloudflareR2 => {
                Some(format!("https://{region}.r2.cloudflarestorage.com"))
            }
            S3Provider::DigitalOcean => Some(format!("https://{region}.digitaloceanspaces.com")),
            S3Provider::Custom { endpoint } => Some(endpoint.clone()),
        }
    }
}

/// Explicit access keys. When absent, the standard AWS credential chain
/// applies (environment, shared credentials file, instance profile).
#[derive(Debug, Clone)]
pub struct S3Credentials {
    pub access_key_id: String,
    pub secret_access_key: String,
}

/// Object store over S3 or any S3-compatible service.
///
/// Operators are built lazily per bucket and cached.
pub struct S3Store {
    region: String,
    provider: S3Provider,
    credentials: Option<S3Credentials>,
    operators: Mutex<HashMap<String, Operator>>,
}

impl S3Store {
    /// AWS S3 in the given region, credentials from the ambient chain.
    pub fn new(region: &str) -> Self {
        Self {
            region: region.to_string(),
            provider: S3Provider::Aws,
            credentials: None,
            operators: Mutex::new(HashMap::new()),
        }
    }

    /// Use explicit access keys instead of the ambient credential chain.
    pub fn with_credentials(mut self, access_key_id: &str, secret_access_key: &str) -> Self {
        self.credentials = Some(S3Credentials {
            access_key_id: access_key_id.to_string(),
            secret_access_key: secret_access_key.to_string(),
        });
        self
    }

    /// Target an S3-compatible provider instead of AWS.
    pub fn with_provider(mut self, provider: S3Provider) -> Self {
        self.provider = provider;
        self
    }

    /// Target a custom S3-compatible endpoint.
    pub fn with_endpoint(self, endpoint: &str) -> Self {
        self.with_provider(S3Provider::Custom {
            endpoint: endpoint.to_string(),
        })
    }

    fn operator_for(&self, bucket: &str) -> Result<Operator, StoreError> {
        let mut operators = self.operators.lock().unwrap();
        if let Some(operator) = operators.get(bucket) {
            return Ok(operator.clone());
        }

        let mut builder = S3::default().bucket(bucket).region(&self.region);
        if let Some(credentials) = &self.credentials {
            builder = builder
                .access_key_id(&credentials.access_key_id)
                .secret_access_key(&credentials.secret_access_key);
        }
        if let Some(endpoint) = self.provider.endpoint(&self.region) {
            builder = builder.endpoint(&endpoint);
        }

        let operator = Operator::new(builder)?.finish();
        operators.insert(bucket.to_string(), operator.clone());
        Ok(operator)
    }
}

#[async_trait]
impl ObjectStore for S3Store {
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
