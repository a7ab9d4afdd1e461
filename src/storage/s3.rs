//! AWS S3 artifact storage.
//!
//! Rendered documents are written to `{bucket}/{prefix}/{container}/{key}.pdf`.

use async_trait::async_trait;
use aws_sdk_s3::Client;
use aws_sdk_s3::primitives::ByteStream;

use crate::error::{AppError, Result};
use crate::models::{StorageConfig, is_valid_id};
use crate::pipeline::ArtifactKey;
use crate::storage::ArtifactStore;

/// S3-backed artifact store.
#[derive(Clone)]
pub struct S3ArtifactStore {
    client: Client,
    bucket: String,
    prefix: String,
    container: String,
}

impl S3ArtifactStore {
    /// Create a new S3 artifact store.
    pub fn new(
        client: Client,
        bucket: impl Into<String>,
        prefix: impl Into<String>,
        container: impl Into<String>,
    ) -> Self {
        Self {
            client,
            bucket: bucket.into(),
            prefix: prefix.into(),
            container: container.into(),
        }
    }

    /// Create the store from storage configuration and the ambient AWS config.
    pub async fn from_config(storage: &StorageConfig) -> Result<Self> {
        let bucket = storage
            .s3_bucket
            .clone()
            .ok_or_else(|| AppError::config("storage.s3_bucket is required for S3 artifacts"))?;

        let aws = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        let client = Client::new(&aws);

        Ok(Self::new(
            client,
            bucket,
            storage.s3_prefix.clone().unwrap_or_default(),
            storage.artifact_container.clone(),
        ))
    }

    /// Object key for an artifact.
    fn object_key(&self, key: &ArtifactKey) -> String {
        let prefix = self.prefix.trim_matches('/');
        if prefix.is_empty() {
            format!("{}/{}.pdf", self.container, key.as_str())
        } else {
            format!("{}/{}/{}.pdf", prefix, self.container, key.as_str())
        }
    }
}

#[async_trait]
impl ArtifactStore for S3ArtifactStore {
    async fn put(&self, key: &ArtifactKey, bytes: Vec<u8>) -> Result<String> {
        if !is_valid_id(key.as_str()) {
            return Err(AppError::validation(format!("invalid artifact key {:?}", key.as_str())));
        }
        let object_key = self.object_key(key);

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&object_key)
            .body(ByteStream::from(bytes))
            .content_type("application/pdf")
            .send()
            .await
            .map_err(|e| AppError::S3(e.to_string()))?;

        let location = format!("s3://{}/{}", self.bucket, object_key);
        log::info!("Uploaded {}", location);
        Ok(location)
    }
}
