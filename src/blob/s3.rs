//! Production [`BlobStore`] adapter backed by S3: `aws_sdk_s3::Client` with
//! `ProvideErrorMetadata` for error classification.

use async_trait::async_trait;
use aws_sdk_s3::Client;
use aws_sdk_s3::error::ProvideErrorMetadata;
use aws_sdk_s3::primitives::ByteStream;

use crate::error::{BlobError, StoreResult};

use super::{BlobStore, BulkObject};

/// S3-backed blob store. One bucket holds every tenant's offloaded payloads,
/// distinguished by the `[tenantId/]` key prefix ([`crate::blob::build_blob_key`]).
pub struct S3BlobStore {
    client: Client,
    bucket: String,
}

impl S3BlobStore {
    /// Builds a store against `bucket` using an already-resolved AWS SDK
    /// client (construct it once via `aws_config::load_defaults` and share
    /// it across components, per SPEC_FULL §5).
    pub fn new(client: Client, bucket: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
        }
    }
}

#[async_trait]
impl BlobStore for S3BlobStore {
    async fn put(&self, key: &str, object: &BulkObject) -> StoreResult<()> {
        let body = serde_json::to_vec(object)
            .map_err(|e| BlobError::Backend {
                message: format!("failed to serialize bulk object: {e}"),
            })?;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type("application/json")
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|e| BlobError::Backend {
                message: e.message().unwrap_or("put_object failed").to_string(),
            })?;
        Ok(())
    }

    async fn get(&self, key: &str) -> StoreResult<Option<BulkObject>> {
        let result = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await;

        let output = match result {
            Ok(output) => output,
            Err(err) => {
                if err
                    .as_service_error()
                    .map(|e| e.is_no_such_key())
                    .unwrap_or(false)
                {
                    return Ok(None);
                }
                return Err(BlobError::Backend {
                    message: err.message().unwrap_or("get_object failed").to_string(),
                }
                .into());
            }
        };

        let bytes = output.body.collect().await.map_err(|e| BlobError::Backend {
            message: format!("failed to read object body: {e}"),
        })?;

        let object: BulkObject = serde_json::from_slice(&bytes.into_bytes()).map_err(|e| {
            BlobError::Backend {
                message: format!("failed to deserialize bulk object: {e}"),
            }
        })?;
        Ok(Some(object))
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| BlobError::Backend {
                message: e.message().unwrap_or("delete_object failed").to_string(),
            })?;
        Ok(())
    }
}
