//! S3-compatible object storage backend (AWS S3, MinIO, etc.)

use async_trait::async_trait;
use aws_sdk_s3::error::{DisplayErrorContext, SdkError};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use blobq_types::{BackendKind, Error, Result, StorageKey};
use bytes::Bytes;
use tracing::{debug, info};

use crate::traits::{BlobStore, CONTENT_EXTENSION};

/// S3-compatible storage
///
/// Bucket structure:
/// ```text
/// {bucket}/
///   {prefix}{key}.txt
/// ```
///
/// Credentials are never passed in; the client is built from the ambient
/// AWS provider chain.
pub struct RemoteObjectBackend {
    client: Client,
    bucket: String,
    prefix: String,
}

impl RemoteObjectBackend {
    /// Create from existing AWS SDK client
    pub fn new(client: Client, bucket: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
            prefix: prefix.into(),
        }
    }

    /// Create a client from the default provider chain.
    ///
    /// `endpoint_url` switches to path-style addressing, which MinIO and
    /// most other S3-compatible services require.
    pub async fn from_env(
        bucket: impl Into<String>,
        prefix: impl Into<String>,
        endpoint_url: Option<String>,
        region: Option<String>,
    ) -> Self {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
        if let Some(region) = region {
            loader = loader.region(aws_sdk_s3::config::Region::new(region));
        }
        let shared = loader.load().await;

        let mut builder = aws_sdk_s3::config::Builder::from(&shared);
        if let Some(endpoint) = endpoint_url {
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }

        let backend = Self::new(Client::from_conf(builder.build()), bucket, prefix);
        info!(bucket = %backend.bucket, prefix = %backend.prefix, "Initializing object blob storage");
        backend
    }

    /// Ensure bucket exists (call on startup)
    pub async fn ensure_bucket(&self) -> Result<()> {
        match self.client.head_bucket().bucket(&self.bucket).send().await {
            Ok(_) => Ok(()),
            Err(e) if is_status(&e, &[404]) => {
                self.client
                    .create_bucket()
                    .bucket(&self.bucket)
                    .send()
                    .await
                    .map_err(|e| {
                        Error::Unavailable(format!(
                            "failed to create bucket {}: {}",
                            self.bucket,
                            DisplayErrorContext(&e)
                        ))
                    })?;
                info!(bucket = %self.bucket, "Bucket created");
                Ok(())
            }
            Err(e) => Err(Error::Unavailable(format!(
                "failed to access bucket {}: {}",
                self.bucket,
                DisplayErrorContext(&e)
            ))),
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    fn object_key(&self, key: &StorageKey) -> String {
        format!("{}{}.{}", self.prefix, key, CONTENT_EXTENSION)
    }

    async fn put(&self, object: &str, content: &[u8], create_only: bool) -> Result<()> {
        let mut request = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(object)
            .content_type("text/plain; charset=utf-8")
            .body(ByteStream::from(content.to_vec()));
        if create_only {
            request = request.if_none_match("*");
        }

        request.send().await.map_err(|e| {
            // 412 from S3, 409 when a concurrent conditional write is in progress
            if create_only && is_status(&e, &[409, 412]) {
                Error::AlreadyExists(object.to_string())
            } else {
                unavailable("PUT", object, &e)
            }
        })?;
        Ok(())
    }

    async fn require_existing(&self, object: &str) -> Result<()> {
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(object)
            .send()
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if is_status(&e, &[404]) => Err(Error::NotFound(object.to_string())),
            Err(e) => Err(unavailable("HEAD", object, &e)),
        }
    }
}

#[async_trait]
impl BlobStore for RemoteObjectBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::RemoteObject
    }

    async fn create(&self, key: &StorageKey, content: &[u8]) -> Result<()> {
        let object = self.object_key(key);
        self.put(&object, content, true).await?;
        debug!(storage_key = %key, bytes = content.len(), "Object created");
        Ok(())
    }

    async fn read(&self, key: &StorageKey) -> Result<Bytes> {
        let object = self.object_key(key);

        let response = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&object)
            .send()
            .await
            .map_err(|e| {
                if is_status(&e, &[404]) {
                    Error::NotFound(object.clone())
                } else {
                    unavailable("GET", &object, &e)
                }
            })?;

        let data = response
            .body
            .collect()
            .await
            .map_err(|e| Error::Unavailable(format!("failed to read body of {object}: {e}")))?
            .into_bytes();

        Ok(data)
    }

    async fn update(&self, key: &StorageKey, content: &[u8]) -> Result<()> {
        let object = self.object_key(key);
        // S3 PUT is an unconditional upsert
        self.require_existing(&object).await?;
        self.put(&object, content, false).await?;
        debug!(storage_key = %key, bytes = content.len(), "Object updated");
        Ok(())
    }

    async fn delete(&self, key: &StorageKey) -> Result<()> {
        let object = self.object_key(key);
        // S3 DELETE succeeds for missing objects
        self.require_existing(&object).await?;

        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(&object)
            .send()
            .await
            .map_err(|e| unavailable("DELETE", &object, &e))?;

        debug!(storage_key = %key, "Object deleted");
        Ok(())
    }

    async fn exists(&self, key: &StorageKey) -> Result<bool> {
        match self.require_existing(&self.object_key(key)).await {
            Ok(()) => Ok(true),
            Err(Error::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

fn is_status<E>(err: &SdkError<E>, codes: &[u16]) -> bool {
    matches!(err, SdkError::ServiceError(e) if codes.contains(&e.raw().status().as_u16()))
}

fn unavailable<E>(op: &str, object: &str, err: &SdkError<E>) -> Error
where
    E: std::error::Error + 'static,
{
    Error::Unavailable(format!(
        "S3 {op} {object} failed: {}",
        DisplayErrorContext(err)
    ))
}
