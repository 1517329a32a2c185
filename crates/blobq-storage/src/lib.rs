//! blobq Storage - Blob backends for message content
//!
//! This crate provides pluggable content storage behind one contract.
//! Currently supports:
//! - Local filesystem (flat directory, one file per message)
//! - S3-compatible object storage (feature `s3`)
//! - In-memory storage (feature `memory`, for development/testing)

pub mod local;
pub mod traits;

#[cfg(feature = "memory")]
pub mod memory;

#[cfg(feature = "s3")]
pub mod s3;

use std::sync::Arc;

use blobq_types::{Result, StorageConfig};

// Re-exports
pub use local::LocalBackend;
pub use traits::{BlobStore, CONTENT_EXTENSION};

#[cfg(feature = "memory")]
pub use memory::MemoryBackend;

#[cfg(feature = "s3")]
pub use s3::RemoteObjectBackend;

/// Build the backend selected by `config`.
///
/// The choice is made once here; callers only ever see `dyn BlobStore`.
pub async fn open_backend(config: &StorageConfig) -> Result<Arc<dyn BlobStore>> {
    match config {
        StorageConfig::Local { root } => Ok(Arc::new(LocalBackend::new(root).await?)),

        #[cfg(feature = "s3")]
        StorageConfig::RemoteObject {
            bucket,
            prefix,
            endpoint_url,
            region,
        } => {
            let backend = RemoteObjectBackend::from_env(
                bucket.clone(),
                prefix.clone(),
                endpoint_url.clone(),
                region.clone(),
            )
            .await;
            backend.ensure_bucket().await?;
            Ok(Arc::new(backend))
        }

        #[cfg(not(feature = "s3"))]
        StorageConfig::RemoteObject { .. } => Err(blobq_types::Error::InvalidInput(
            "remote-object storage requires the `s3` feature".to_string(),
        )),
    }
}
