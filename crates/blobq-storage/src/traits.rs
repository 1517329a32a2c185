//! Blob store trait definition
//!
//! Defines the capability contract every content backend implements.

use async_trait::async_trait;
use blobq_types::{BackendKind, Result, StorageKey};
use bytes::Bytes;

/// Extension appended to every stored blob name
pub const CONTENT_EXTENSION: &str = "txt";

/// Blob store trait - all content backends implement this
///
/// Every backend gives the same black-box behavior for the operations below,
/// so the queue never needs to know which one it is talking to.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Which medium this backend writes to
    fn kind(&self) -> BackendKind;

    /// Write a new blob.
    ///
    /// Fails with `AlreadyExists` if the key is occupied; never overwrites.
    async fn create(&self, key: &StorageKey, content: &[u8]) -> Result<()>;

    /// Read a blob, `NotFound` if absent
    async fn read(&self, key: &StorageKey) -> Result<Bytes>;

    /// Replace the content of an existing blob, `NotFound` if absent
    async fn update(&self, key: &StorageKey, content: &[u8]) -> Result<()>;

    /// Remove a blob, `NotFound` if absent
    async fn delete(&self, key: &StorageKey) -> Result<()>;

    /// Check whether a blob exists
    async fn exists(&self, key: &StorageKey) -> Result<bool>;
}
