//! In-memory blob backend
//!
//! Fast, non-persistent storage for development and testing.
//! All data is lost when the process exits.

use async_trait::async_trait;
use blobq_types::{BackendKind, Error, Result, StorageKey};
use bytes::Bytes;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{debug, info};

use crate::traits::BlobStore;

/// In-memory blob store
pub struct MemoryBackend {
    blobs: DashMap<StorageKey, Bytes>,
}

impl MemoryBackend {
    /// Create a new in-memory backend
    pub fn new() -> Self {
        info!("Initializing in-memory blob storage");
        Self {
            blobs: DashMap::new(),
        }
    }

    /// Number of blobs currently stored
    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BlobStore for MemoryBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Memory
    }

    async fn create(&self, key: &StorageKey, content: &[u8]) -> Result<()> {
        match self.blobs.entry(key.clone()) {
            Entry::Occupied(_) => Err(Error::AlreadyExists(key.to_string())),
            Entry::Vacant(slot) => {
                slot.insert(Bytes::copy_from_slice(content));
                debug!(storage_key = %key, bytes = content.len(), "Blob created");
                Ok(())
            }
        }
    }

    async fn read(&self, key: &StorageKey) -> Result<Bytes> {
        self.blobs
            .get(key)
            .map(|blob| blob.value().clone())
            .ok_or_else(|| Error::NotFound(key.to_string()))
    }

    async fn update(&self, key: &StorageKey, content: &[u8]) -> Result<()> {
        match self.blobs.get_mut(key) {
            Some(mut blob) => {
                *blob = Bytes::copy_from_slice(content);
                Ok(())
            }
            None => Err(Error::NotFound(key.to_string())),
        }
    }

    async fn delete(&self, key: &StorageKey) -> Result<()> {
        match self.blobs.remove(key) {
            Some(_) => {
                debug!(storage_key = %key, "Blob deleted");
                Ok(())
            }
            None => Err(Error::NotFound(key.to_string())),
        }
    }

    async fn exists(&self, key: &StorageKey) -> Result<bool> {
        Ok(self.blobs.contains_key(key))
    }
}
