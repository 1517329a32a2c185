//! Local filesystem blob backend

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use blobq_types::{BackendKind, Error, Result, StorageKey};
use bytes::Bytes;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::traits::{BlobStore, CONTENT_EXTENSION};

/// Local filesystem storage
///
/// Stores each blob as a file named by its key in one flat directory.
/// Structure: `{root}/{key}.txt`
pub struct LocalBackend {
    root: PathBuf,
}

impl LocalBackend {
    /// Create storage at the given root directory
    ///
    /// Creates the directory if it doesn't exist.
    pub async fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).await.map_err(|e| {
            Error::Unavailable(format!(
                "cannot create storage root {}: {e}",
                root.display()
            ))
        })?;
        info!(root = %root.display(), "Initializing local blob storage");
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn blob_path(&self, key: &StorageKey) -> PathBuf {
        self.root.join(format!("{key}.{CONTENT_EXTENSION}"))
    }

    // Keys never start with '.', so scratch files cannot shadow a blob.
    fn scratch_path(&self, key: &StorageKey) -> PathBuf {
        self.root.join(format!(".{key}.{}.tmp", Uuid::new_v4().simple()))
    }
}

fn map_io(err: std::io::Error, key: &StorageKey) -> Error {
    match err.kind() {
        ErrorKind::NotFound => Error::NotFound(key.to_string()),
        ErrorKind::AlreadyExists => Error::AlreadyExists(key.to_string()),
        _ => Error::Unavailable(format!("local storage I/O on {key}: {err}")),
    }
}

async fn write_synced(file: &mut fs::File, content: &[u8]) -> std::io::Result<()> {
    file.write_all(content).await?;
    file.sync_all().await
}

async fn write_and_rename(scratch: &Path, target: &Path, content: &[u8]) -> std::io::Result<()> {
    let mut file = fs::File::create(scratch).await?;
    write_synced(&mut file, content).await?;
    fs::rename(scratch, target).await
}

#[async_trait]
impl BlobStore for LocalBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Local
    }

    async fn create(&self, key: &StorageKey, content: &[u8]) -> Result<()> {
        let path = self.blob_path(key);
        let mut file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
            .map_err(|e| match e.kind() {
                // A missing parent means the root vanished, not that the key is absent
                ErrorKind::NotFound => Error::Unavailable(format!(
                    "storage root {} is missing",
                    self.root.display()
                )),
                _ => map_io(e, key),
            })?;

        if let Err(e) = write_synced(&mut file, content).await {
            drop(file);
            if let Err(cleanup) = fs::remove_file(&path).await {
                warn!(
                    storage_key = %key,
                    error = %cleanup,
                    "Failed to remove partially written blob"
                );
            }
            return Err(map_io(e, key));
        }

        debug!(storage_key = %key, bytes = content.len(), "Blob created");
        Ok(())
    }

    async fn read(&self, key: &StorageKey) -> Result<Bytes> {
        let data = fs::read(self.blob_path(key))
            .await
            .map_err(|e| map_io(e, key))?;
        Ok(Bytes::from(data))
    }

    async fn update(&self, key: &StorageKey, content: &[u8]) -> Result<()> {
        let path = self.blob_path(key);
        fs::metadata(&path).await.map_err(|e| map_io(e, key))?;

        // Write aside and rename so readers never observe a half-written blob
        let scratch = self.scratch_path(key);
        if let Err(e) = write_and_rename(&scratch, &path, content).await {
            if let Err(cleanup) = fs::remove_file(&scratch).await {
                if cleanup.kind() != ErrorKind::NotFound {
                    warn!(
                        storage_key = %key,
                        error = %cleanup,
                        "Failed to remove scratch file"
                    );
                }
            }
            return Err(map_io(e, key));
        }

        debug!(storage_key = %key, bytes = content.len(), "Blob updated");
        Ok(())
    }

    async fn delete(&self, key: &StorageKey) -> Result<()> {
        fs::remove_file(self.blob_path(key))
            .await
            .map_err(|e| map_io(e, key))?;
        debug!(storage_key = %key, "Blob deleted");
        Ok(())
    }

    async fn exists(&self, key: &StorageKey) -> Result<bool> {
        fs::try_exists(self.blob_path(key))
            .await
            .map_err(|e| map_io(e, key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn key(s: &str) -> StorageKey {
        StorageKey::new(s).unwrap()
    }

    #[tokio::test]
    async fn test_root_created_idempotently() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("nested").join("messages");

        LocalBackend::new(&root).await.unwrap();
        LocalBackend::new(&root).await.unwrap();

        assert!(root.is_dir());
    }

    #[tokio::test]
    async fn test_blob_file_layout() {
        let temp = TempDir::new().unwrap();
        let store = LocalBackend::new(temp.path()).await.unwrap();

        store.create(&key("default-abc"), b"hello").await.unwrap();

        let on_disk = std::fs::read_to_string(temp.path().join("default-abc.txt")).unwrap();
        assert_eq!(on_disk, "hello");
    }

    #[tokio::test]
    async fn test_update_leaves_no_scratch_files() {
        let temp = TempDir::new().unwrap();
        let store = LocalBackend::new(temp.path()).await.unwrap();

        store.create(&key("k"), b"v1").await.unwrap();
        store.update(&key("k"), b"v2").await.unwrap();

        let names: Vec<_> = std::fs::read_dir(temp.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(names, vec!["k.txt".to_string()]);
        assert_eq!(store.read(&key("k")).await.unwrap(), Bytes::from("v2"));
    }

    #[tokio::test]
    async fn test_create_after_root_removed_is_unavailable() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("gone");
        let store = LocalBackend::new(&root).await.unwrap();
        std::fs::remove_dir(&root).unwrap();

        let result = store.create(&key("k"), b"v").await;
        assert!(matches!(result, Err(Error::Unavailable(_))));
    }
}
