//! Black-box contract shared by every blob backend
//!
//! The queue relies on each backend behaving identically for the four
//! content operations, so the same checks run against all of them.

use blobq_storage::{BlobStore, LocalBackend, MemoryBackend};
use blobq_types::{Error, StorageKey};
use bytes::Bytes;
use tempfile::TempDir;

async fn check_contract(store: &dyn BlobStore) {
    let key = StorageKey::generate("contract").unwrap();

    // Absent key
    assert!(!store.exists(&key).await.unwrap());
    assert!(matches!(store.read(&key).await, Err(Error::NotFound(_))));
    assert!(matches!(
        store.update(&key, b"x").await,
        Err(Error::NotFound(_))
    ));
    assert!(matches!(store.delete(&key).await, Err(Error::NotFound(_))));

    // Create then read
    store.create(&key, "héllo wörld".as_bytes()).await.unwrap();
    assert!(store.exists(&key).await.unwrap());
    assert_eq!(
        store.read(&key).await.unwrap(),
        Bytes::from("héllo wörld")
    );

    // Occupied key is never overwritten by create
    assert!(matches!(
        store.create(&key, b"other").await,
        Err(Error::AlreadyExists(_))
    ));
    assert_eq!(
        store.read(&key).await.unwrap(),
        Bytes::from("héllo wörld")
    );

    // Update replaces
    store.update(&key, b"updated").await.unwrap();
    assert_eq!(store.read(&key).await.unwrap(), Bytes::from("updated"));

    // Delete removes, second delete reports NotFound
    store.delete(&key).await.unwrap();
    assert!(!store.exists(&key).await.unwrap());
    assert!(matches!(store.delete(&key).await, Err(Error::NotFound(_))));

    // A deleted key may be created again
    store.create(&key, b"again").await.unwrap();
    assert_eq!(store.read(&key).await.unwrap(), Bytes::from("again"));
    store.delete(&key).await.unwrap();
}

#[tokio::test]
async fn test_memory_backend_contract() {
    let store = MemoryBackend::new();
    check_contract(&store).await;
    assert!(store.is_empty());
}

#[tokio::test]
async fn test_local_backend_contract() {
    let temp = TempDir::new().unwrap();
    let store = LocalBackend::new(temp.path()).await.unwrap();
    check_contract(&store).await;
}

#[tokio::test]
async fn test_local_persistence() {
    let temp = TempDir::new().unwrap();
    let key = StorageKey::generate("default").unwrap();

    // Write with one instance
    {
        let store = LocalBackend::new(temp.path()).await.unwrap();
        store.create(&key, b"Persistent data").await.unwrap();
    }

    // Read with new instance
    {
        let store = LocalBackend::new(temp.path()).await.unwrap();
        let retrieved = store.read(&key).await.unwrap();
        assert_eq!(retrieved, Bytes::from("Persistent data"));
    }
}

#[tokio::test]
async fn test_local_concurrent_create_same_key() {
    let temp = TempDir::new().unwrap();
    let store = std::sync::Arc::new(LocalBackend::new(temp.path()).await.unwrap());
    let key = StorageKey::generate("race").unwrap();

    let mut handles = Vec::new();
    for i in 0..8 {
        let store = store.clone();
        let key = key.clone();
        handles.push(tokio::spawn(async move {
            store.create(&key, format!("writer {i}").as_bytes()).await
        }));
    }

    let mut created = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(()) => created += 1,
            Err(Error::AlreadyExists(_)) => {}
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    assert_eq!(created, 1);
}
