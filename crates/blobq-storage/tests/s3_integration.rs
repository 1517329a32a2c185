//! S3/MinIO integration tests
//!
//! Run with: cargo test -p blobq-storage --features s3-tests
//! Requires an S3-compatible endpoint, e.g. MinIO on localhost:9000, with
//! credentials exported as AWS_ACCESS_KEY_ID / AWS_SECRET_ACCESS_KEY.

#![cfg(feature = "s3-tests")]

use blobq_storage::{BlobStore, RemoteObjectBackend};
use blobq_types::{Error, StorageKey};
use bytes::Bytes;

async fn setup() -> RemoteObjectBackend {
    let endpoint =
        std::env::var("BLOBQ_TEST_S3_ENDPOINT").unwrap_or_else(|_| "http://localhost:9000".into());
    let storage = RemoteObjectBackend::from_env(
        "blobq-test",
        "it/",
        Some(endpoint),
        Some("us-east-1".into()),
    )
    .await;
    storage.ensure_bucket().await.unwrap();
    storage
}

#[tokio::test]
async fn test_s3_roundtrip() {
    let storage = setup().await;
    let key = StorageKey::generate("it").unwrap();

    storage.create(&key, b"S3 storage test").await.unwrap();
    let retrieved = storage.read(&key).await.unwrap();
    assert_eq!(retrieved, Bytes::from("S3 storage test"));

    // Cleanup
    storage.delete(&key).await.unwrap();
}

#[tokio::test]
async fn test_s3_create_is_conditional() {
    let storage = setup().await;
    let key = StorageKey::generate("it").unwrap();

    storage.create(&key, b"first").await.unwrap();
    let result = storage.create(&key, b"second").await;
    assert!(matches!(result, Err(Error::AlreadyExists(_))));

    storage.delete(&key).await.unwrap();
}

#[tokio::test]
async fn test_s3_missing_object() {
    let storage = setup().await;
    let key = StorageKey::generate("it").unwrap();

    assert!(!storage.exists(&key).await.unwrap());
    assert!(matches!(storage.read(&key).await, Err(Error::NotFound(_))));
    assert!(matches!(
        storage.update(&key, b"x").await,
        Err(Error::NotFound(_))
    ));
    assert!(matches!(storage.delete(&key).await, Err(Error::NotFound(_))));
}
