//! MessageQueue - FIFO queue over a metadata store and a blob store
//!
//! The queue is the only component that touches both halves, so it owns the
//! pairing invariant: a record exists exactly as long as its blob does.
//!
//! Enqueue writes the blob first and deletes it again if the record cannot
//! be committed. Dequeue claims the oldest record atomically, reads the blob,
//! deletes the blob and only then deletes the record. Every step that fails
//! either undoes what came before it or leaves the record claimed so that
//! [`MessageQueue::repair`] can finish the job later.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use blobq_storage::BlobStore;
use blobq_types::{
    message::validate_namespace, BackendKind, ClaimToken, Error, MessageId, MessageState,
    QueueSettings, QueueStats, RepairReport, Result, StorageKey,
};
use chrono::Utc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::metadata::MetadataStore;

/// Error text returned when enqueue receives no content
pub const NO_CONTENT: &str = "No message content provided";

/// Single-consumer message queue
#[derive(Clone)]
pub struct MessageQueue {
    inner: Arc<Inner>,
}

struct Inner {
    blobs: Arc<dyn BlobStore>,
    metadata: Arc<dyn MetadataStore>,
    settings: QueueSettings,
}

/// Run an operation body on its own task.
///
/// Dropping the caller's future then no longer stops the body between two
/// steps, which is what would otherwise leave a blob without its record.
async fn detached<T, F>(body: F) -> Result<T>
where
    T: Send + 'static,
    F: Future<Output = Result<T>> + Send + 'static,
{
    tokio::spawn(body)
        .await
        .map_err(|e| Error::Internal(format!("queue task failed: {e}")))?
}

impl MessageQueue {
    /// Create a queue over the given stores
    pub fn new(
        blobs: Arc<dyn BlobStore>,
        metadata: Arc<dyn MetadataStore>,
        settings: QueueSettings,
    ) -> Result<Self> {
        validate_namespace(&settings.key_namespace)?;
        if settings.max_key_attempts == 0 {
            return Err(Error::InvalidInput(
                "max_key_attempts must be at least 1".to_string(),
            ));
        }

        info!(
            backend = %blobs.kind(),
            namespace = %settings.key_namespace,
            "Initializing message queue"
        );
        Ok(Self {
            inner: Arc::new(Inner {
                blobs,
                metadata,
                settings,
            }),
        })
    }

    pub fn backend_kind(&self) -> BackendKind {
        self.inner.blobs.kind()
    }

    pub fn settings(&self) -> &QueueSettings {
        &self.inner.settings
    }

    // ==================== Message Operations ====================

    /// Store `content` and append it to the queue
    pub async fn enqueue(&self, content: &str) -> Result<MessageId> {
        if content.is_empty() {
            return Err(Error::InvalidInput(NO_CONTENT.to_string()));
        }

        let inner = Arc::clone(&self.inner);
        let content = content.to_owned();
        detached(async move { inner.enqueue(&content).await }).await
    }

    /// Remove the oldest message and return it.
    ///
    /// Fails with `Empty` when nothing is available; never waits.
    pub async fn dequeue_next(&self) -> Result<(MessageId, String)> {
        let inner = Arc::clone(&self.inner);
        detached(async move { inner.dequeue_next().await }).await
    }

    /// Count available and claimed messages
    pub async fn stats(&self) -> Result<QueueStats> {
        self.inner.metadata.stats().await
    }

    // ==================== Maintenance ====================

    /// Settle claims older than the claim timeout.
    ///
    /// A claim is only this old if its dequeue was interrupted. If the blob
    /// is still there, the content was never handed out and the record goes
    /// back to the queue; if the blob is gone, the record is deleted.
    pub async fn repair(&self) -> Result<RepairReport> {
        let inner = Arc::clone(&self.inner);
        detached(async move { inner.repair().await }).await
    }

    /// Start background repair on a fixed interval
    pub fn start_maintenance(&self, period: Duration) -> JoinHandle<()> {
        let queue = self.clone();

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);

            loop {
                interval.tick().await;
                match queue.repair().await {
                    Ok(report) if report.is_clean() => {}
                    Ok(report) => info!(
                        released = report.released,
                        removed = report.removed,
                        failed = report.failed,
                        "Repaired abandoned claims"
                    ),
                    Err(e) => error!(error = %e, "Failed to repair abandoned claims"),
                }
            }
        });

        info!(period_secs = period.as_secs(), "Background maintenance started");
        handle
    }
}

impl Inner {
    async fn enqueue(&self, content: &str) -> Result<MessageId> {
        let key = self.write_blob(content.as_bytes()).await?;

        let inserted = match self.metadata.insert(&key, content.len() as u64).await {
            // A record already points at a key whose blob we just created
            Err(Error::AlreadyExists(_)) => Err(Error::Internal(format!(
                "storage key {key} already has a metadata record"
            ))),
            other => other,
        };

        match inserted {
            Ok(id) => {
                debug!(message_id = %id, storage_key = %key, "Message enqueued");
                Ok(id)
            }
            Err(insert_err) => {
                warn!(
                    storage_key = %key,
                    error = %insert_err,
                    "Metadata insert failed, deleting blob"
                );
                match self.blobs.delete(&key).await {
                    Ok(()) | Err(Error::NotFound(_)) => Err(insert_err),
                    Err(delete_err) => {
                        error!(
                            storage_key = %key,
                            insert_error = %insert_err,
                            delete_error = %delete_err,
                            "Orphaned blob left behind"
                        );
                        Err(Error::inconsistent(
                            key.as_str(),
                            format!(
                                "metadata insert failed ({insert_err}) and blob cleanup failed ({delete_err})"
                            ),
                        ))
                    }
                }
            }
        }
    }

    /// Create the blob under a fresh key, retrying on collisions
    async fn write_blob(&self, content: &[u8]) -> Result<StorageKey> {
        let attempts = self.settings.max_key_attempts;

        for attempt in 1..=attempts {
            let key = StorageKey::generate(&self.settings.key_namespace)?;
            match self.blobs.create(&key, content).await {
                Ok(()) => return Ok(key),
                Err(Error::AlreadyExists(_)) => {
                    warn!(storage_key = %key, attempt, "Storage key collision, regenerating");
                }
                Err(e) => return Err(e),
            }
        }

        Err(Error::Internal(format!(
            "no free storage key after {attempts} attempts"
        )))
    }

    async fn dequeue_next(&self) -> Result<(MessageId, String)> {
        let token = ClaimToken::new();
        let message = self.metadata.claim_next(token).await?.ok_or(Error::Empty)?;
        let id = message.id;
        let key = &message.storage_key;
        debug!(message_id = %id, storage_key = %key, "Message claimed");

        let content = match self.blobs.read(key).await {
            Ok(content) => content,
            Err(Error::NotFound(_)) => {
                error!(message_id = %id, storage_key = %key, "Record has no blob");
                return Err(Error::inconsistent(
                    key.as_str(),
                    format!("blob missing for message {id}, left claimed for repair"),
                ));
            }
            Err(e) => {
                if let Err(release_err) = self.metadata.release(id, token).await {
                    warn!(
                        message_id = %id,
                        error = %release_err,
                        "Could not release claim, repair will return it"
                    );
                }
                return Err(e);
            }
        };

        if content.len() as u64 != message.content_length {
            warn!(
                message_id = %id,
                expected = message.content_length,
                actual = content.len(),
                "Content length differs from record"
            );
        }

        // Repair may have handed the record to another consumer while we
        // were reading; confirm the claim is still ours before deleting
        match self.metadata.renew(id, token).await {
            Ok(()) => {}
            Err(Error::NotFound(_)) => {
                warn!(message_id = %id, "Claim lost before blob delete");
                return Err(Error::inconsistent(
                    key.as_str(),
                    format!("claim on message {id} was repaired away, content not delivered"),
                ));
            }
            Err(e) => {
                if let Err(release_err) = self.metadata.release(id, token).await {
                    warn!(
                        message_id = %id,
                        error = %release_err,
                        "Could not release claim, repair will return it"
                    );
                }
                return Err(e);
            }
        }

        match self.blobs.delete(key).await {
            Ok(()) => {}
            Err(Error::NotFound(_)) => {
                // Another consumer deleted it after our claim was repaired away
                warn!(message_id = %id, storage_key = %key, "Claim lost to another consumer");
                return Err(Error::inconsistent(
                    key.as_str(),
                    format!("blob of message {id} deleted by another consumer"),
                ));
            }
            Err(e) => {
                error!(message_id = %id, storage_key = %key, error = %e, "Blob delete failed");
                return Err(Error::inconsistent(
                    key.as_str(),
                    format!("blob delete failed ({e}), message {id} left claimed for repair"),
                ));
            }
        }

        // Only the consumer whose remove succeeds may hand the content out
        match self.metadata.remove(id, token).await {
            Ok(()) => {}
            Err(Error::NotFound(_)) => {
                warn!(message_id = %id, "Record settled by another party after blob delete");
                return Err(Error::inconsistent(
                    key.as_str(),
                    format!("claim on message {id} was lost after blob delete"),
                ));
            }
            Err(remove_err) => {
                return Err(self.restore_blob(id, token, key, &content, remove_err).await);
            }
        }

        debug!(message_id = %id, bytes = content.len(), "Message dequeued");
        Ok((id, String::from_utf8_lossy(&content).into_owned()))
    }

    /// Put the blob back after the record could not be deleted, so the
    /// message is redelivered instead of lost
    async fn restore_blob(
        &self,
        id: MessageId,
        token: ClaimToken,
        key: &StorageKey,
        content: &[u8],
        cause: Error,
    ) -> Error {
        warn!(message_id = %id, error = %cause, "Record delete failed, restoring blob");

        if let Err(restore_err) = self.blobs.create(key, content).await {
            error!(
                message_id = %id,
                storage_key = %key,
                remove_error = %cause,
                restore_error = %restore_err,
                "Record left without blob"
            );
            return Error::inconsistent(
                key.as_str(),
                format!("record delete failed ({cause}) and blob restore failed ({restore_err})"),
            );
        }

        if let Err(release_err) = self.metadata.release(id, token).await {
            debug!(
                message_id = %id,
                error = %release_err,
                "Claim stays until repair"
            );
        }
        cause
    }

    async fn repair(&self) -> Result<RepairReport> {
        let timeout = chrono::Duration::from_std(self.settings.claim_timeout())
            .map_err(|e| Error::InvalidInput(format!("claim timeout out of range: {e}")))?;
        let stale = self.metadata.stale_claims(Utc::now() - timeout).await?;

        let mut report = RepairReport::default();
        for message in stale {
            let message = match message {
                Ok(message) => message,
                Err(e) => {
                    warn!(error = %e, "Skipping unreadable claim during repair");
                    report.failed += 1;
                    continue;
                }
            };
            let MessageState::Claimed { token, claimed_at } = message.state else {
                continue;
            };
            let id = message.id;
            let key = &message.storage_key;

            let blob_present = match self.blobs.exists(key).await {
                Ok(present) => present,
                Err(e) => {
                    warn!(message_id = %id, error = %e, "Cannot check blob during repair");
                    report.failed += 1;
                    continue;
                }
            };

            let settled = if blob_present {
                self.metadata.release(id, token).await
            } else {
                self.metadata.remove(id, token).await
            };

            match settled {
                Ok(()) if blob_present => {
                    info!(message_id = %id, %claimed_at, "Abandoned claim released");
                    report.released += 1;
                }
                Ok(()) => {
                    info!(message_id = %id, %claimed_at, "Record without blob removed");
                    report.removed += 1;
                }
                // The original dequeue finished in the meantime
                Err(Error::NotFound(_)) => {}
                Err(e) => {
                    warn!(message_id = %id, error = %e, "Repair failed");
                    report.failed += 1;
                }
            }
        }

        Ok(report)
    }
}
