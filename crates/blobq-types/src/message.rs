//! Message types for blobq
//!
//! Defines the metadata record, its identifiers and the storage key that
//! pairs a record with its blob.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::{Error, Result};

/// Longest key any backend accepts
const MAX_KEY_LEN: usize = 200;

/// Unique, monotonically assigned identifier for a message.
///
/// Ids are handed out by the metadata store and never reused, so ordering
/// by id is ordering by commit.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema,
)]
#[serde(transparent)]
pub struct MessageId(pub i64);

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque handle of a blob inside a storage backend.
///
/// Generated keys have the form `{namespace}-{32 hex digits}`, the hex part
/// being a random UUIDv4 (122 random bits). For `n` keys in one namespace
/// the chance of any collision is roughly `n² / 2^123`; backends report a
/// collision as `AlreadyExists` and the queue retries with a fresh key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct StorageKey(String);

impl StorageKey {
    /// Wrap an existing key, rejecting anything a backend could not map to a
    /// single flat file or object name
    pub fn new(key: impl Into<String>) -> Result<Self> {
        let key = key.into();
        if key.is_empty() || key.len() > MAX_KEY_LEN {
            return Err(Error::InvalidInput(format!(
                "storage key must be 1..={MAX_KEY_LEN} bytes"
            )));
        }
        if key == "." || key == ".." || key.starts_with('.') {
            return Err(Error::InvalidInput(format!("invalid storage key: {key}")));
        }
        if key
            .chars()
            .any(|c| c == '/' || c == '\\' || c == '\0' || c.is_control())
        {
            return Err(Error::InvalidInput(format!("invalid storage key: {key}")));
        }
        Ok(Self(key))
    }

    /// Generate a fresh random key inside `namespace`
    pub fn generate(namespace: &str) -> Result<Self> {
        validate_namespace(namespace)?;
        Ok(Self(format!("{}-{}", namespace, Uuid::new_v4().simple())))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for StorageKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for StorageKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for StorageKey {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<StorageKey> for String {
    fn from(key: StorageKey) -> Self {
        key.0
    }
}

/// Check a key namespace: non-empty ASCII alphanumerics and underscores
pub fn validate_namespace(namespace: &str) -> Result<()> {
    if namespace.is_empty()
        || namespace.len() > 64
        || !namespace
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        return Err(Error::InvalidInput(format!(
            "invalid key namespace: {namespace:?}"
        )));
    }
    Ok(())
}

/// Ownership token for one dequeue attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClaimToken(pub Uuid);

impl ClaimToken {
    /// Create a new random ClaimToken
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ClaimToken {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ClaimToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of a message record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum MessageState {
    /// Waiting to be dequeued
    Available,
    /// Owned by exactly one in-flight dequeue
    Claimed {
        token: ClaimToken,
        claimed_at: DateTime<Utc>,
    },
}

impl MessageState {
    pub fn is_claimed(&self) -> bool {
        matches!(self, Self::Claimed { .. })
    }
}

/// A message metadata record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Ordering key
    pub id: MessageId,

    /// Handle of the paired blob
    pub storage_key: StorageKey,

    /// Byte length of the content, checked on dequeue
    pub content_length: u64,

    /// Current state
    #[serde(flatten)]
    pub state: MessageState,

    /// When the record was committed
    pub created_at: DateTime<Utc>,
}
