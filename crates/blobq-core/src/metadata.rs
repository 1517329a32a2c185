//! Message metadata store
//!
//! The relational half of the queue: ordered records that point at blobs.
//! The claim transition lives here because it has to be atomic with respect
//! to every other dequeue.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use blobq_types::{
    ClaimToken, Error, Message, MessageId, MessageState, QueueStats, Result, StorageKey,
};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use tracing::info;
use uuid::Uuid;

pub const SCHEMA_VERSION: u32 = 1;

const STATE_AVAILABLE: &str = "available";
const STATE_CLAIMED: &str = "claimed";

/// Metadata store trait - the queue's source of truth for ordering
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Commit a new available record and return its id
    async fn insert(&self, key: &StorageKey, content_length: u64) -> Result<MessageId>;

    /// Atomically claim the available record with the smallest id
    async fn claim_next(&self, token: ClaimToken) -> Result<Option<Message>>;

    /// Return a claimed record to the queue; `NotFound` unless `token` holds it
    async fn release(&self, id: MessageId, token: ClaimToken) -> Result<()>;

    /// Refresh the claim time; `NotFound` unless `token` holds it
    async fn renew(&self, id: MessageId, token: ClaimToken) -> Result<()>;

    /// Delete a claimed record; `NotFound` unless `token` holds it
    async fn remove(&self, id: MessageId, token: ClaimToken) -> Result<()>;

    /// Claimed records whose claim is at least as old as `cutoff`, oldest first.
    ///
    /// A row that cannot be decoded is returned as an `Err` in its slot so
    /// the remaining claims can still be settled.
    async fn stale_claims(&self, cutoff: DateTime<Utc>) -> Result<Vec<Result<Message>>>;

    /// Count records per state
    async fn stats(&self) -> Result<QueueStats>;
}

/// SQLite-backed metadata store
pub struct SqliteMetadataStore {
    conn: Mutex<Connection>,
}

impl SqliteMetadataStore {
    /// Open or create a database at the given path
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                Error::Unavailable(format!("cannot create {}: {e}", parent.display()))
            })?;
        }

        let conn = Connection::open(path).map_err(db_error)?;
        // Other processes may share the file
        conn.busy_timeout(Duration::from_secs(5)).map_err(db_error)?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| {
            row.get::<_, String>(0)
        })
        .map_err(db_error)?;

        init_schema(&conn)?;
        info!(path = %path.display(), "Opened SQLite metadata store");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory database (for testing)
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(db_error)?;
        init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

/// Initialize the database schema
pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY
        );

        -- AUTOINCREMENT: ids are never reused, even after the newest row is deleted
        CREATE TABLE IF NOT EXISTS messages (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            storage_key TEXT NOT NULL UNIQUE,
            content_length INTEGER NOT NULL,
            state TEXT NOT NULL DEFAULT 'available'
                CHECK (state IN ('available', 'claimed')),
            claim_token TEXT,
            claimed_at INTEGER,                    -- Unix millis
            created_at INTEGER NOT NULL            -- Unix millis
        );

        CREATE INDEX IF NOT EXISTS idx_messages_state_id
            ON messages(state, id);
    "#,
    )
    .map_err(db_error)?;

    conn.execute(
        "INSERT OR REPLACE INTO schema_version (version) VALUES (?)",
        [SCHEMA_VERSION],
    )
    .map_err(db_error)?;

    Ok(())
}

fn db_error(err: rusqlite::Error) -> Error {
    Error::Unavailable(format!("metadata store: {err}"))
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(err, rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation)
}

fn timestamp(millis: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(millis)
        .ok_or_else(|| Error::Internal(format!("timestamp out of range: {millis}")))
}

/// Columns as stored, before validation
struct RawRow {
    id: i64,
    storage_key: String,
    content_length: i64,
    claim_token: Option<String>,
    claimed_at: Option<i64>,
    created_at: i64,
}

impl RawRow {
    const COLUMNS: &'static str =
        "id, storage_key, content_length, claim_token, claimed_at, created_at";

    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            storage_key: row.get(1)?,
            content_length: row.get(2)?,
            claim_token: row.get(3)?,
            claimed_at: row.get(4)?,
            created_at: row.get(5)?,
        })
    }

    fn into_message(self) -> Result<Message> {
        let state = match (self.claim_token, self.claimed_at) {
            (Some(token), Some(at)) => MessageState::Claimed {
                token: ClaimToken(Uuid::parse_str(&token).map_err(|e| {
                    Error::Internal(format!("corrupt claim token on message {}: {e}", self.id))
                })?),
                claimed_at: timestamp(at)?,
            },
            _ => MessageState::Available,
        };

        Ok(Message {
            id: MessageId(self.id),
            storage_key: StorageKey::new(self.storage_key).map_err(|e| {
                Error::Internal(format!("corrupt storage key on message {}: {e}", self.id))
            })?,
            content_length: u64::try_from(self.content_length).unwrap_or_default(),
            state,
            created_at: timestamp(self.created_at)?,
        })
    }
}

#[async_trait]
impl MetadataStore for SqliteMetadataStore {
    async fn insert(&self, key: &StorageKey, content_length: u64) -> Result<MessageId> {
        let conn = self.conn.lock();
        let length = i64::try_from(content_length)
            .map_err(|_| Error::InvalidInput("content too large".to_string()))?;

        conn.execute(
            "INSERT INTO messages (storage_key, content_length, created_at) VALUES (?1, ?2, ?3)",
            params![key.as_str(), length, Utc::now().timestamp_millis()],
        )
        .map_err(|e| {
            if is_unique_violation(&e) {
                Error::AlreadyExists(key.to_string())
            } else {
                db_error(e)
            }
        })?;

        Ok(MessageId(conn.last_insert_rowid()))
    }

    async fn claim_next(&self, token: ClaimToken) -> Result<Option<Message>> {
        let conn = self.conn.lock();
        // One statement: selecting the head and marking it claimed cannot interleave
        let sql = format!(
            "UPDATE messages
                SET state = '{STATE_CLAIMED}', claim_token = ?1, claimed_at = ?2
              WHERE id = (SELECT MIN(id) FROM messages WHERE state = '{STATE_AVAILABLE}')
          RETURNING {}",
            RawRow::COLUMNS
        );

        let raw = conn
            .query_row(
                &sql,
                params![token.to_string(), Utc::now().timestamp_millis()],
                RawRow::from_row,
            )
            .optional()
            .map_err(db_error)?;

        raw.map(RawRow::into_message).transpose()
    }

    async fn release(&self, id: MessageId, token: ClaimToken) -> Result<()> {
        let conn = self.conn.lock();
        let updated = conn
            .execute(
                &format!(
                    "UPDATE messages
                        SET state = '{STATE_AVAILABLE}', claim_token = NULL, claimed_at = NULL
                      WHERE id = ?1 AND claim_token = ?2"
                ),
                params![id.0, token.to_string()],
            )
            .map_err(db_error)?;

        if updated == 0 {
            return Err(Error::NotFound(format!("claim {token} on message {id}")));
        }
        Ok(())
    }

    async fn renew(&self, id: MessageId, token: ClaimToken) -> Result<()> {
        let conn = self.conn.lock();
        let updated = conn
            .execute(
                "UPDATE messages SET claimed_at = ?3 WHERE id = ?1 AND claim_token = ?2",
                params![id.0, token.to_string(), Utc::now().timestamp_millis()],
            )
            .map_err(db_error)?;

        if updated == 0 {
            return Err(Error::NotFound(format!("claim {token} on message {id}")));
        }
        Ok(())
    }

    async fn remove(&self, id: MessageId, token: ClaimToken) -> Result<()> {
        let conn = self.conn.lock();
        let deleted = conn
            .execute(
                "DELETE FROM messages WHERE id = ?1 AND claim_token = ?2",
                params![id.0, token.to_string()],
            )
            .map_err(db_error)?;

        if deleted == 0 {
            return Err(Error::NotFound(format!("claim {token} on message {id}")));
        }
        Ok(())
    }

    async fn stale_claims(&self, cutoff: DateTime<Utc>) -> Result<Vec<Result<Message>>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM messages
                  WHERE state = '{STATE_CLAIMED}' AND claimed_at <= ?1
                  ORDER BY id",
                RawRow::COLUMNS
            ))
            .map_err(db_error)?;

        let rows = stmt
            .query_map([cutoff.timestamp_millis()], RawRow::from_row)
            .map_err(db_error)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(db_error)?;

        Ok(rows.into_iter().map(RawRow::into_message).collect())
    }

    async fn stats(&self) -> Result<QueueStats> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare("SELECT state, COUNT(*) FROM messages GROUP BY state")
            .map_err(db_error)?;

        let counts = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))
            .map_err(db_error)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(db_error)?;

        let mut stats = QueueStats::default();
        for (state, count) in counts {
            let count = u64::try_from(count).unwrap_or_default();
            match state.as_str() {
                STATE_AVAILABLE => stats.available = count,
                STATE_CLAIMED => stats.claimed = count,
                _ => {}
            }
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(s: &str) -> StorageKey {
        StorageKey::new(s).unwrap()
    }

    fn check_version(conn: &Connection) -> u32 {
        conn.query_row("SELECT version FROM schema_version LIMIT 1", [], |row| {
            row.get(0)
        })
        .unwrap()
    }

    #[test]
    fn test_init_schema_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        init_schema(&conn).unwrap();

        assert_eq!(check_version(&conn), SCHEMA_VERSION);
    }

    #[tokio::test]
    async fn test_ids_are_monotonic_and_never_reused() {
        let store = SqliteMetadataStore::in_memory().unwrap();

        let first = store.insert(&key("a"), 1).await.unwrap();
        let second = store.insert(&key("b"), 1).await.unwrap();
        assert!(second > first);

        // Remove the newest record; the next id must still grow
        let token = ClaimToken::new();
        store.claim_next(token).await.unwrap().unwrap();
        store.remove(first, token).await.unwrap();
        let token = ClaimToken::new();
        store.claim_next(token).await.unwrap().unwrap();
        store.remove(second, token).await.unwrap();

        let third = store.insert(&key("c"), 1).await.unwrap();
        assert!(third > second);
    }

    #[tokio::test]
    async fn test_duplicate_key_rejected() {
        let store = SqliteMetadataStore::in_memory().unwrap();
        store.insert(&key("dup"), 3).await.unwrap();

        let result = store.insert(&key("dup"), 3).await;
        assert!(matches!(result, Err(Error::AlreadyExists(_))));
    }

    #[tokio::test]
    async fn test_claim_in_id_order() {
        let store = SqliteMetadataStore::in_memory().unwrap();
        let a = store.insert(&key("a"), 1).await.unwrap();
        let b = store.insert(&key("b"), 1).await.unwrap();

        let first = store.claim_next(ClaimToken::new()).await.unwrap().unwrap();
        let second = store.claim_next(ClaimToken::new()).await.unwrap().unwrap();

        assert_eq!(first.id, a);
        assert_eq!(first.storage_key, key("a"));
        assert!(first.state.is_claimed());
        assert_eq!(second.id, b);
        assert!(store.claim_next(ClaimToken::new()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_only_claim_holder_can_remove_or_release() {
        let store = SqliteMetadataStore::in_memory().unwrap();
        let id = store.insert(&key("a"), 1).await.unwrap();
        let token = ClaimToken::new();
        store.claim_next(token).await.unwrap().unwrap();

        let stranger = ClaimToken::new();
        assert!(matches!(
            store.remove(id, stranger).await,
            Err(Error::NotFound(_))
        ));
        assert!(matches!(
            store.release(id, stranger).await,
            Err(Error::NotFound(_))
        ));

        store.release(id, token).await.unwrap();
        let stats = store.stats().await.unwrap();
        assert_eq!(stats, QueueStats { available: 1, claimed: 0 });

        // A released record can be claimed again by someone else
        let again = store.claim_next(stranger).await.unwrap().unwrap();
        assert_eq!(again.id, id);
        store.remove(id, stranger).await.unwrap();
        assert_eq!(store.stats().await.unwrap(), QueueStats::default());
    }

    #[tokio::test]
    async fn test_stale_claims_respect_cutoff() {
        let store = SqliteMetadataStore::in_memory().unwrap();
        store.insert(&key("a"), 5).await.unwrap();
        store.insert(&key("b"), 5).await.unwrap();
        let token = ClaimToken::new();
        let claimed = store.claim_next(token).await.unwrap().unwrap();

        let past = Utc::now() - chrono::Duration::hours(1);
        assert!(store.stale_claims(past).await.unwrap().is_empty());

        let stale = store.stale_claims(Utc::now()).await.unwrap();
        assert_eq!(stale.len(), 1);
        let stale = stale[0].as_ref().unwrap();
        assert_eq!(stale.id, claimed.id);
        assert_eq!(stale.content_length, 5);
        match &stale.state {
            MessageState::Claimed { token: held, .. } => assert_eq!(*held, token),
            MessageState::Available => panic!("expected a claimed record"),
        }
    }

    #[tokio::test]
    async fn test_renew_refreshes_only_own_claim() {
        let store = SqliteMetadataStore::in_memory().unwrap();
        let id = store.insert(&key("a"), 1).await.unwrap();
        let token = ClaimToken::new();
        store.claim_next(token).await.unwrap().unwrap();

        assert!(matches!(
            store.renew(id, ClaimToken::new()).await,
            Err(Error::NotFound(_))
        ));

        // Backdate the claim, then renewing makes it fresh again
        store
            .conn
            .lock()
            .execute("UPDATE messages SET claimed_at = 0 WHERE id = ?1", [id.0])
            .unwrap();
        let recent = Utc::now() - chrono::Duration::minutes(1);
        assert_eq!(store.stale_claims(recent).await.unwrap().len(), 1);

        store.renew(id, token).await.unwrap();
        assert!(store.stale_claims(recent).await.unwrap().is_empty());

        store.release(id, token).await.unwrap();
        assert!(matches!(store.renew(id, token).await, Err(Error::NotFound(_))));
    }

    fn insert_corrupt_claim(store: &SqliteMetadataStore) {
        store
            .conn
            .lock()
            .execute(
                "INSERT INTO messages (storage_key, content_length, state, claim_token, claimed_at, created_at)
                 VALUES ('../escape', 1, 'claimed', 'not-a-uuid', 0, 0)",
                [],
            )
            .unwrap();
    }

    #[tokio::test]
    async fn test_corrupt_row_does_not_hide_other_stale_claims() {
        let store = SqliteMetadataStore::in_memory().unwrap();
        insert_corrupt_claim(&store);
        let good = store.insert(&key("good"), 1).await.unwrap();
        store.claim_next(ClaimToken::new()).await.unwrap().unwrap();

        let stale = store.stale_claims(Utc::now()).await.unwrap();
        assert_eq!(stale.len(), 2);
        assert!(matches!(stale[0], Err(Error::Internal(_))));
        assert_eq!(stale[1].as_ref().unwrap().id, good);
    }

    #[tokio::test]
    async fn test_corrupt_head_claims_as_internal_error() {
        let store = SqliteMetadataStore::in_memory().unwrap();
        store
            .conn
            .lock()
            .execute(
                "INSERT INTO messages (storage_key, content_length, created_at) VALUES ('', 1, 0)",
                [],
            )
            .unwrap();
        let next = store.insert(&key("next"), 1).await.unwrap();

        let result = store.claim_next(ClaimToken::new()).await;
        assert!(matches!(result, Err(Error::Internal(_))));

        // The bad row stays claimed and no longer blocks the queue
        let message = store.claim_next(ClaimToken::new()).await.unwrap().unwrap();
        assert_eq!(message.id, next);
    }

    #[tokio::test]
    async fn test_open_persists_across_instances() {
        let temp = tempfile::TempDir::new().unwrap();
        let path = temp.path().join("db").join("messages.db");

        let id = {
            let store = SqliteMetadataStore::open(&path).unwrap();
            store.insert(&key("persisted"), 9).await.unwrap()
        };

        let store = SqliteMetadataStore::open(&path).unwrap();
        let message = store.claim_next(ClaimToken::new()).await.unwrap().unwrap();
        assert_eq!(message.id, id);
        assert_eq!(message.storage_key, key("persisted"));
    }
}
