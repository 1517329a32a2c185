//! blobq Core - Queue logic for the message queue
//!
//! This crate contains:
//! - MessageQueue: enqueue / dequeue over metadata and blob stores
//! - MetadataStore: ordered message records with an atomic claim
//! - SqliteMetadataStore: the relational implementation

pub mod metadata;
pub mod queue;

// Re-exports
pub use metadata::{MetadataStore, SqliteMetadataStore};
pub use queue::{MessageQueue, NO_CONTENT};
