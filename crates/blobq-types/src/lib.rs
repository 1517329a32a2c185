//! blobq Types - Core domain types for the message queue
//!
//! This crate contains all shared types used across blobq components.

pub mod config;
pub mod error;
pub mod message;
pub mod queue;

// Re-export commonly used types
pub use config::{BackendKind, StorageConfig};
pub use error::{Error, Result};
pub use message::{ClaimToken, Message, MessageId, MessageState, StorageKey};
pub use queue::{QueueSettings, QueueStats, RepairReport};
