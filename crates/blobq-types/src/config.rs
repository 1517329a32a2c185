//! Storage backend configuration
//!
//! The backend kind is a closed choice made once at startup. Credentials for
//! the remote backend are deliberately absent: they come from the ambient
//! AWS provider chain (environment, shared profile, instance role).

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Which medium holds message content
///
/// Only `Local` and `RemoteObject` can be configured. `Memory` is reported by
/// the in-process test backend so log lines still name the medium; no
/// [`StorageConfig`] produces it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackendKind {
    Local,
    RemoteObject,
    Memory,
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Local => "local",
            Self::RemoteObject => "remote-object",
            Self::Memory => "memory",
        };
        f.write_str(name)
    }
}

/// Configuration for the blob storage backend
///
/// ```json
/// { "kind": "local", "root": "messages" }
/// { "kind": "remote-object", "bucket": "queue-bodies", "prefix": "prod/" }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum StorageConfig {
    /// Flat directory of content files
    Local { root: PathBuf },

    /// Objects in a single S3-compatible bucket
    RemoteObject {
        bucket: String,
        /// Prepended to every object name
        #[serde(default)]
        prefix: String,
        /// Override for S3-compatible services such as MinIO
        #[serde(default)]
        endpoint_url: Option<String>,
        #[serde(default)]
        region: Option<String>,
    },
}

impl StorageConfig {
    pub fn kind(&self) -> BackendKind {
        match self {
            Self::Local { .. } => BackendKind::Local,
            Self::RemoteObject { .. } => BackendKind::RemoteObject,
        }
    }

    /// Get the root directory for local backends, if applicable
    #[must_use]
    pub fn local_root(&self) -> Option<&Path> {
        match self {
            Self::Local { root } => Some(root),
            Self::RemoteObject { .. } => None,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::Local {
            root: PathBuf::from("messages"),
        }
    }
}
