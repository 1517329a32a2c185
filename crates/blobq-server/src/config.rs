//! Startup configuration
//!
//! Every option can come from the command line or a `BLOBQ_*` environment
//! variable. Object-store credentials are not options: the AWS provider
//! chain resolves them from the environment or session.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Result};
use blobq_types::{QueueSettings, StorageConfig};
use clap::{Parser, ValueEnum};

/// Storage medium for message content
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StorageKind {
    Local,
    RemoteObject,
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Pretty,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "blobq", version, about = "Single-consumer message queue server")]
pub struct Config {
    /// Address to listen on
    #[arg(long, env = "BLOBQ_BIND", default_value = "127.0.0.1:3000")]
    pub bind: SocketAddr,

    /// SQLite database holding message metadata
    #[arg(long, env = "BLOBQ_DATABASE", default_value = "messages.db")]
    pub database: PathBuf,

    /// Where message content is stored
    #[arg(long, env = "BLOBQ_STORAGE_KIND", value_enum, default_value_t = StorageKind::Local)]
    pub storage_kind: StorageKind,

    /// Content directory (local storage)
    #[arg(long, env = "BLOBQ_LOCAL_ROOT", default_value = "messages")]
    pub local_root: PathBuf,

    /// Bucket name (remote-object storage)
    #[arg(long, env = "BLOBQ_BUCKET")]
    pub bucket: Option<String>,

    /// Prefix prepended to object names (remote-object storage)
    #[arg(long, env = "BLOBQ_OBJECT_PREFIX", default_value = "")]
    pub object_prefix: String,

    /// Custom S3 endpoint, e.g. a MinIO server
    #[arg(long, env = "BLOBQ_ENDPOINT_URL")]
    pub endpoint_url: Option<String>,

    /// Region override for the object store
    #[arg(long, env = "BLOBQ_REGION")]
    pub region: Option<String>,

    /// Namespace for generated storage keys
    #[arg(long, env = "BLOBQ_KEY_NAMESPACE", default_value = "default")]
    pub key_namespace: String,

    /// Seconds before an unfinished dequeue is repaired
    #[arg(long, env = "BLOBQ_CLAIM_TIMEOUT_SECS", default_value_t = 300)]
    pub claim_timeout_secs: u64,

    /// Seconds between repair passes
    #[arg(
        long,
        env = "BLOBQ_REPAIR_INTERVAL_SECS",
        default_value_t = 60,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub repair_interval_secs: u64,

    /// Log output format
    #[arg(long, env = "BLOBQ_LOG_FORMAT", value_enum, default_value_t = LogFormat::Pretty)]
    pub log_format: LogFormat,
}

impl Config {
    /// Resolve the storage options into a backend configuration
    pub fn storage_config(&self) -> Result<StorageConfig> {
        match self.storage_kind {
            StorageKind::Local => Ok(StorageConfig::Local {
                root: self.local_root.clone(),
            }),
            StorageKind::RemoteObject => {
                let Some(bucket) = self.bucket.clone().filter(|b| !b.is_empty()) else {
                    bail!("--bucket (BLOBQ_BUCKET) is required for remote-object storage");
                };
                Ok(StorageConfig::RemoteObject {
                    bucket,
                    prefix: self.object_prefix.clone(),
                    endpoint_url: self.endpoint_url.clone(),
                    region: self.region.clone(),
                })
            }
        }
    }

    pub fn queue_settings(&self) -> QueueSettings {
        QueueSettings {
            key_namespace: self.key_namespace.clone(),
            claim_timeout_secs: self.claim_timeout_secs,
            ..Default::default()
        }
    }

    pub fn repair_interval(&self) -> Duration {
        Duration::from_secs(self.repair_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Config {
        Config::try_parse_from(std::iter::once("blobq").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_local_storage_config() {
        let config = parse(&["--local-root", "/var/spool/blobq"]);

        assert_eq!(
            config.storage_config().unwrap(),
            StorageConfig::Local {
                root: PathBuf::from("/var/spool/blobq")
            }
        );
    }

    #[test]
    fn test_remote_requires_bucket() {
        let config = parse(&["--storage-kind", "remote-object"]);
        assert!(config.storage_config().is_err());

        let config = parse(&[
            "--storage-kind",
            "remote-object",
            "--bucket",
            "queue-bodies",
            "--object-prefix",
            "prod/",
        ]);
        assert_eq!(
            config.storage_config().unwrap(),
            StorageConfig::RemoteObject {
                bucket: "queue-bodies".into(),
                prefix: "prod/".into(),
                endpoint_url: None,
                region: None,
            }
        );
    }

    #[test]
    fn test_queue_settings() {
        let config = parse(&["--key-namespace", "tenant_7", "--claim-timeout-secs", "30"]);
        let settings = config.queue_settings();

        assert_eq!(settings.key_namespace, "tenant_7");
        assert_eq!(settings.claim_timeout_secs, 30);
    }

    #[test]
    fn test_zero_repair_interval_rejected() {
        let result = Config::try_parse_from(["blobq", "--repair-interval-secs", "0"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_unknown_storage_kind_rejected() {
        let result = Config::try_parse_from(["blobq", "--storage-kind", "ftp"]);
        assert!(result.is_err());
    }
}
