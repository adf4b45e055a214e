use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use courier_common::audit::{AuditConfig, Auditor};
use courier_delivery::{RetryPolicy, StatusResolver};
use courier_store::{QueueOptions, QueueStore, StatusStore, StoreConfig, StoreError};
use serde::Deserialize;
use thiserror::Error;

use crate::controller::Relay;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config from {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config: {0}")]
    Parse(#[from] ron::error::SpannedError),

    #[error("No configuration file found. Tried:\n  - COURIER_CONFIG environment variable\n{0}")]
    NotFound(String),

    #[error("Failed to open store: {0}")]
    Store(#[from] StoreError),
}

/// The queue table
#[derive(Debug, Clone, Deserialize)]
pub struct QueueConfig {
    #[serde(default)]
    pub store: StoreConfig,
    /// How long a selected record stays claimed (in seconds)
    #[serde(default = "defaults::lease_secs")]
    pub lease_secs: u64,
    /// Upper bound on each store operation (in seconds)
    #[serde(default = "defaults::timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            store: StoreConfig::default(),
            lease_secs: defaults::lease_secs(),
            timeout_secs: defaults::timeout_secs(),
        }
    }
}

/// The status table
#[derive(Debug, Clone, Deserialize)]
pub struct StatusConfig {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default = "defaults::timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            store: StoreConfig::default(),
            timeout_secs: defaults::timeout_secs(),
        }
    }
}

/// Batch size limits for the scheduler's selections
#[derive(Debug, Clone, Deserialize)]
pub struct BatchConfig {
    /// Records per selection of first attempts
    #[serde(default = "defaults::stream")]
    pub send_stream: usize,
    /// Records per selection of retries
    #[serde(default = "defaults::stream")]
    pub resend_stream: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            send_stream: defaults::stream(),
            resend_stream: defaults::stream(),
        }
    }
}

/// Top level configuration
///
/// # Examples
///
/// ```ron
/// Courier (
///     queue: (
///         store: File(path: "/var/spool/courier/queue"),
///         lease_secs: 600,
///     ),
///     status: (
///         store: File(path: "/var/spool/courier/status"),
///     ),
///     retry: (
///         max_repeat_send: 5,
///         retry_interval_mins: 15,
///     ),
///     batch: (
///         send_stream: 100,
///         resend_stream: 50,
///     ),
/// )
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Courier {
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub status: StatusConfig,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default)]
    pub batch: BatchConfig,
    #[serde(default)]
    pub audit: AuditConfig,
}

impl Courier {
    /// Parse a configuration from RON
    ///
    /// # Errors
    /// If the content is not a valid configuration
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        Ok(ron::from_str(content)?)
    }

    /// Read and parse a configuration file
    ///
    /// # Errors
    /// If the file cannot be read or is not a valid configuration
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        Self::parse(&content)
    }

    /// Find the configuration file using the following precedence:
    /// 1. `COURIER_CONFIG` environment variable
    /// 2. ./courier.config.ron (current working directory)
    /// 3. /etc/courier/courier.config.ron (system-wide config)
    ///
    /// # Errors
    /// If `COURIER_CONFIG` names a missing file, or none of the defaults exist
    pub fn find() -> Result<PathBuf, ConfigError> {
        if let Ok(env_path) = std::env::var("COURIER_CONFIG") {
            let path = PathBuf::from(env_path);
            if path.exists() {
                return Ok(path);
            }
            return Err(ConfigError::Read {
                source: std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "COURIER_CONFIG points to a non-existent file",
                ),
                path,
            });
        }

        let default_paths = [
            PathBuf::from("./courier.config.ron"),
            PathBuf::from("/etc/courier/courier.config.ron"),
        ];

        if let Some(path) = default_paths.iter().find(|path| path.exists()) {
            return Ok(path.clone());
        }

        let paths_tried = default_paths
            .iter()
            .map(|p| format!("  - {}", p.display()))
            .collect::<Vec<_>>()
            .join("\n");

        Err(ConfigError::NotFound(paths_tried))
    }

    #[must_use]
    pub const fn queue_options(&self) -> QueueOptions {
        QueueOptions {
            retry_interval: self.retry.retry_interval(),
            lease: Duration::from_secs(self.queue.lease_secs),
            timeout: Duration::from_secs(self.queue.timeout_secs),
        }
    }

    /// Open the configured stores and wire them into a [`Relay`]
    ///
    /// # Errors
    /// If either store cannot be opened
    pub fn build(self) -> Result<Relay, ConfigError> {
        let options = self.queue_options();
        let auditor = Auditor::new(self.audit);

        let queue = QueueStore::new(self.queue.store.into_queue_backend()?, options)
            .with_auditor(auditor.clone());
        let statuses = StatusStore::new(
            self.status.store.into_status_backend()?,
            Duration::from_secs(self.status.timeout_secs),
        );
        let resolver = StatusResolver::new(queue, statuses, self.retry).with_auditor(auditor);

        Ok(Relay::new(resolver, self.batch))
    }
}

mod defaults {
    pub const fn lease_secs() -> u64 {
        600
    }

    pub const fn timeout_secs() -> u64 {
        30
    }

    pub const fn stream() -> usize {
        100
    }
}
