//! Error types for sync stages.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur while discovering, analyzing, transferring or deleting.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The network range could not be used for a scan.
    #[error("Invalid network range {range}: {message}")]
    InvalidNetwork { range: String, message: String },

    /// Invalid configuration.
    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    /// TCP connection to the device failed.
    #[error("Cannot connect to {host}: {source}")]
    Connect {
        host: String,
        #[source]
        source: std::io::Error,
    },

    /// The device rejected our credentials.
    #[error("Authentication failed for {username}@{host}: {message}")]
    Authentication {
        host: String,
        username: String,
        message: String,
    },

    /// SSH protocol or SFTP subsystem failure while opening a session.
    #[error("SSH error on {host}: {message}")]
    Ssh { host: String, message: String },

    /// A single remote operation failed.
    #[error("Remote error at {path}: {message}")]
    Remote { path: String, message: String },

    /// Local I/O error.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A selection that does not belong to the latest scan of this directory.
    #[error("Stale selection: {message}")]
    StaleSelection { message: String },

    /// Other error.
    #[error("{message}")]
    Other { message: String },
}

impl SyncError {
    /// Create a local I/O error with path context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Create a remote error for a single path.
    pub fn remote(path: impl Into<String>, message: impl ToString) -> Self {
        Self::Remote {
            path: path.into(),
            message: message.to_string(),
        }
    }

    /// Create an invalid configuration error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Whether this error is fatal to a whole stage rather than a single item.
    pub fn is_connection_level(&self) -> bool {
        matches!(
            self,
            Self::Connect { .. } | Self::Authentication { .. } | Self::Ssh { .. }
        )
    }

    /// Whether the device rejected the credentials.
    pub fn is_authentication(&self) -> bool {
        matches!(self, Self::Authentication { .. })
    }
}

/// A failure confined to one file or directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemError {
    /// The remote path that failed.
    pub path: String,
    /// Human-readable message.
    pub message: String,
}

impl ItemError {
    /// Create a new item error.
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

impl From<&SyncError> for ItemError {
    fn from(err: &SyncError) -> Self {
        match err {
            SyncError::Remote { path, message } => Self::new(path.clone(), message.clone()),
            SyncError::Io { path, source } => {
                Self::new(path.to_string_lossy(), source.to_string())
            }
            other => Self::new(String::new(), other.to_string()),
        }
    }
}

impl std::fmt::Display for ItemError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}
