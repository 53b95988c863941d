//! Configuration errors.

use std::path::PathBuf;

use thiserror::Error;

/// Why a configuration could not be loaded or was rejected.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// An explicitly requested file does not exist.
    #[error("config file {} does not exist", .0.display())]
    FileNotFound(PathBuf),

    /// The file extension has no enabled provider.
    #[error("unsupported config format for {}", .path.display())]
    UnsupportedFormat { path: PathBuf },

    /// Merging the layers into [`TmibotConfig`](super::TmibotConfig) failed.
    #[error("malformed configuration: {0}")]
    Extract(String),

    /// A required key is empty.
    #[error("`{key}` must be set")]
    Missing { key: &'static str },

    /// A key holds an unusable value.
    #[error("`{key}` {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl ConfigError {
    pub fn missing(key: &'static str) -> Self {
        Self::Missing { key }
    }

    pub fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }

    /// The configuration key at fault, when there is one.
    pub fn key(&self) -> Option<&'static str> {
        match self {
            Self::Missing { key } | Self::Invalid { key, .. } => Some(key),
            _ => None,
        }
    }
}

pub type ConfigResult<T> = Result<T, ConfigError>;
