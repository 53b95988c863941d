//! Runtime error types.

use thiserror::Error;
use tmibot_core::{EngineError, TransportError};

use crate::config::ConfigError;

pub use tmibot_core::PersistError;

/// Errors that can end a [`BotRuntime`](crate::BotRuntime) run.
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// Configuration could not be loaded or is invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The server rejected the login. Not retried.
    #[error("login failed: {reason}")]
    LoginFailed { reason: String },

    /// Reconnecting was abandoned after too many failures.
    #[error("gave up connecting to {addr} after {attempts} attempts")]
    GaveUp { addr: String, attempts: u32 },

    /// Durable state could not be read or written.
    #[error(transparent)]
    Persist(#[from] PersistError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Result type for runtime operations.
pub type RuntimeResult<T> = Result<T, RuntimeError>;
