//! Unified error types for the tmibot core.
//!
//! Handler bodies report failures through `anyhow`; everything the core itself
//! can fail with is one of the enums below.

use thiserror::Error;

// =============================================================================
// Transport Errors
// =============================================================================

/// Errors that can occur on the byte-stream connection to the chat server.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// Connection failed.
    #[error("connection failed: {addr} - {reason}")]
    ConnectionFailed {
        /// The address that failed to connect.
        addr: String,
        /// Reason for failure.
        reason: String,
    },

    /// Connection closed by the far end.
    #[error("connection closed: {reason}")]
    ConnectionClosed {
        /// Reason for closure.
        reason: String,
    },

    /// No writer is attached to the transport.
    #[error("transport is not connected")]
    NotConnected,

    /// The inbound stream could not be framed.
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl TransportError {
    /// Creates a closed-connection error.
    pub fn closed(reason: impl Into<String>) -> Self {
        Self::ConnectionClosed {
            reason: reason.into(),
        }
    }
}

// =============================================================================
// Codec Errors
// =============================================================================

/// Framing errors raised by [`LineCodec`](crate::protocol::LineCodec).
#[derive(Debug, Clone, Error)]
pub enum CodecError {
    /// A received line exceeded the framing limit.
    #[error("line exceeds maximum length ({max} bytes)")]
    LineTooLong {
        /// The configured limit.
        max: usize,
    },

    /// The underlying stream failed.
    #[error("I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for CodecError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

// =============================================================================
// Persistence Errors
// =============================================================================

/// Errors raised while loading or saving durable bot state.
#[derive(Debug, Error)]
pub enum PersistError {
    /// Reading or writing the backing file failed.
    #[error("persistence I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The stored blob could not be (de)serialized.
    #[error("persistence format error: {0}")]
    Format(#[from] serde_json::Error),
}

// =============================================================================
// Engine Errors
// =============================================================================

/// Errors surfaced by [`Engine`](crate::Engine) operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The bot is not a member of the channel.
    #[error("not following channel '{0}'")]
    UnknownChannel(String),

    /// The channel name is not usable on the wire.
    #[error("invalid channel name '{0}'")]
    InvalidChannel(String),

    /// The outbound queue has been shut down.
    #[error("outbound queue is closed")]
    QueueClosed,

    /// No connection is attached.
    #[error("not connected")]
    NotConnected,

    /// The periodic tasks are already running.
    #[error("periodic tasks are already running")]
    AlreadyRunning,

    /// A periodic task panicked or could not be joined.
    #[error("task '{name}' failed to join: {reason}")]
    TaskJoin {
        /// Registered task name.
        name: String,
        /// Join failure description.
        reason: String,
    },

    /// Saving state failed.
    #[error(transparent)]
    Persist(#[from] PersistError),

    /// Transport error.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

// =============================================================================
// Result Type Aliases
// =============================================================================

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;
