//! Custom error types for the migration engine.
//!
//! This module defines `MigrateError`, the single error type returned by every
//! operation in the crate. Using the `thiserror` crate, it gives a consistent way to
//! report what went wrong while moving samples and RRD files between nodes.
//!
//! ## Error Taxonomy
//!
//! Every variant belongs to one [`ErrorKind`], which decides how a worker reacts:
//!
//! - **`Transport`**: dial failures, broken connections and errors returned by the
//!   remote peer. The worker reconnects and flags the key with `ERROR`.
//! - **`Timeout`**: the remote call did not answer in time. Handled like a transport
//!   error; the in-flight call is abandoned, not cancelled.
//! - **`Local`**: JSON encoding or decoding of call payloads, base64 decode failures,
//!   RRD file writes and replay failures. No reconnection; the key is flagged with
//!   `ERROR`.
//! - **`Store`**: the buffered-sample store does not know the key, or the key is busy
//!   with another operation. Fails fast without touching the store.
//! - **`Dispatch`**: the task could not be routed to a node queue.
//! - **`Config`**: configuration loading or validation problems.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Convenience alias for results using the crate error type.
pub type Result<T> = std::result::Result<T, MigrateError>;

/// Coarse classification of a [`MigrateError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Connection level failure or an error reported by the peer.
    Transport,
    /// Remote call exceeded the configured timeout.
    Timeout,
    /// Local decode or filesystem failure.
    Local,
    /// Buffered-sample store refused the operation.
    Store,
    /// Task could not be handed to a node.
    Dispatch,
    /// Invalid or unreadable configuration.
    Config,
}

#[derive(Error, Debug)]
pub enum MigrateError {
    #[error("Failed to dial {addr}: {source}")]
    Dial {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Remote error: {0}")]
    Remote(String),

    #[error("Call timed out after {0:?}")]
    Timeout(Duration),

    #[error("Codec error: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("Invalid base64 RRD body: {0}")]
    Decode(#[from] base64::DecodeError),

    #[error("Failed to write RRD file {path}: {source}")]
    RrdWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to replay samples into {path}: {reason}")]
    Flush { path: PathBuf, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unknown key: {0}")]
    UnknownKey(String),

    #[error("Key {0} is busy with another operation")]
    KeyBusy(String),

    #[error("Invalid cache key: {0}")]
    InvalidKey(String),

    #[error("Unknown node: {0}")]
    UnknownNode(String),

    #[error("Task queue for node {0} is closed")]
    QueueClosed(String),

    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    #[error("Configuration validation error: {0}")]
    Configuration(String),
}

impl MigrateError {
    /// Returns the taxonomy bucket this error belongs to.
    pub fn kind(&self) -> ErrorKind {
        match self {
            MigrateError::Dial { .. }
            | MigrateError::Transport(_)
            | MigrateError::Remote(_) => ErrorKind::Transport,
            MigrateError::Timeout(_) => ErrorKind::Timeout,
            MigrateError::Codec(_)
            | MigrateError::Decode(_)
            | MigrateError::RrdWrite { .. }
            | MigrateError::Flush { .. }
            | MigrateError::Io(_) => ErrorKind::Local,
            MigrateError::UnknownKey(_)
            | MigrateError::KeyBusy(_)
            | MigrateError::InvalidKey(_) => ErrorKind::Store,
            MigrateError::UnknownNode(_) | MigrateError::QueueClosed(_) => ErrorKind::Dispatch,
            MigrateError::Config(_) | MigrateError::Configuration(_) => ErrorKind::Config,
        }
    }

    /// Whether the failing connection should be redialed.
    pub fn is_connection_fault(&self) -> bool {
        matches!(self.kind(), ErrorKind::Transport | ErrorKind::Timeout)
    }
}

impl From<figment::Error> for MigrateError {
    fn from(value: figment::Error) -> Self {
        MigrateError::Config(Box::new(value))
    }
}
