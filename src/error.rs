//! Centralized error types for attachgrab.

use std::path::PathBuf;
use thiserror::Error;

/// All errors produced by the attachgrab library.
#[derive(Error, Debug)]
pub enum GrabError {
    /// I/O error with the associated file path.
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Could not reach the mail server or negotiate TLS.
    #[error("Connection error: {0}")]
    Connection(String),

    /// The server rejected the credentials.
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Mailbox selection or search failed.
    #[error("Search failed: {0}")]
    Search(String),

    /// A single message could not be fetched.
    #[error("Fetch of message {id} failed: {reason}")]
    Fetch { id: String, reason: String },

    /// A MIME decoding error.
    #[error("MIME decoding error: {0}")]
    Mime(String),

    /// A persisted state file is corrupt or unreadable.
    #[error("Corrupt state file '{path}': {reason}")]
    InvalidState { path: PathBuf, reason: String },

    /// An interrupted run was recorded with different parameters.
    #[error(
        "Interrupted run used {field} '{recorded}', but '{requested}' was requested \
         (pass --override to discard it, or --fresh to start over)"
    )]
    ResumeMismatch {
        field: &'static str,
        recorded: String,
        requested: String,
    },

    /// The policy sorts by message headers, which files on disk do not have.
    #[error("Sort policy '{0}' needs message headers and cannot re-sort files on disk")]
    PolicyNeedsMessage(String),

    /// An invalid path was provided.
    #[error("Invalid path: {0}")]
    InvalidPath(String),
}

/// Convenience alias for `Result<T, GrabError>`.
pub type Result<T> = std::result::Result<T, GrabError>;

impl GrabError {
    /// Create an `Io` variant from a path and an `io::Error`.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether this error must abort the whole run.
    ///
    /// The session driver retries or skips a message on any other error
    /// from the transport.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Connection(_)
                | Self::Auth(_)
                | Self::Search(_)
                | Self::InvalidState { .. }
                | Self::ResumeMismatch { .. }
                | Self::Io { .. }
        )
    }
}
