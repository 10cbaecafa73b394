use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors produced while reading recordings or aggregating their events.
#[derive(Debug, Error)]
pub enum Error {
    /// A recording (or a session's recording) does not exist.
    #[error("recording not found: {}", .0.display())]
    NotFound(PathBuf),

    /// The recording is corrupt, truncated, or uses an unsupported layout.
    #[error("malformed recording at byte offset {offset}: {reason}")]
    Format {
        /// Absolute byte offset of the offending structure.
        offset: u64,
        /// What was wrong with it.
        reason: String,
    },

    /// A caller supplied an argument that can never be valid.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// An event processor failed while folding an event.
    #[error("event processing failed: {0}")]
    Processing(String),

    /// Any other I/O failure.
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl Error {
    pub(crate) fn format<S: Into<String>>(offset: u64, reason: S) -> Self {
        Error::Format {
            offset,
            reason: reason.into(),
        }
    }

    /// Whether this error only disqualifies the session it happened in.
    ///
    /// Missing and malformed recordings degrade a session to an empty contribution when
    /// several sessions are iterated together; everything else fails the whole collection.
    pub fn is_session_local(&self) -> bool {
        matches!(self, Error::NotFound(_) | Error::Format { .. })
    }
}

/// Shorthand for results carrying this crate's [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
