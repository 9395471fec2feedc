//! Error types for transfer sessions.

use std::io;
use thiserror::Error;

/// Failure category, one per class of user-visible error message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Header did not decode into a path and a length.
    MalformedFrame,
    /// Relative path resolved outside the output root.
    PathTraversal,
    /// Filesystem or socket operation failed.
    Io,
    /// Stream ended before the declared payload length.
    ShortPayload,
    /// Bind, accept or dial failed.
    Connection,
}

impl ErrorCategory {
    pub fn label(self) -> &'static str {
        match self {
            ErrorCategory::MalformedFrame => "malformed frame",
            ErrorCategory::PathTraversal => "path traversal",
            ErrorCategory::Io => "i/o failure",
            ErrorCategory::ShortPayload => "short payload",
            ErrorCategory::Connection => "connection failure",
        }
    }
}

/// Main error type for send and receive sessions.
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("invalid metadata: {line:?}")]
    InvalidMetadata { line: String },

    #[error("invalid length {field:?} in header for {path:?}")]
    InvalidLength { path: String, field: String },

    #[error("header line exceeds {limit} bytes")]
    HeaderTooLong { limit: usize },

    #[error("stream ended inside a header line: {partial:?}")]
    TruncatedHeader { partial: String },

    /// Path cannot be put on the wire (empty, non UTF-8, line breaks, too long).
    #[error("unsupported path {path:?}: {reason}")]
    InvalidPath { path: String, reason: &'static str },

    #[error("path traversal rejected: {path:?}")]
    PathTraversal { path: String },

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },

    #[error("short payload for {path:?}: expected {expected} bytes, got {received}")]
    ShortPayload {
        path: String,
        expected: u64,
        received: u64,
    },

    #[error("bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("connect {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("accept: {0}")]
    Accept(#[source] io::Error),
}

impl TransferError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            TransferError::InvalidMetadata { .. }
            | TransferError::InvalidLength { .. }
            | TransferError::HeaderTooLong { .. }
            | TransferError::TruncatedHeader { .. }
            | TransferError::InvalidPath { .. } => ErrorCategory::MalformedFrame,
            TransferError::PathTraversal { .. } => ErrorCategory::PathTraversal,
            TransferError::Io { .. } => ErrorCategory::Io,
            TransferError::ShortPayload { .. } => ErrorCategory::ShortPayload,
            TransferError::Bind { .. }
            | TransferError::Connect { .. }
            | TransferError::Accept(_) => ErrorCategory::Connection,
        }
    }

    pub(crate) fn io(context: impl Into<String>, source: io::Error) -> Self {
        TransferError::Io {
            context: context.into(),
            source,
        }
    }
}

/// Attach a context string to a raw `io::Result`.
pub(crate) trait IoContext<T> {
    fn io_context<F, S>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>;
}

impl<T> IoContext<T> for io::Result<T> {
    fn io_context<F, S>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>,
    {
        self.map_err(|e| TransferError::io(f(), e))
    }
}

pub type Result<T> = std::result::Result<T, TransferError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn categories_cover_taxonomy() {
        let malformed = TransferError::InvalidMetadata {
            line: "nocolon".into(),
        };
        assert_eq!(malformed.category(), ErrorCategory::MalformedFrame);

        let short = TransferError::ShortPayload {
            path: "a.txt".into(),
            expected: 10,
            received: 3,
        };
        assert_eq!(short.category(), ErrorCategory::ShortPayload);
        assert!(short.to_string().contains("expected 10 bytes, got 3"));

        let dial = TransferError::Connect {
            addr: "127.0.0.1:1".into(),
            source: io::Error::from(io::ErrorKind::ConnectionRefused),
        };
        assert_eq!(dial.category(), ErrorCategory::Connection);
    }

    #[test]
    fn io_context_wraps_source() {
        let res: io::Result<()> = Err(io::Error::from(io::ErrorKind::PermissionDenied));
        let err = res.io_context(|| "create file x").unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Io);
        assert!(err.to_string().starts_with("create file x: "));
    }
}
