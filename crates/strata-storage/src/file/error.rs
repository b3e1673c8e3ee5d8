//! I/O error types for the block store.

use std::io;
use std::path::PathBuf;

use strata_common::types::BlockAddress;
use thiserror::Error;

/// Result type for block store operations.
pub type IoResult<T> = Result<T, IoError>;

/// Errors that can occur during block store I/O.
#[derive(Debug, Error)]
#[allow(missing_docs)] // Fields are documented by variant docs
pub enum IoError {
    /// Standard I/O error.
    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },

    /// File not found.
    #[error("file not found: {path}")]
    NotFound { path: PathBuf },

    /// Permission denied.
    #[error("permission denied: {path}")]
    PermissionDenied { path: PathBuf },

    /// Buffer length does not match the store's block size.
    #[error("buffer of {actual} bytes does not match block size {expected}")]
    BlockSizeMismatch { expected: usize, actual: usize },

    /// The block's byte offset does not fit in a file position.
    #[error("block {address} is out of range for block size {block_size}")]
    AddressOutOfRange {
        address: BlockAddress,
        block_size: usize,
    },

    /// The store was opened read-only.
    #[error("store is read-only")]
    ReadOnly,

    /// Failure injected by a test backend.
    #[error("injected failure: {message}")]
    Injected { message: String },
}

impl IoError {
    /// Creates a BlockSizeMismatch error.
    pub fn block_size_mismatch(expected: usize, actual: usize) -> Self {
        Self::BlockSizeMismatch { expected, actual }
    }

    /// Creates an injected failure.
    pub fn injected(message: impl Into<String>) -> Self {
        Self::Injected {
            message: message.into(),
        }
    }

    /// Returns true if this is a retryable error.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Io { source } => {
                source.kind() == io::ErrorKind::Interrupted
                    || source.kind() == io::ErrorKind::WouldBlock
            }
            _ => false,
        }
    }

    /// Converts from std::io::Error with path context.
    pub fn from_io_with_path(err: io::Error, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        match err.kind() {
            io::ErrorKind::NotFound => Self::NotFound { path },
            io::ErrorKind::PermissionDenied => Self::PermissionDenied { path },
            _ => Self::Io { source: err },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_creation() {
        let err = IoError::from_io_with_path(
            io::Error::new(io::ErrorKind::NotFound, "missing"),
            "/tmp/test.db",
        );
        assert!(matches!(err, IoError::NotFound { .. }));

        let err = IoError::from_io_with_path(
            io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
            "/tmp/test.db",
        );
        assert!(matches!(err, IoError::PermissionDenied { .. }));
    }

    #[test]
    fn test_io_error_from_std() {
        let std_err = io::Error::new(io::ErrorKind::Interrupted, "interrupted");
        let err: IoError = std_err.into();
        assert!(matches!(err, IoError::Io { .. }));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_error_messages() {
        let err = IoError::AddressOutOfRange {
            address: BlockAddress::new(9),
            block_size: 16,
        };
        assert_eq!(err.to_string(), "block 9 is out of range for block size 16");
        assert!(!err.is_retryable());

        let err = IoError::injected("disk full");
        assert_eq!(err.to_string(), "injected failure: disk full");
    }
}
