//! Buffer pool errors.

use strata_common::types::BlockAddress;
use thiserror::Error;

use crate::file::IoError;

/// Result type for buffer pool operations.
pub type BufferResult<T> = Result<T, BufferError>;

/// Errors that can occur during buffer pool operations.
#[derive(Debug, Error)]
#[allow(missing_docs)] // Fields are documented by variant docs
pub enum BufferError {
    /// Every slot is held; the pool is too small for the concurrent load.
    #[error("no free slots available, all {num_slots} slots are in use")]
    NoFreeSlots { num_slots: usize },

    /// The store returned fewer bytes than one block.
    #[error("short read of block {address}: expected {expected} bytes, got {actual}")]
    ShortRead {
        address: BlockAddress,
        expected: usize,
        actual: usize,
    },

    /// Reading a block from the store failed.
    #[error("failed to read block {address}: {source}")]
    ReadFailed {
        address: BlockAddress,
        #[source]
        source: IoError,
    },

    /// Store I/O error (write-back, sync, extend).
    #[error("store I/O error: {0}")]
    Io(#[from] IoError),

    /// Operation needs a slot bound to an address.
    #[error("slot {slot} is not bound to an address")]
    NotBound { slot: u32 },

    /// Operation needs an address.
    #[error("operation requires a block address")]
    MissingAddress,

    /// The address is reserved and can never be cached.
    #[error("block address {address} is reserved")]
    InvalidAddress { address: BlockAddress },

    /// Preflush writer has been shut down.
    #[error("preflush writer is shutting down")]
    ShuttingDown,

    /// Configuration error.
    #[error("configuration error: {message}")]
    Config { message: String },
}

impl BufferError {
    /// Creates a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Returns true if this is a transient error that can be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Io(source) => source.is_retryable(),
            _ => false,
        }
    }

    /// Returns true if the caller must treat this error as fatal.
    ///
    /// Exhaustion means the pool is misconfigured for its load; a failed or
    /// short read means the store cannot serve a consistent block.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::NoFreeSlots { .. } | Self::ShortRead { .. } | Self::ReadFailed { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_fatal() {
        assert!(BufferError::NoFreeSlots { num_slots: 4 }.is_fatal());
        assert!(BufferError::ShortRead {
            address: BlockAddress::new(1),
            expected: 16,
            actual: 0,
        }
        .is_fatal());
        assert!(!BufferError::Io(IoError::ReadOnly).is_fatal());
        assert!(!BufferError::config("bad").is_fatal());
        assert!(!BufferError::InvalidAddress {
            address: BlockAddress::MAX,
        }
        .is_fatal());
    }

    #[test]
    fn test_is_retryable() {
        let interrupted = std::io::Error::new(std::io::ErrorKind::Interrupted, "eintr");
        assert!(BufferError::Io(IoError::from(interrupted)).is_retryable());
        assert!(!BufferError::NoFreeSlots { num_slots: 1 }.is_retryable());
    }

    #[test]
    fn test_write_back_error_wraps_io() {
        let err: BufferError = IoError::injected("write to block 3").into();
        assert!(matches!(err, BufferError::Io(IoError::Injected { .. })));
        assert_eq!(err.to_string(), "store I/O error: injected failure: write to block 3");
    }
}
