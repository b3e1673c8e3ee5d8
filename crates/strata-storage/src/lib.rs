//! # strata-storage
//!
//! Block store and page cache for Strata.
//!
//! This crate provides:
//! - A block store contract with file-backed and in-memory backends
//! - A concurrent page cache with shared/exclusive holds, copy-on-write,
//!   partitioned priority-LRU eviction and checkpoint flushing

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Block store backends and I/O errors
pub mod file;

/// Page cache
pub mod buffer;
