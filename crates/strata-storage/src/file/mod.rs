//! Block store layer for Strata.
//!
//! This module provides the storage backend contract the page cache is
//! written against, plus two implementations:
//!
//! - **FileBlockStore**: positioned block I/O on a single file
//! - **MemoryBlockStore**: blocks held in memory, with transfer logs and
//!   failure injection for tests
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │           BlockStore Trait              │
//! │  (read_block, write_block, extend,      │
//! │   sync)                                 │
//! └─────────────────────────────────────────┘
//!              │                   │
//!              ▼                   ▼
//! ┌─────────────────────┐  ┌─────────────────────┐
//! │   FileBlockStore    │  │  MemoryBlockStore   │
//! │   (std::fs)         │  │  (HashMap)          │
//! └─────────────────────┘  └─────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```rust
//! use strata_common::types::BlockAddress;
//! use strata_storage::file::{BlockStore, MemoryBlockStore};
//!
//! let store = MemoryBlockStore::new(16, 4);
//! store.write_block(BlockAddress::new(1), &[1u8; 16]).unwrap();
//!
//! let mut buf = [0u8; 16];
//! assert_eq!(store.read_block(BlockAddress::new(1), &mut buf).unwrap(), 16);
//! assert_eq!(buf, [1u8; 16]);
//! ```

mod error;
mod memory;
mod std_io;
mod store;

pub use error::{IoError, IoResult};
pub use memory::MemoryBlockStore;
pub use std_io::FileBlockStore;
pub use store::BlockStore;
