//! # strata-common
//!
//! Common types and constants for Strata.
//!
//! This crate provides the foundational types shared by the storage crates:
//!
//! - **Types**: Block addresses and flush generations
//! - **Constants**: Block sizes, pool defaults and backoff tuning
//!
//! ## Example
//!
//! ```rust
//! use strata_common::types::{BlockAddress, FlushGeneration};
//!
//! let addr = BlockAddress::new(42);
//! let gen = FlushGeneration::INITIAL.next();
//! assert_eq!(addr.as_u64(), 42);
//! assert_eq!(gen.as_u64(), 1);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod constants;
pub mod types;

// Re-export commonly used items at the crate root
pub use constants::*;
pub use types::{BlockAddress, FlushGeneration};
