//! Type definitions for Strata.
//!
//! This module contains the identifier types shared by the storage crates.

mod ids;

pub use ids::{BlockAddress, FlushGeneration};
