//! # Tether Testkit
//!
//! Test utilities for Tether.
//!
//! This crate provides:
//! - Store fixtures backed by temporary directories
//! - Property-based test generators using proptest
//! - A crash-injection harness for the file store
//!
//! ## Usage
//!
//! ```rust
//! use tether_testkit::prelude::*;
//!
//! let fixture = TestStore::with_state(&sample_state("hello"));
//! let reopened = fixture.reopen();
//! assert_eq!(reopened.stored(), Some(sample_state("hello")));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod crash;
pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::crash::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
}

pub use crash::*;
pub use fixtures::*;
pub use generators::*;
