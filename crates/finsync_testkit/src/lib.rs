//! # finsync Testkit
//!
//! Test utilities for finsync.
//!
//! This crate provides:
//! - Store fixtures (in-memory and file-backed journaled stores)
//! - Record builders with valid defaults
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust
//! use finsync_core::{EntityStore, Record, RecordType};
//! use finsync_testkit::prelude::*;
//!
//! let store = TestStore::memory();
//! let tx = sample_transaction("t1", 500.0);
//! store.put(&test_user(), Record::Transaction(tx)).unwrap();
//! assert_eq!(store.list_live(&test_user(), RecordType::Transaction).unwrap().len(), 1);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
}

pub use fixtures::*;
pub use generators::*;
