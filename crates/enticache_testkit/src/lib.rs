//! # enticache Testkit
//!
//! Test utilities for enticache.
//!
//! This crate provides:
//! - Entity fixtures and a ready-made store over the in-memory data service
//! - Property-based test generators using proptest
//! - A tracing subscriber for tests
//!
//! ## Usage
//!
//! ```rust,ignore
//! use enticache_testkit::prelude::*;
//!
//! #[tokio::test]
//! async fn heroes_load() {
//!     let store = TestStore::new();
//!     store.server.seed("Hero", vec![hero(1, "Ann")]);
//!     let loaded = store.heroes().load(Default::default()).await.unwrap();
//!     assert_eq!(loaded.len(), 1);
//! }
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
