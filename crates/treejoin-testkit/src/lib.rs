//! # treejoin testkit
//!
//! Testing utilities for treejoin.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Fixtures**: snapshot builders and a remote member that answers a
//!   joining node over a memory network
//! - **Generators**: Proptest strategies for tree shapes and arrival orders
//!
//! ## Test Fixtures
//!
//! ```rust
//! use treejoin_testkit::fixtures::SnapshotBuilder;
//!
//! let snapshot = SnapshotBuilder::new()
//!     .file("docs/a.txt", b"one")
//!     .file("docs/b.txt", b"two")
//!     .build();
//! assert_eq!(snapshot.file_count(), 2);
//! assert_eq!(snapshot.directory_count(), 1);
//! ```
//!
//! ## Property Testing
//!
//! ```rust,ignore
//! use proptest::prelude::*;
//! use treejoin_testkit::generators::snapshot_with_order;
//!
//! proptest! {
//!     #[test]
//!     fn completes_in_any_order((snapshot, order) in snapshot_with_order(3, 6)) {
//!         // deliver snapshot.file_ids() permuted by `order`
//!     }
//! }
//! ```

pub mod fixtures;
pub mod generators;

pub use fixtures::{eventually, RemotePeer, Snapshot, SnapshotBuilder};
pub use generators::{snapshot_from_params, snapshot_with_order, SnapshotParams};
