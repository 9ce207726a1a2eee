//! # treejoin store
//!
//! The local directory model behind a bootstrap, and the on-disk state a
//! bootstrapping root persists.
//!
//! ## Key Types
//!
//! - [`ModelStore`] - Diff a foreign snapshot, apply single updates
//! - [`ModelFactory`] - Build a model once the foreign snapshot arrived
//! - [`MemoryModel`] / [`MemoryModelFactory`] - In-memory model for tests
//! - [`IdentityDump`] - Persisted transport identity and self descriptor
//! - [`DirectoryRegistry`] - Roots that completed a bootstrap
//!
//! ## Design Notes
//!
//! - **Conflicts are distinguishable**: `StoreError::Conflict` means the
//!   update was applied over diverging local state. Bootstraps expect it.
//! - **Ordered diffs**: `bootstrap` lists a directory before its contents.

pub mod disk;
pub mod error;
pub mod memory;
pub mod traits;

pub use disk::{count_files, make_layout, read_peer, write_peer, DirectoryRegistry, IdentityDump};
pub use error::{Result, StoreError};
pub use memory::{MemoryModel, MemoryModelFactory};
pub use traits::{ModelFactory, ModelStore};
