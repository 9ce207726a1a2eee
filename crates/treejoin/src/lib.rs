//! # treejoin
//!
//! Join a peer-to-peer synchronized directory by contacting one member that
//! is already online.
//!
//! ## Overview
//!
//! A trusted node obtains a full replica of the shared tree: it asks its
//! correspondent for a snapshot, diffs it against the local root and fetches
//! every missing file. An untrusted node only receives the peer roster.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use treejoin::{BootstrapConfig, BootstrapSession};
//! use treejoin::store::MemoryModelFactory;
//! use treejoin::sync::MemoryNetwork;
//!
//! async fn example() -> treejoin::Result<()> {
//!     let network = MemoryNetwork::new();
//!     let config = BootstrapConfig::new("/srv/tree");
//!
//!     let session = BootstrapSession::create(
//!         config,
//!         "laptop",
//!         network.as_ref(),
//!         Arc::new(MemoryModelFactory::new()),
//!         Box::new(|| println!("bootstrap complete")),
//!     )
//!     .await?;
//!
//!     // Address of a member, exchanged out of band.
//!     // session.start(&member).await?;
//!
//!     session.close().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Re-exports
//!
//! - `treejoin::core` - Peers, snapshots, wire messages, layout
//! - `treejoin::store` - Model contract, on-disk persistence
//! - `treejoin::sync` - Protocol state machine and transport contract

pub mod config;
pub mod error;
pub mod session;

pub use treejoin_core as core;
pub use treejoin_store as store;
pub use treejoin_sync as sync;

pub use config::BootstrapConfig;
pub use error::{BootstrapError, Result};
pub use session::{BootstrapSession, DoneCallback, PeerStatus, SessionState};

pub use treejoin_core::{Address, ObjectId, ObjectInfo, Peer};
