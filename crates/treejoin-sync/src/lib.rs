//! # treejoin sync
//!
//! The one-shot join protocol: a new node contacts one online member and
//! obtains a replica of the shared tree, or only the peer roster when it
//! joins untrusted.
//!
//! ## Message Flow
//!
//! ```text
//! Joining node (trusted)                 Member
//!   |-------- connection request ---------->|
//!   |-------- request MODEL --------------->|   (every poll tick)
//!   |<------- file <addr>.MODEL ------------|
//!   |-------- request obj1, obj2 ---------->|   (resent until received)
//!   |<------- file <addr>.obj1 -------------|
//!   |<------- file <addr>.obj2 -------------|
//!   |           completion                  |
//!
//! Joining node (untrusted)               Member
//!   |-------- connection request ---------->|
//!   |<------- push p1, push p2 -------------|
//!   |<------- file <addr>.p1, <addr>.p2 ----|
//!   |           completion                  |
//! ```
//!
//! ## Key Types
//!
//! - [`ProtocolStateMachine`] - Transport event sink driving the exchange
//! - [`TransportChannel`] / [`ChannelEvents`] - The transport contract
//! - [`PendingSet`] - Outstanding work that reports when it empties
//! - [`Latch`] / [`TaskHandle`] - Fire-once guards and cancellable loops

pub mod error;
pub mod pending;
pub mod protocol;
pub mod signal;
pub mod transport;

pub use error::{Result, SyncError};
pub use pending::{PendingSet, Removed};
pub use protocol::{MachineConfig, ProtocolStateMachine, SessionHooks};
pub use signal::{Latch, StopSignal, TaskHandle};
pub use transport::{
    memory::{MemoryChannel, MemoryNetwork, SentMessage},
    ChannelEvents, FileAdmission, TransportChannel, TransportConnector,
};
