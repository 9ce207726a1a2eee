//! # treejoin core
//!
//! Plain data types shared by every treejoin crate. No I/O happens here.
//!
//! ## Key Types
//!
//! - [`Peer`] - A member of the network, as sent with a join request
//! - [`ObjectInfo`] - A node of a tree snapshot
//! - [`UpdateMessage`] - One change derived from diffing two snapshots
//! - [`Message`] - Text messages on the wire (`request`, `push`, `lock`)
//! - [`StagedName`] - `<address>.<identification>` names of staged files
//! - [`Layout`] - Where a root keeps its roster, identity and staging areas

pub mod error;
pub mod layout;
pub mod message;
pub mod naming;
pub mod object;
pub mod peer;
pub mod types;

pub use error::{CoreError, Result};
pub use layout::{Layout, DOT_DIR};
pub use message::{LockMessage, Message, PushMessage, RequestKind, RequestMessage};
pub use naming::StagedName;
pub use object::{ObjectInfo, Operation, UpdateMessage};
pub use peer::Peer;
pub use types::{Address, ObjectId, MODEL_ID};
