//! Peer descriptors.

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::types::{Address, ObjectId};

/// A member of the shared-directory network.
///
/// A peer is created once when a bootstrap session is created and never
/// changes afterwards. The JSON form is what gets sent along with a connection
/// request and what is written into the peer roster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Peer {
    pub identification: ObjectId,
    pub name: String,
    pub address: Address,
    pub trusted: bool,
}

impl Peer {
    /// Create a peer with a fresh random identification.
    pub fn create(name: impl Into<String>, address: Address, trusted: bool) -> Self {
        Self {
            identification: ObjectId::random(),
            name: name.into(),
            address,
            trusted,
        }
    }

    /// File name this peer is stored under in a roster directory.
    pub fn roster_file_name(&self) -> String {
        format!("{}.json", self.identification)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(data: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(data)?)
    }
}
