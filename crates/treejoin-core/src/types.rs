//! Strong type definitions for treejoin.
//!
//! Identifiers and addresses are newtypes so they cannot be swapped by mistake.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identification value reserved for the whole-tree snapshot.
pub const MODEL_ID: &str = "MODEL";

/// Identification of a tracked object (file, directory or peer).
///
/// Regular identifications are 32 random bytes, hex encoded. The value
/// [`MODEL_ID`] is reserved and names the serialized snapshot of a whole tree.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectId(String);

impl ObjectId {
    /// Wrap an existing identification.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh random identification.
    pub fn random() -> Self {
        use rand::Rng;
        let bytes: [u8; 32] = rand::thread_rng().gen();
        Self(hex::encode(bytes))
    }

    /// The whole-tree snapshot sentinel.
    pub fn model() -> Self {
        Self(MODEL_ID.to_string())
    }

    /// Whether this is the whole-tree snapshot sentinel.
    pub fn is_model(&self) -> bool {
        self.0 == MODEL_ID
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId({})", short(&self.0))
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ObjectId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A connectable transport address.
///
/// Addresses never contain a `.`, which keeps staged file names
/// (`<address>.<identification>`) unambiguous.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Address(String);

impl Address {
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First eight characters, for log lines.
    pub fn short(&self) -> &str {
        short(&self.0)
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self.short())
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Address {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

fn short(s: &str) -> &str {
    match s.char_indices().nth(8) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_ids_are_hex_and_distinct() {
        let a = ObjectId::random();
        let b = ObjectId::random();
        assert_eq!(a.as_str().len(), 64);
        assert!(a.as_str().chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }

    #[test]
    fn test_model_sentinel() {
        assert!(ObjectId::model().is_model());
        assert!(!ObjectId::new("obj1").is_model());
    }

    #[test]
    fn test_address_short() {
        let addr = Address::new("abcdef0123456789");
        assert_eq!(addr.short(), "abcdef01");
        assert_eq!(Address::new("abc").short(), "abc");
    }

    #[test]
    fn test_transparent_serde() {
        let id = ObjectId::new("obj1");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"obj1\"");
    }
}
