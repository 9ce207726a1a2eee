//! Names of files staged while a transfer is in flight.
//!
//! A received file is staged as `<senderAddress>.<objectIdentification>` so
//! that the completed transfer can be matched to its sender and to the object
//! that was requested. Addresses never contain a `.`, so the name is split on
//! the first one.

use std::fmt;

use crate::error::{CoreError, Result};
use crate::types::{Address, ObjectId};

const SEPARATOR: char = '.';

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StagedName {
    pub sender: Address,
    pub identification: ObjectId,
}

impl StagedName {
    pub fn new(sender: Address, identification: ObjectId) -> Self {
        Self {
            sender,
            identification,
        }
    }

    /// Split an encoded name on its first separator.
    pub fn parse(name: &str) -> Result<Self> {
        match name.split_once(SEPARATOR) {
            Some((sender, id)) if !sender.is_empty() && !id.is_empty() => Ok(Self {
                sender: Address::new(sender),
                identification: ObjectId::new(id),
            }),
            _ => Err(CoreError::MalformedStagedName(name.to_string())),
        }
    }
}

impl fmt::Display for StagedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.sender, SEPARATOR, self.identification)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format() {
        let name = StagedName::new(Address::new("aa11"), ObjectId::new("obj1"));
        assert_eq!(name.to_string(), "aa11.obj1");
    }

    #[test]
    fn test_parse_splits_on_first_separator() {
        let name = StagedName::parse("aa11.peer.json").unwrap();
        assert_eq!(name.sender, Address::new("aa11"));
        assert_eq!(name.identification, ObjectId::new("peer.json"));
    }

    #[test]
    fn test_parse_rejects_missing_parts() {
        assert!(StagedName::parse("noseparator").is_err());
        assert!(StagedName::parse(".obj1").is_err());
        assert!(StagedName::parse("aa11.").is_err());
    }

    proptest::proptest! {
        #[test]
        fn test_identification_may_contain_separators(
            sender in "[0-9a-f]{1,64}",
            id in "[a-z0-9.]{0,30}[a-z0-9]",
        ) {
            let name = StagedName::new(Address::new(sender.clone()), ObjectId::new(id.clone()));
            let parsed = StagedName::parse(&name.to_string()).unwrap();
            proptest::prop_assert_eq!(parsed.sender.as_str(), sender.as_str());
            proptest::prop_assert_eq!(parsed.identification.as_str(), id.as_str());
        }
    }
}
