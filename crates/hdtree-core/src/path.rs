//! Path and query types used to walk the derivation tree.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::types::{AddressRow, DerivationLevel, KeyDerivationRow, LevelSpecific};

/// One step of a path query.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QuerySegment {
    /// Follow the child with exactly this index.
    Fixed(u32),
    /// Follow every child, in ascending index order.
    Wildcard,
}

impl From<u32> for QuerySegment {
    fn from(index: u32) -> Self {
        QuerySegment::Fixed(index)
    }
}

impl fmt::Display for QuerySegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fixed(i) => write!(f, "{i}"),
            Self::Wildcard => f.write_str("*"),
        }
    }
}

/// A query path made only of wildcards.
pub fn all_wildcards(len: usize) -> Vec<QuerySegment> {
    vec![QuerySegment::Wildcard; len]
}

/// Concrete derivation indices of a node, starting below the root.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Addressing {
    pub path: Vec<u32>,
    /// Level of the first index in `path`.
    pub start_level: DerivationLevel,
}

impl Addressing {
    /// Index of the node itself.
    pub fn index(&self) -> Option<u32> {
        self.path.last().copied()
    }

    /// Level of the node the path ends at.
    pub fn level(&self) -> Option<DerivationLevel> {
        self.path
            .len()
            .checked_sub(1)
            .and_then(|steps| self.start_level.descend(steps))
    }
}

impl fmt::Display for Addressing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("m")?;
        for index in &self.path {
            if crate::constants::is_hardened(*index) {
                write!(f, "/{}'", index - crate::constants::HARDENED)?;
            } else {
                write!(f, "/{index}")?;
            }
        }
        Ok(())
    }
}

/// Addresses produced by one address-level node.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressFamily {
    pub addressing: Addressing,
    pub derivation: KeyDerivationRow,
    pub addrs: Vec<AddressRow>,
}

/// A resolved path together with the level-specific record of its last node.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PathWithSpecific {
    pub path: Vec<KeyDerivationRow>,
    pub specific: LevelSpecific,
}

impl PathWithSpecific {
    /// The node the path ends at.
    pub fn target(&self) -> Option<&KeyDerivationRow> {
        self.path.last()
    }
}
