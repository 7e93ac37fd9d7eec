//! Descriptions of subtrees to be added to the derivation tree.
//!
//! A [`TreeInsert`] is what the scan algorithm produces and what the tree
//! writer consumes. The writer merges it into the persisted tree: nodes whose
//! `(parent, index)` already exist are reused, everything else is created.

use crate::address::AddressType;
use crate::types::{DerivationLevel, LevelSpecific};

/// A key to store alongside a new node.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyInsert {
    /// Hex of the key bytes, encrypted when `is_encrypted`.
    pub hash: String,
    pub is_encrypted: bool,
    pub password_last_update: Option<i64>,
}

impl KeyInsert {
    /// An unencrypted (public) key.
    pub fn plain(bytes: &[u8]) -> Self {
        Self {
            hash: hex::encode(bytes),
            is_encrypted: false,
            password_last_update: None,
        }
    }
}

/// An address attached to a new address-level node.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AddressInsert {
    pub hash: String,
    pub kind: AddressType,
}

/// Level-specific payload of a described node.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LevelInsert {
    Purpose,
    CoinType,
    Account,
    Chain {
        display_cutoff: u32,
    },
    Address {
        addresses: Vec<AddressInsert>,
        /// Whether on-chain activity was observed when the node was described.
        used: bool,
    },
}

impl LevelInsert {
    pub fn level(&self) -> DerivationLevel {
        match self {
            Self::Purpose => DerivationLevel::Purpose,
            Self::CoinType => DerivationLevel::CoinType,
            Self::Account => DerivationLevel::Account,
            Self::Chain { .. } => DerivationLevel::Chain,
            Self::Address { .. } => DerivationLevel::Address,
        }
    }

    /// Record stored in the level-specific table.
    pub fn specific(&self) -> LevelSpecific {
        match self {
            Self::Purpose => LevelSpecific::Purpose,
            Self::CoinType => LevelSpecific::CoinType,
            Self::Account => LevelSpecific::Account,
            Self::Chain { display_cutoff } => LevelSpecific::Chain {
                display_cutoff: Some(*display_cutoff),
            },
            Self::Address { .. } => LevelSpecific::Address,
        }
    }
}

/// A node to add under some parent, with its own children.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TreeInsert {
    pub index: u32,
    pub insert: LevelInsert,
    pub private_key: Option<KeyInsert>,
    pub public_key: Option<KeyInsert>,
    pub children: Vec<TreeInsert>,
}

impl TreeInsert {
    pub fn new(index: u32, insert: LevelInsert) -> Self {
        Self {
            index,
            insert,
            private_key: None,
            public_key: None,
            children: Vec::new(),
        }
    }

    pub fn with_children(mut self, children: Vec<TreeInsert>) -> Self {
        self.children = children;
        self
    }

    pub fn with_public_key(mut self, key: KeyInsert) -> Self {
        self.public_key = Some(key);
        self
    }

    pub fn with_private_key(mut self, key: KeyInsert) -> Self {
        self.private_key = Some(key);
        self
    }

    /// An address leaf with a single address.
    pub fn address(index: u32, hash: String, kind: AddressType, used: bool) -> Self {
        Self::new(
            index,
            LevelInsert::Address {
                addresses: vec![AddressInsert { hash, kind }],
                used,
            },
        )
    }

    /// Number of nodes in this subtree, itself included.
    pub fn node_count(&self) -> usize {
        1 + self.children.iter().map(TreeInsert::node_count).sum::<usize>()
    }

    /// Highest child index marked as used, for chain nodes.
    pub fn max_used_child(&self) -> Option<u32> {
        self.children
            .iter()
            .filter(|c| matches!(c.insert, LevelInsert::Address { used: true, .. }))
            .map(|c| c.index)
            .max()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain_with(used: &[(u32, bool)]) -> TreeInsert {
        TreeInsert::new(0, LevelInsert::Chain { display_cutoff: 0 }).with_children(
            used.iter()
                .map(|(i, u)| TreeInsert::address(*i, format!("a{i}"), AddressType::Legacy, *u))
                .collect(),
        )
    }

    #[test]
    fn node_count_includes_self() {
        assert_eq!(chain_with(&[(0, false), (1, true)]).node_count(), 3);
    }

    #[test]
    fn max_used_child_ignores_unused() {
        let chain = chain_with(&[(0, true), (3, true), (5, false)]);
        assert_eq!(chain.max_used_child(), Some(3));
        assert_eq!(chain_with(&[(0, false)]).max_used_child(), None);
    }

    #[test]
    fn chain_payload_carries_cutoff() {
        let specific = LevelInsert::Chain { display_cutoff: 4 }.specific();
        assert_eq!(specific.display_cutoff(), Some(4));
        assert_eq!(specific.level(), DerivationLevel::Chain);
    }
}
