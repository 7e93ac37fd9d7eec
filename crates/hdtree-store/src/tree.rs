//! Insertion of subtrees into the derivation tree.
//!
//! Nodes are written level by level, every parent before its children. A
//! described node whose `(parent, index)` already exists is reused and its
//! children are merged below it, so inserting the same description twice
//! creates nothing the second time. Any failure aborts the enclosing
//! transaction, which discards the levels already written.

use std::collections::{HashSet, VecDeque};

use hdtree_core::error::HdError;
use hdtree_core::tree::{KeyInsert, LevelInsert, TreeInsert};
use hdtree_core::types::{
    DerivationLevel, DerivationTables, KeyDerivationId, KeyDerivationRow, LevelSpecific,
};

use crate::addresses::AddAddress;
use crate::derivations::{GetChildren, GetKeyDerivation};
use crate::keys::AddKey;
use crate::schema::{Dependency, Table};
use crate::specific::ModifyDerivationSpecific;
use crate::tx::StoreTx;

const DERIVATION_COUNTER: &str = "next_key_derivation_id";

/// A chain node touched by an insert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainTouch {
    pub chain_id: KeyDerivationId,
    pub index: u32,
    /// Highest address index the description marked as used.
    pub max_used_index: Option<u32>,
}

/// Result of merging a subtree into the tree.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InsertOutcome {
    /// Newly created nodes, in creation order.
    pub inserted: Vec<KeyDerivationId>,
    pub chains: Vec<ChainTouch>,
}

pub struct AddDerivationTree;

impl Dependency for AddDerivationTree {
    const TABLES: &'static [Table] = &[
        Table::KeyDerivation,
        Table::KeyDerivationChild,
        Table::Key,
        Table::Address,
        Table::AddressByHash,
        Table::AddressMapping,
        Table::Metadata,
    ];
}

impl AddDerivationTree {
    /// Create a root node.
    pub fn insert_root(
        tx: &StoreTx<'_>,
        private_key: Option<&KeyInsert>,
        public_key: Option<&KeyInsert>,
        tables: &DerivationTables,
    ) -> Result<KeyDerivationRow, HdError> {
        let row = KeyDerivationRow {
            id: KeyDerivationId(tx.next_id(DERIVATION_COUNTER)?),
            parent: None,
            index: None,
            level: DerivationLevel::Root,
            private_key_id: private_key.map(|k| AddKey::add(tx, k)).transpose()?.map(|k| k.id),
            public_key_id: public_key.map(|k| AddKey::add(tx, k)).transpose()?.map(|k| k.id),
        };
        tx.put(Table::KeyDerivation, &row.id.to_key(), &row)?;
        ModifyDerivationSpecific::put(tx, row.id, &LevelSpecific::Root, tables)?;
        Ok(row)
    }

    /// Merge `children` below the existing node `parent`.
    pub fn excluding_parent(
        tx: &StoreTx<'_>,
        parent: KeyDerivationId,
        children: &[TreeInsert],
        tables: &DerivationTables,
    ) -> Result<InsertOutcome, HdError> {
        let parent = GetKeyDerivation::require(tx, parent)?;
        let mut outcome = InsertOutcome::default();
        let mut queue: VecDeque<(KeyDerivationRow, &[TreeInsert])> = VecDeque::new();
        queue.push_back((parent, children));

        while let Some((parent, children)) = queue.pop_front() {
            if children.is_empty() {
                continue;
            }
            let level = parent.level.child().ok_or_else(|| {
                HdError::invalid_tree(format!("derivation {} cannot have children", parent.id))
            })?;
            let mut seen = HashSet::with_capacity(children.len());
            for child in children {
                if !seen.insert(child.index) {
                    return Err(HdError::invalid_tree(format!(
                        "duplicate index {} under derivation {}",
                        child.index, parent.id
                    )));
                }
                if child.insert.level() != level {
                    return Err(HdError::invalid_tree(format!(
                        "{} payload at index {} where a {level} node belongs",
                        child.insert.level(),
                        child.index
                    )));
                }
            }
            if level == DerivationLevel::Address {
                Self::check_contiguous(tx, parent.id, children)?;
            }
            for child in children {
                let row = match GetChildren::child_for_update(tx, parent.id, child.index)? {
                    Some(existing) => existing,
                    None => {
                        let row = Self::insert_node(tx, &parent, child, level, tables)?;
                        outcome.inserted.push(row.id);
                        row
                    }
                };
                if level == DerivationLevel::Chain {
                    outcome.chains.push(ChainTouch {
                        chain_id: row.id,
                        index: child.index,
                        max_used_index: child.max_used_child(),
                    });
                }
                queue.push_back((row, child.children.as_slice()));
            }
        }
        tracing::debug!(
            inserted = outcome.inserted.len(),
            chains = outcome.chains.len(),
            "derivation tree merged"
        );
        Ok(outcome)
    }

    /// Address indices of a chain run from zero without holes, so a chain's
    /// child count is one past its highest index. New indices must continue
    /// from the persisted count.
    fn check_contiguous(
        tx: &StoreTx<'_>,
        chain: KeyDerivationId,
        children: &[TreeInsert],
    ) -> Result<(), HdError> {
        let persisted = GetChildren::count(tx, chain)?;
        let mut fresh: Vec<u32> = children
            .iter()
            .map(|c| c.index)
            .filter(|&i| i >= persisted)
            .collect();
        fresh.sort_unstable();
        for (expected, index) in (persisted..).zip(fresh) {
            if index != expected {
                return Err(HdError::invalid_tree(format!(
                    "address index {index} under chain {chain} leaves a gap at {expected}"
                )));
            }
        }
        Ok(())
    }

    fn insert_node(
        tx: &StoreTx<'_>,
        parent: &KeyDerivationRow,
        child: &TreeInsert,
        level: DerivationLevel,
        tables: &DerivationTables,
    ) -> Result<KeyDerivationRow, HdError> {
        let private_key_id = child
            .private_key
            .as_ref()
            .map(|k| AddKey::add(tx, k))
            .transpose()?
            .map(|k| k.id);
        let public_key_id = child
            .public_key
            .as_ref()
            .map(|k| AddKey::add(tx, k))
            .transpose()?
            .map(|k| k.id);
        let row = KeyDerivationRow {
            id: KeyDerivationId(tx.next_id(DERIVATION_COUNTER)?),
            parent: Some(parent.id),
            index: Some(child.index),
            level,
            private_key_id,
            public_key_id,
        };
        tx.put(Table::KeyDerivation, &row.id.to_key(), &row)?;
        GetChildren::link(tx, parent.id, child.index, row.id)?;
        ModifyDerivationSpecific::put(tx, row.id, &child.insert.specific(), tables)?;

        if let LevelInsert::Address { addresses, .. } = &child.insert {
            if addresses.is_empty() {
                return Err(HdError::invalid_tree(format!(
                    "address node {} has no address",
                    child.index
                )));
            }
            for address in addresses {
                let stored = AddAddress::add_by_hash(tx, address)?;
                AddAddress::link(tx, row.id, stored.id)?;
            }
        }
        Ok(row)
    }
}
