//! Display cutoff of chain nodes.
//!
//! A chain's cutoff `c` and its persisted child count `n` satisfy
//! `0 <= c <= n`. The writer keeps address indices contiguous from zero, so
//! the child at every index below `n` exists. Addresses with an index below `c` are displayed; the rest
//! are reserved headroom. Every operation here reads the chain record for
//! update, so two transactions moving the same cutoff conflict at commit.

use hdtree_core::error::HdError;
use hdtree_core::types::{
    AddressRow, DerivationLevel, DerivationTables, KeyDerivationId, KeyDerivationRow,
    LevelSpecific,
};

use crate::addresses::GetAddress;
use crate::derivations::{GetChildren, GetPathWithSpecific};
use crate::schema::{Dependency, Table};
use crate::specific::{GetDerivationSpecific, ModifyDerivationSpecific};
use crate::tree::ChainTouch;
use crate::tx::StoreTx;

/// The address exposed by a pop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoppedAddress {
    pub index: u32,
    pub derivation: KeyDerivationRow,
    pub addrs: Vec<AddressRow>,
}

pub struct ModifyDisplayCutoff;

impl Dependency for ModifyDisplayCutoff {
    const TABLES: &'static [Table] = &[
        Table::KeyDerivation,
        Table::KeyDerivationChild,
        Table::Address,
        Table::AddressByHash,
        Table::AddressMapping,
    ];
}

impl ModifyDisplayCutoff {
    fn chain(
        tx: &StoreTx<'_>,
        start: KeyDerivationId,
        path_to_level: &[u32],
        tables: &DerivationTables,
    ) -> Result<(KeyDerivationRow, Option<u32>), HdError> {
        let found = GetPathWithSpecific::get_path(
            tx,
            start,
            path_to_level,
            DerivationLevel::Chain,
            |tx, node| {
                GetDerivationSpecific::require_for_update(
                    tx,
                    node.id,
                    DerivationLevel::Chain,
                    tables,
                )
            },
        )?
        .ok_or_else(|| HdError::not_found(format!("chain {path_to_level:?} below {start}")))?;
        let cutoff = found.specific.display_cutoff();
        let chain = found
            .path
            .into_iter()
            .last()
            .ok_or_else(|| HdError::not_found("empty chain path"))?;
        Ok((chain, cutoff))
    }

    fn write(
        tx: &StoreTx<'_>,
        chain: KeyDerivationId,
        cutoff: u32,
        tables: &DerivationTables,
    ) -> Result<(), HdError> {
        ModifyDerivationSpecific::put(
            tx,
            chain,
            &LevelSpecific::Chain {
                display_cutoff: Some(cutoff),
            },
            tables,
        )
    }

    /// Current cutoff of the chain at `path_to_level` below `start`.
    pub fn get(
        tx: &StoreTx<'_>,
        start: KeyDerivationId,
        path_to_level: &[u32],
        tables: &DerivationTables,
    ) -> Result<u32, HdError> {
        let (chain, cutoff) = Self::chain(tx, start, path_to_level, tables)?;
        cutoff.ok_or_else(|| HdError::not_found(format!("display cutoff of chain {}", chain.id)))
    }

    /// Expose the address at the cutoff and advance the cutoff by one.
    ///
    /// Returns `None` when the cutoff already equals the number of persisted
    /// addresses.
    pub fn pop(
        tx: &StoreTx<'_>,
        start: KeyDerivationId,
        path_to_level: &[u32],
        tables: &DerivationTables,
    ) -> Result<Option<PoppedAddress>, HdError> {
        let (chain, cutoff) = Self::chain(tx, start, path_to_level, tables)?;
        let cutoff = cutoff
            .ok_or_else(|| HdError::not_found(format!("display cutoff of chain {}", chain.id)))?;
        let persisted = GetChildren::count(tx, chain.id)?;
        if cutoff >= persisted {
            return Ok(None);
        }
        let derivation = GetChildren::child(tx, chain.id, cutoff)?.ok_or_else(|| {
            HdError::not_found(format!("address {cutoff} of chain {}", chain.id))
        })?;
        let addrs = GetAddress::from_canonical(tx, derivation.id)?;
        if addrs.is_empty() {
            return Err(HdError::not_found(format!(
                "address row of derivation {}",
                derivation.id
            )));
        }
        Self::write(tx, chain.id, cutoff + 1, tables)?;
        Ok(Some(PoppedAddress {
            index: cutoff,
            derivation,
            addrs,
        }))
    }

    /// Overwrite the cutoff. The value is not clamped.
    pub fn set(
        tx: &StoreTx<'_>,
        start: KeyDerivationId,
        path_to_level: &[u32],
        new_index: u32,
        tables: &DerivationTables,
    ) -> Result<(), HdError> {
        let (chain, _) = Self::chain(tx, start, path_to_level, tables)?;
        Self::write(tx, chain.id, new_index, tables)
    }

    /// Raise the cutoff of every touched chain so that it covers the last
    /// address marked used plus `headroom` more, never past the persisted
    /// children. Returns the chains whose cutoff moved, with the new value.
    pub fn raise_from_insert(
        tx: &StoreTx<'_>,
        chains: &[ChainTouch],
        headroom: u32,
        tables: &DerivationTables,
    ) -> Result<Vec<(KeyDerivationId, u32)>, HdError> {
        let mut moved = Vec::new();
        for touch in chains {
            let Some(max_used) = touch.max_used_index else {
                continue;
            };
            let specific = GetDerivationSpecific::require_for_update(
                tx,
                touch.chain_id,
                DerivationLevel::Chain,
                tables,
            )?;
            let current = specific.display_cutoff().unwrap_or(0);
            let persisted = GetChildren::count(tx, touch.chain_id)?;
            let candidate = max_used
                .saturating_add(1)
                .saturating_add(headroom)
                .min(persisted);
            if candidate > current {
                Self::write(tx, touch.chain_id, candidate, tables)?;
                moved.push((touch.chain_id, candidate));
            }
        }
        Ok(moved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::derivations::GetDerivationsByPath;
    use crate::storage::TreeStore;
    use crate::tree::AddDerivationTree;
    use crate::TableSet;
    use hdtree_core::address::AddressType;
    use hdtree_core::tree::{LevelInsert, TreeInsert};
    use hdtree_core::types::DerivationScheme;

    fn tables() -> DerivationTables {
        DerivationTables::for_scheme(DerivationScheme::Bip44)
    }

    fn declared() -> TableSet {
        crate::deps![AddDerivationTree, ModifyDisplayCutoff, GetDerivationsByPath]
            .with_derivation_tables(&tables())
    }

    /// Store with one account holding chain 0 with `n` addresses and the given cutoff.
    fn account_store(n: u32, cutoff: u32) -> (TreeStore, tempfile::TempDir, KeyDerivationId) {
        let dir = tempfile::tempdir().unwrap();
        let store = TreeStore::open(dir.path().join("tree")).unwrap();
        let account = store
            .atomically::<_, HdError, _>(declared(), |tx| {
                let root = AddDerivationTree::insert_root(tx, None, None, &tables())?;
                let chain = TreeInsert::new(0, LevelInsert::Chain { display_cutoff: cutoff })
                    .with_children(
                        (0..n)
                            .map(|i| {
                                TreeInsert::address(i, format!("a{i}"), AddressType::Legacy, false)
                            })
                            .collect(),
                    );
                let desc = vec![TreeInsert::new(1, LevelInsert::Purpose).with_children(vec![
                    TreeInsert::new(2, LevelInsert::CoinType).with_children(vec![
                        TreeInsert::new(3, LevelInsert::Account).with_children(vec![chain]),
                    ]),
                ])];
                AddDerivationTree::excluding_parent(tx, root.id, &desc, &tables())?;
                let path = GetDerivationsByPath::get_single_path(tx, root.id, &[1, 2, 3])?;
                Ok(path[3].id)
            })
            .unwrap();
        (store, dir, account)
    }

    fn pop(store: &TreeStore, account: KeyDerivationId) -> Option<PoppedAddress> {
        store
            .atomically::<_, HdError, _>(declared(), |tx| {
                ModifyDisplayCutoff::pop(tx, account, &[0], &tables())
            })
            .unwrap()
    }

    fn get(store: &TreeStore, account: KeyDerivationId) -> u32 {
        store
            .atomically::<_, HdError, _>(declared(), |tx| {
                ModifyDisplayCutoff::get(tx, account, &[0], &tables())
            })
            .unwrap()
    }

    #[test]
    fn pop_exposes_the_address_at_the_cutoff() {
        let (store, _dir, account) = account_store(3, 1);
        let popped = pop(&store, account).unwrap();
        assert_eq!(popped.index, 1);
        assert_eq!(popped.addrs[0].hash, "a1");
        assert_eq!(get(&store, account), 2);
    }

    #[test]
    fn pop_stops_at_persisted_count() {
        let (store, _dir, account) = account_store(2, 0);
        assert_eq!(pop(&store, account).unwrap().index, 0);
        assert_eq!(pop(&store, account).unwrap().index, 1);
        assert!(pop(&store, account).is_none());
        assert_eq!(get(&store, account), 2);
    }

    #[test]
    fn set_overwrites_without_clamping() {
        let (store, _dir, account) = account_store(2, 0);
        store
            .atomically::<_, HdError, _>(declared(), |tx| {
                ModifyDisplayCutoff::set(tx, account, &[0], 7, &tables())
            })
            .unwrap();
        assert_eq!(get(&store, account), 7);
        assert!(pop(&store, account).is_none());
    }

    #[test]
    fn missing_chain_is_not_found() {
        let (store, _dir, account) = account_store(1, 0);
        let err = store
            .atomically::<_, HdError, _>(declared(), |tx| {
                ModifyDisplayCutoff::get(tx, account, &[1], &tables())
            })
            .unwrap_err();
        assert!(matches!(err, HdError::Tree(hdtree_core::error::TreeError::NotFound(_))));
    }

    #[test]
    fn wrong_depth_is_stale_state() {
        let (store, _dir, account) = account_store(1, 0);
        let err = store
            .atomically::<_, HdError, _>(declared(), |tx| {
                ModifyDisplayCutoff::get(tx, account, &[0, 0], &tables())
            })
            .unwrap_err();
        assert!(matches!(err, HdError::Tree(hdtree_core::error::TreeError::StaleState(_))));
    }

    #[test]
    fn raise_covers_used_plus_headroom() {
        let (store, _dir, account) = account_store(10, 1);
        let moved = store
            .atomically::<_, HdError, _>(declared(), |tx| {
                let chain = GetDerivationsByPath::get_single_path(tx, account, &[0])?[1].id;
                let touch = ChainTouch {
                    chain_id: chain,
                    index: 0,
                    max_used_index: Some(4),
                };
                ModifyDisplayCutoff::raise_from_insert(tx, &[touch], 1, &tables())
            })
            .unwrap();
        assert_eq!(moved.len(), 1);
        assert_eq!(get(&store, account), 6);
    }

    #[test]
    fn raise_never_lowers_or_exceeds_children() {
        let (store, _dir, account) = account_store(3, 2);
        let chain = store
            .atomically::<_, HdError, _>(declared(), |tx| {
                Ok(GetDerivationsByPath::get_single_path(tx, account, &[0])?[1].id)
            })
            .unwrap();
        let raise = |max_used| {
            store
                .atomically::<_, HdError, _>(declared(), |tx| {
                    let touch = ChainTouch {
                        chain_id: chain,
                        index: 0,
                        max_used_index: Some(max_used),
                    };
                    ModifyDisplayCutoff::raise_from_insert(tx, &[touch], 1, &tables())
                })
                .unwrap()
        };
        assert!(raise(0).is_empty());
        assert_eq!(get(&store, account), 2);
        assert_eq!(raise(2), vec![(chain, 3)]);
        assert_eq!(get(&store, account), 3);
    }
}
