//! Address resolution over path queries.
//!
//! Results are grouped by the address-level node that produced them and
//! ordered by ascending index at every level, so the same query on an
//! unchanged store always yields the same sequence.

use std::sync::Arc;

use hdtree_core::constants::{EXTERNAL, INTERNAL};
use hdtree_core::path::{AddressFamily, Addressing, QuerySegment, all_wildcards};
use hdtree_core::types::{DerivationLevel, KeyDerivationId};
use hdtree_store::addresses::GetAddress;
use hdtree_store::derivations::GetDerivationsByPath;
use hdtree_store::outputs::GetTxOutputs;
use hdtree_store::{StoreTx, TableSet, deps};

use crate::deriver::{DeriverCore, HasChains};
use crate::error::WalletError;
use crate::usage::{self, NextUnusedAddress};

/// Tables read by address resolution.
pub fn tables() -> TableSet {
    deps![GetDerivationsByPath, GetAddress]
}

/// Addresses below `start` matching `query`.
///
/// `common_prefix` holds the indices from the root to `start`; it is
/// prepended to every result's addressing. The query must descend exactly
/// to the address level.
pub fn raw_get_addresses_by_path(
    tx: &StoreTx<'_>,
    start: KeyDerivationId,
    start_level: DerivationLevel,
    common_prefix: &[u32],
    query: &[QuerySegment],
) -> Result<Vec<AddressFamily>, WalletError> {
    if start_level.descend(query.len()) != Some(DerivationLevel::Address) {
        return Err(WalletError::StaleState(format!(
            "a query of depth {} below the {start_level} level does not end at addresses",
            query.len()
        )));
    }
    let prefix_len = u32::try_from(common_prefix.len()).unwrap_or(u32::MAX);
    let first_level = start_level
        .depth()
        .checked_sub(prefix_len)
        .and_then(|d| DerivationLevel::from_depth(d + 1))
        .ok_or_else(|| {
            WalletError::StaleState(format!(
                "prefix of {prefix_len} indices is longer than the path to the {start_level} level"
            ))
        })?;

    let mut families = Vec::new();
    for (indices, node) in GetDerivationsByPath::get_by_query(tx, start, query)? {
        let addrs = GetAddress::from_canonical(tx, node.id)?;
        if addrs.is_empty() {
            return Err(WalletError::NotFound(format!(
                "address row of derivation {}",
                node.id
            )));
        }
        let mut path = common_prefix.to_vec();
        path.extend(indices);
        families.push(AddressFamily {
            addressing: Addressing {
                path,
                start_level: first_level,
            },
            derivation: node,
            addrs,
        });
    }
    Ok(families)
}

/// Every address family of the deriver. Accounts list the receiving chain
/// before the change chain.
pub fn raw_get_all_utxo_addresses(
    tx: &StoreTx<'_>,
    core: &DeriverCore,
) -> Result<Vec<AddressFamily>, WalletError> {
    let level = core.level();
    if level == DerivationLevel::Account {
        let mut families = raw_get_addresses_for_chain(tx, core, EXTERNAL)?;
        families.extend(raw_get_addresses_for_chain(tx, core, INTERNAL)?);
        return Ok(families);
    }
    let depth = DerivationLevel::Address
        .depth()
        .checked_sub(level.depth())
        .unwrap_or_default() as usize;
    raw_get_addresses_by_path(
        tx,
        core.node_id(),
        level,
        core.path_to_public(),
        &all_wildcards(depth),
    )
}

/// Address families of one chain below an account deriver.
pub fn raw_get_addresses_for_chain(
    tx: &StoreTx<'_>,
    core: &DeriverCore,
    chain: u32,
) -> Result<Vec<AddressFamily>, WalletError> {
    core.require_level(DerivationLevel::Account, "chain lookup")?;
    raw_get_addresses_by_path(
        tx,
        core.node_id(),
        DerivationLevel::Account,
        core.path_to_public(),
        &[QuerySegment::Fixed(chain), QuerySegment::Wildcard],
    )
}

/// Chain access of an account-level deriver.
#[derive(Debug, Clone)]
pub struct AccountChains {
    core: Arc<DeriverCore>,
}

impl AccountChains {
    pub(crate) fn new(core: Arc<DeriverCore>) -> Self {
        Self { core }
    }
}

impl HasChains for AccountChains {
    fn get_addresses_for_chain(&self, chain: u32) -> Result<Vec<AddressFamily>, WalletError> {
        self.core
            .atomically(tables(), |tx| raw_get_addresses_for_chain(tx, &self.core, chain))
    }

    fn get_next_unused_for_chain(&self, chain: u32) -> Result<NextUnusedAddress, WalletError> {
        self.core
            .atomically(tables().union(deps![GetTxOutputs]), |tx| {
                usage::raw_next_unused_for_chain(tx, &self.core, chain)
            })
    }
}
