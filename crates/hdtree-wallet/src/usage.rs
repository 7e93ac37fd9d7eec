//! Joins addresses against recorded transaction outputs.
//!
//! An address counts as used once an output of a successful transaction
//! pays to it. The lowest unused index of a chain is its frontier: the next
//! address to show a user and the point a scan starts from.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use serde::Serialize;

use hdtree_core::address::AddressType;
use hdtree_core::path::{AddressFamily, Addressing};
use hdtree_core::types::{AddressId, AddressRow, KeyDerivationRow, TxOutputRow, TxState};
use hdtree_store::addresses::GetAddress;
use hdtree_store::outputs::{AddTxOutput, GetTxOutputs};
use hdtree_store::{StoreTx, TableSet, TreeStore, deps};

use crate::deriver::{AllUtxos, DeriverCore};
use crate::error::WalletError;
use crate::resolver;

/// Frontier of one chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NextUnused {
    pub index: u32,
    /// `None` when every persisted address is used and the frontier lies one
    /// past the last of them.
    pub address_info: Option<AddressFamily>,
}

/// The address of the primary type at a chain's frontier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChainAddress {
    pub addr: AddressRow,
    pub derivation: KeyDerivationRow,
    pub addressing: Addressing,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NextUnusedAddress {
    pub index: u32,
    pub address_info: Option<ChainAddress>,
}

/// An unspent output with the addressing of the address it pays to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AddressedUtxo {
    pub output: TxOutputRow,
    pub addressing: Addressing,
    pub address: String,
}

fn family_is_used(tx: &StoreTx<'_>, family: &AddressFamily) -> Result<bool, WalletError> {
    let ids: Vec<AddressId> = family.addrs.iter().map(|a| a.id).collect();
    Ok(GetTxOutputs::for_addresses(tx, &ids)?
        .iter()
        .any(TxOutputRow::marks_usage))
}

/// Lowest index in `families` (one chain, ascending) without usage.
pub fn raw_get_next_unused_index(
    tx: &StoreTx<'_>,
    families: &[AddressFamily],
) -> Result<NextUnused, WalletError> {
    for family in families {
        if !family_is_used(tx, family)? {
            let index = family.addressing.index().ok_or_else(|| {
                WalletError::NotFound(format!("index of derivation {}", family.derivation.id))
            })?;
            return Ok(NextUnused {
                index,
                address_info: Some(family.clone()),
            });
        }
    }
    let index = families
        .last()
        .and_then(|f| f.addressing.index())
        .map_or(0, |i| i.saturating_add(1));
    Ok(NextUnused {
        index,
        address_info: None,
    })
}

/// Frontier of `chain` resolved to the wallet's primary address type.
pub fn raw_next_unused_for_chain(
    tx: &StoreTx<'_>,
    core: &DeriverCore,
    chain: u32,
) -> Result<NextUnusedAddress, WalletError> {
    let families = resolver::raw_get_addresses_for_chain(tx, core, chain)?;
    let next = raw_get_next_unused_index(tx, &families)?;
    let Some(family) = next.address_info else {
        return Ok(NextUnusedAddress {
            index: next.index,
            address_info: None,
        });
    };
    let primary = primary_address_type(core);
    let mut matching = family.addrs.into_iter().filter(|a| a.kind == primary);
    let addr = match (matching.next(), matching.next()) {
        (Some(addr), None) => addr,
        _ => {
            return Err(WalletError::NotFound(format!(
                "exactly one {primary} address at index {} of chain {chain}",
                next.index
            )));
        }
    };
    Ok(NextUnusedAddress {
        index: next.index,
        address_info: Some(ChainAddress {
            addr,
            derivation: family.derivation,
            addressing: family.addressing,
        }),
    })
}

fn primary_address_type(core: &DeriverCore) -> AddressType {
    core.wallet().address_type
}

/// Unspent outputs paying to the deriver's addresses.
pub fn raw_get_all_utxos(
    tx: &StoreTx<'_>,
    core: &DeriverCore,
) -> Result<Vec<AddressedUtxo>, WalletError> {
    let families = resolver::raw_get_all_utxo_addresses(tx, core)?;
    let by_id: HashMap<AddressId, (&Addressing, &str)> = families
        .iter()
        .flat_map(|f| f.addrs.iter().map(move |a| (a.id, (&f.addressing, a.hash.as_str()))))
        .collect();
    // Nodes sharing an address hash share its row; join each row once.
    let ids: Vec<AddressId> = families
        .iter()
        .flat_map(|f| f.addrs.iter().map(|a| a.id))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    let mut utxos = Vec::new();
    for output in GetTxOutputs::for_addresses(tx, &ids)? {
        if !(output.is_unspent && output.marks_usage()) {
            continue;
        }
        let (addressing, address) = by_id.get(&output.address_id).ok_or_else(|| {
            WalletError::NotFound(format!("addressing of address {}", output.address_id))
        })?;
        utxos.push(AddressedUtxo {
            addressing: (*addressing).clone(),
            address: (*address).to_string(),
            output,
        });
    }
    Ok(utxos)
}

/// Address listing and UTXO lookup, available on every deriver.
#[derive(Debug, Clone)]
pub struct AllUtxoAddresses {
    core: Arc<DeriverCore>,
}

impl AllUtxoAddresses {
    pub(crate) fn new(core: Arc<DeriverCore>) -> Self {
        Self { core }
    }
}

impl AllUtxos for AllUtxoAddresses {
    fn get_all_utxo_addresses(&self) -> Result<Vec<AddressFamily>, WalletError> {
        self.core.atomically(resolver::tables(), |tx| {
            resolver::raw_get_all_utxo_addresses(tx, &self.core)
        })
    }

    fn get_all_utxos(&self) -> Result<Vec<AddressedUtxo>, WalletError> {
        self.core
            .atomically(resolver::tables().union(deps![GetTxOutputs]), |tx| {
                raw_get_all_utxos(tx, &self.core)
            })
    }
}

/// An output to record against a known address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewOutput {
    pub address: String,
    pub txid: String,
    pub output_index: u32,
    pub amount: u64,
    pub state: TxState,
    pub is_unspent: bool,
}

fn record_tables() -> TableSet {
    deps![GetAddress, AddTxOutput]
}

/// Attach an output to the address with hash `output.address`.
pub fn record_output(store: &TreeStore, output: &NewOutput) -> Result<TxOutputRow, WalletError> {
    store.atomically(record_tables(), |tx| {
        let address = GetAddress::by_hash(tx, &output.address)?
            .ok_or_else(|| WalletError::NotFound(format!("address {}", output.address)))?;
        let row = TxOutputRow {
            address_id: address.id,
            txid: output.txid.clone(),
            output_index: output.output_index,
            amount: output.amount,
            state: output.state,
            is_unspent: output.is_unspent,
        };
        AddTxOutput::add(tx, &row)?;
        tracing::debug!(address = %output.address, txid = %output.txid, "output recorded");
        Ok(row)
    })
}
