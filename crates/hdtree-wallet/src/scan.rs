//! Account scanning.
//!
//! A scan runs in one transaction and moves through fixed stages:
//!
//! ```text
//! Init -> KeyResolved -> FrontierComputed -> CandidatesFound -> Persisted -> Done
//! ```
//!
//! Any failure aborts the transaction, so the frontier that bounded the scan
//! and the nodes it inserted are always committed together or not at all.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use hdtree_core::constants::{EXTERNAL, INTERNAL};
use hdtree_core::traits::{ScanAccountRequest, UsageChecker};
use hdtree_core::types::{DerivationLevel, KeyDerivationId};
use hdtree_store::outputs::GetTxOutputs;
use hdtree_store::wallets::GetKeyForPublicDeriver;
use hdtree_store::{StoreTx, TableSet, deps};

use crate::deriver::{DeriverCore, ScanAddresses, public_key_bytes, raw_get_public_key};
use crate::error::WalletError;
use crate::{extend, resolver, usage};

/// Progress of one scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum ScanStage {
    Init,
    KeyResolved,
    FrontierComputed,
    CandidatesFound,
    Persisted,
    Done,
}

impl fmt::Display for ScanStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Init => "init",
            Self::KeyResolved => "key-resolved",
            Self::FrontierComputed => "frontier-computed",
            Self::CandidatesFound => "candidates-found",
            Self::Persisted => "persisted",
            Self::Done => "done",
        };
        f.write_str(name)
    }
}

/// Result of a completed scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScanReport {
    pub stage: ScanStage,
    /// Frontiers the scan started from, as "last used" indices.
    pub last_used_external: Option<u32>,
    pub last_used_internal: Option<u32>,
    /// Address candidates the discovery returned.
    pub candidates: usize,
    pub inserted: Vec<KeyDerivationId>,
    pub cutoffs_raised: Vec<(KeyDerivationId, u32)>,
}

pub fn tables() -> TableSet {
    resolver::tables()
        .union(extend::tables())
        .union(deps![GetKeyForPublicDeriver, GetTxOutputs])
}

fn advance(stage: &mut ScanStage, next: ScanStage, core: &DeriverCore) {
    tracing::trace!(deriver = %core.id(), from = %stage, to = %next, "scan stage");
    *stage = next;
}

fn last_used(frontier: u32) -> Option<u32> {
    frontier.checked_sub(1)
}

/// Scan the account below `core` inside a caller's transaction.
pub fn raw_scan_addresses(
    tx: &StoreTx<'_>,
    core: &DeriverCore,
    checker: &dyn UsageChecker,
) -> Result<ScanReport, WalletError> {
    core.require_level(DerivationLevel::Account, "scanning")?;
    let mut stage = ScanStage::Init;

    let key_row = raw_get_public_key(tx, core)?;
    let account_key = public_key_bytes(core, &key_row)?;
    advance(&mut stage, ScanStage::KeyResolved, core);

    let external = resolver::raw_get_addresses_for_chain(tx, core, EXTERNAL)?;
    let internal = resolver::raw_get_addresses_for_chain(tx, core, INTERNAL)?;
    let last_used_external = last_used(usage::raw_get_next_unused_index(tx, &external)?.index);
    let last_used_internal = last_used(usage::raw_get_next_unused_index(tx, &internal)?.index);
    advance(&mut stage, ScanStage::FrontierComputed, core);

    let wallet = core.wallet();
    let tree = core.env.discovery.scan_account(&ScanAccountRequest {
        account_public_key: account_key.as_bytes(),
        last_used_internal,
        last_used_external,
        checker,
        protocol_magic: wallet.protocol_magic,
        address_type: wallet.address_type,
    })?;
    let candidates: usize = tree.iter().map(|chain| chain.children.len()).sum();
    advance(&mut stage, ScanStage::CandidatesFound, core);

    let outcome = extend::raw_add_from_public(tx, core, &tree, true)?;
    advance(&mut stage, ScanStage::Persisted, core);

    advance(&mut stage, ScanStage::Done, core);
    tracing::info!(
        deriver = %core.id(),
        candidates,
        inserted = outcome.inserted.len(),
        raised = outcome.cutoffs_raised.len(),
        "address scan complete"
    );
    Ok(ScanReport {
        stage,
        last_used_external,
        last_used_internal,
        candidates,
        inserted: outcome.inserted,
        cutoffs_raised: outcome.cutoffs_raised,
    })
}

/// Scanning of an account-level deriver with a stored public key.
#[derive(Debug, Clone)]
pub struct UtxoAccountScan {
    core: Arc<DeriverCore>,
}

impl UtxoAccountScan {
    pub(crate) fn new(core: Arc<DeriverCore>) -> Self {
        Self { core }
    }
}

impl ScanAddresses for UtxoAccountScan {
    fn scan_addresses(&self, checker: &dyn UsageChecker) -> Result<ScanReport, WalletError> {
        self.core
            .atomically(tables(), |tx| raw_scan_addresses(tx, &self.core, checker))
    }
}
