//! Display cutoff of an account's receiving chain.
//!
//! Only account-level derivers own a cutoff. The chain it applies to is the
//! receiving chain directly below the account.

use std::sync::Arc;

use hdtree_core::constants::EXTERNAL;
use hdtree_core::path::{AddressFamily, Addressing};
use hdtree_core::types::DerivationLevel;
use hdtree_store::cutoff::ModifyDisplayCutoff;
use hdtree_store::derivations::GetPathWithSpecific;
use hdtree_store::{StoreTx, TableSet, deps};

use crate::deriver::{DeriverCore, DisplayCutoff};
use crate::error::WalletError;

pub fn tables() -> TableSet {
    deps![ModifyDisplayCutoff, GetPathWithSpecific]
}

pub fn raw_get_cutoff(tx: &StoreTx<'_>, core: &DeriverCore) -> Result<u32, WalletError> {
    core.require_level(DerivationLevel::Account, "reading the display cutoff")?;
    Ok(ModifyDisplayCutoff::get(tx, core.node_id(), &[EXTERNAL], core.tables())?)
}

/// Expose the address at the cutoff and advance it.
pub fn raw_pop_address(tx: &StoreTx<'_>, core: &DeriverCore) -> Result<AddressFamily, WalletError> {
    core.require_level(DerivationLevel::Account, "popping an address")?;
    let popped = ModifyDisplayCutoff::pop(tx, core.node_id(), &[EXTERNAL], core.tables())?
        .ok_or(WalletError::UnusedAddresses)?;
    let mut path = core.path_to_public().to_vec();
    path.extend([EXTERNAL, popped.index]);
    tracing::debug!(deriver = %core.id(), index = popped.index, "address popped");
    Ok(AddressFamily {
        addressing: Addressing {
            path,
            start_level: DerivationLevel::Purpose,
        },
        derivation: popped.derivation,
        addrs: popped.addrs,
    })
}

/// Overwrite the cutoff. Callers keep it within the persisted address count.
pub fn raw_set_cutoff(
    tx: &StoreTx<'_>,
    core: &DeriverCore,
    new_index: u32,
) -> Result<(), WalletError> {
    core.require_level(DerivationLevel::Account, "setting the display cutoff")?;
    ModifyDisplayCutoff::set(tx, core.node_id(), &[EXTERNAL], new_index, core.tables())?;
    Ok(())
}

#[derive(Debug, Clone)]
pub struct AccountCutoff {
    core: Arc<DeriverCore>,
}

impl AccountCutoff {
    pub(crate) fn new(core: Arc<DeriverCore>) -> Self {
        Self { core }
    }
}

impl DisplayCutoff for AccountCutoff {
    fn get_cutoff(&self) -> Result<u32, WalletError> {
        self.core.atomically(tables(), |tx| raw_get_cutoff(tx, &self.core))
    }

    fn pop_address(&self) -> Result<AddressFamily, WalletError> {
        self.core.atomically(tables(), |tx| raw_pop_address(tx, &self.core))
    }

    fn set_cutoff(&self, new_index: u32) -> Result<(), WalletError> {
        self.core
            .atomically(tables(), |tx| raw_set_cutoff(tx, &self.core, new_index))
    }
}
