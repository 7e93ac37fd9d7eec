//! Merging publicly derived subtrees below a deriver.

use std::sync::Arc;

use serde::Serialize;

use hdtree_core::tree::TreeInsert;
use hdtree_core::types::KeyDerivationId;
use hdtree_store::cutoff::ModifyDisplayCutoff;
use hdtree_store::tree::AddDerivationTree;
use hdtree_store::{StoreTx, TableSet, deps};

use crate::deriver::{AddFromPublic, DeriverCore};
use crate::error::WalletError;

pub fn tables() -> TableSet {
    deps![AddDerivationTree, ModifyDisplayCutoff]
}

/// What an extension wrote.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExtendOutcome {
    /// Newly created nodes, parents first.
    pub inserted: Vec<KeyDerivationId>,
    /// Chains whose display cutoff moved, with the new value.
    pub cutoffs_raised: Vec<(KeyDerivationId, u32)>,
}

/// Insert `tree` below the deriver node. When the deriver owns a cutoff,
/// chains that gained used addresses get their cutoff raised in the same
/// transaction.
pub fn raw_add_from_public(
    tx: &StoreTx<'_>,
    core: &DeriverCore,
    tree: &[TreeInsert],
    cutoff_capable: bool,
) -> Result<ExtendOutcome, WalletError> {
    let outcome = AddDerivationTree::excluding_parent(tx, core.node_id(), tree, core.tables())?;
    let cutoffs_raised = if cutoff_capable {
        ModifyDisplayCutoff::raise_from_insert(
            tx,
            &outcome.chains,
            core.config().cutoff_headroom,
            core.tables(),
        )?
    } else {
        Vec::new()
    };
    Ok(ExtendOutcome {
        inserted: outcome.inserted,
        cutoffs_raised,
    })
}

#[derive(Debug, Clone)]
pub struct PublicExtension {
    core: Arc<DeriverCore>,
    cutoff_capable: bool,
}

impl PublicExtension {
    pub(crate) fn new(core: Arc<DeriverCore>, cutoff_capable: bool) -> Self {
        Self {
            core,
            cutoff_capable,
        }
    }
}

impl AddFromPublic for PublicExtension {
    fn add_derivation_tree(&self, tree: &[TreeInsert]) -> Result<ExtendOutcome, WalletError> {
        self.core.atomically(tables(), |tx| {
            raw_add_from_public(tx, &self.core, tree, self.cutoff_capable)
        })
    }
}
