//! Signing keys held above the deriver.
//!
//! A wallet with a signing level keeps its private key on the ancestor at
//! that level. The key is found by walking up from the deriver and is
//! normalized back down to the deriver level on demand.

use std::sync::Arc;

use hdtree_core::traits::RawKey;
use hdtree_core::types::{DerivationLevel, KeyDerivationRow, KeyRow};
use hdtree_store::derivations::GetDerivationsByPath;
use hdtree_store::keys::{GetKey, UpdateGetKey};
use hdtree_store::{StoreTx, TableSet, deps};

use crate::deriver::{DeriverCore, SigningKey};
use crate::error::WalletError;

/// The private key row and the path from its node to the deriver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SigningKeyInfo {
    pub level: DerivationLevel,
    /// Signing node first, deriver node last.
    pub path: Vec<KeyDerivationRow>,
    pub row: KeyRow,
}

pub fn tables() -> TableSet {
    deps![GetDerivationsByPath, GetKey]
}

pub fn raw_get_signing_key(
    tx: &StoreTx<'_>,
    core: &DeriverCore,
) -> Result<SigningKeyInfo, WalletError> {
    let signing_level = core.wallet().signing_level.ok_or_else(|| {
        WalletError::StaleState(format!("wallet {} has no signing level", core.wallet().id))
    })?;
    let level_difference = core
        .level()
        .depth()
        .checked_sub(signing_level.depth())
        .ok_or_else(|| {
            WalletError::StaleState(format!(
                "signing level {signing_level} lies below the {} deriver",
                core.level()
            ))
        })?;
    let path = GetDerivationsByPath::get_parent_path(tx, core.node_id(), level_difference)?;
    let signing_node = path
        .first()
        .ok_or_else(|| WalletError::NotFound("empty signing path".into()))?;
    let key_id = signing_node.private_key_id.ok_or_else(|| {
        WalletError::NotFound(format!("private key of derivation {}", signing_node.id))
    })?;
    let row = GetKey::require(tx, key_id)?;
    Ok(SigningKeyInfo {
        level: signing_level,
        path,
        row,
    })
}

/// Decrypt the signing key and derive it down to the deriver node.
pub fn normalize_key(
    core: &DeriverCore,
    info: &SigningKeyInfo,
    password: Option<&[u8]>,
) -> Result<RawKey, WalletError> {
    let indices = info
        .path
        .iter()
        .skip(1)
        .map(|node| {
            node.index
                .ok_or_else(|| WalletError::NotFound(format!("index of derivation {}", node.id)))
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(core
        .env
        .crypto
        .normalize_key_to_level(&info.row, password, &indices)?)
}

/// Re-encrypt the signing key under `new_password`.
pub fn raw_change_signing_key_password(
    tx: &StoreTx<'_>,
    core: &DeriverCore,
    old_password: &[u8],
    new_password: &[u8],
) -> Result<KeyRow, WalletError> {
    let current = raw_get_signing_key(tx, core)?;
    let crypto = &core.env.crypto;
    let key = crypto.decrypt_key(&current.row, Some(old_password))?;
    let sealed = crypto.encrypt_key(&key, Some(new_password))?;
    let updated = KeyRow {
        id: current.row.id,
        hash: sealed.hash,
        is_encrypted: sealed.is_encrypted,
        password_last_update: Some(chrono::Utc::now().timestamp()),
    };
    let stored = UpdateGetKey::update(tx, &updated)?;
    tracing::info!(deriver = %core.id(), key = %stored.id, "signing key password changed");
    Ok(stored)
}

#[derive(Debug, Clone)]
pub struct AncestorSigningKey {
    core: Arc<DeriverCore>,
}

impl AncestorSigningKey {
    pub(crate) fn new(core: Arc<DeriverCore>) -> Self {
        Self { core }
    }
}

impl SigningKey for AncestorSigningKey {
    fn get_signing_key(&self) -> Result<SigningKeyInfo, WalletError> {
        self.core
            .atomically(tables(), |tx| raw_get_signing_key(tx, &self.core))
    }

    fn normalize_key(
        &self,
        info: &SigningKeyInfo,
        password: Option<&[u8]>,
    ) -> Result<RawKey, WalletError> {
        normalize_key(&self.core, info, password)
    }

    fn change_signing_key_password(
        &self,
        old_password: &[u8],
        new_password: &[u8],
    ) -> Result<KeyRow, WalletError> {
        self.core
            .atomically(tables().union(deps![UpdateGetKey]), |tx| {
                raw_change_signing_key_password(tx, &self.core, old_password, new_password)
            })
    }
}
