//! Conceptual wallets and public derivers.

use hdtree_core::error::HdError;
use hdtree_core::types::{
    ConceptualWalletRow, KeyDerivationId, KeyDerivationRow, KeyRow, PublicDeriverId,
    PublicDeriverRow, WalletId,
};

use crate::derivations::GetKeyDerivation;
use crate::keys::GetKey;
use crate::schema::{Dependency, Table};
use crate::tx::StoreTx;

const WALLET_COUNTER: &str = "next_wallet_id";
const PUBLIC_DERIVER_COUNTER: &str = "next_public_deriver_id";

pub struct GetConceptualWallet;

impl Dependency for GetConceptualWallet {
    const TABLES: &'static [Table] = &[Table::ConceptualWallet];
}

impl GetConceptualWallet {
    pub fn get(tx: &StoreTx<'_>, id: WalletId) -> Result<Option<ConceptualWalletRow>, HdError> {
        Ok(tx.get(Table::ConceptualWallet, &id.to_key())?)
    }

    pub fn require(tx: &StoreTx<'_>, id: WalletId) -> Result<ConceptualWalletRow, HdError> {
        Self::get(tx, id)?.ok_or_else(|| HdError::not_found(format!("conceptual wallet {id}")))
    }
}

pub struct AddConceptualWallet;

impl Dependency for AddConceptualWallet {
    const TABLES: &'static [Table] = &[Table::ConceptualWallet, Table::Metadata];
}

impl AddConceptualWallet {
    /// Store `draft` under a freshly allocated id; the draft's id is ignored.
    pub fn add(
        tx: &StoreTx<'_>,
        draft: ConceptualWalletRow,
    ) -> Result<ConceptualWalletRow, HdError> {
        let row = ConceptualWalletRow {
            id: WalletId(tx.next_id(WALLET_COUNTER)?),
            ..draft
        };
        tx.put(Table::ConceptualWallet, &row.id.to_key(), &row)?;
        Ok(row)
    }
}

pub struct GetPublicDeriver;

impl Dependency for GetPublicDeriver {
    const TABLES: &'static [Table] = &[Table::PublicDeriver];
}

impl GetPublicDeriver {
    pub fn get(tx: &StoreTx<'_>, id: PublicDeriverId) -> Result<Option<PublicDeriverRow>, HdError> {
        Ok(tx.get(Table::PublicDeriver, &id.to_key())?)
    }

    pub fn require(tx: &StoreTx<'_>, id: PublicDeriverId) -> Result<PublicDeriverRow, HdError> {
        Self::get(tx, id)?.ok_or_else(|| HdError::not_found(format!("public deriver {id}")))
    }

    pub fn all(tx: &StoreTx<'_>) -> Result<Vec<PublicDeriverRow>, HdError> {
        Ok(tx
            .scan_prefix::<PublicDeriverRow>(Table::PublicDeriver, &[])?
            .into_iter()
            .map(|(_, row)| row)
            .collect())
    }
}

pub struct AddPublicDeriver;

impl Dependency for AddPublicDeriver {
    const TABLES: &'static [Table] = &[Table::PublicDeriver, Table::Metadata];
}

impl AddPublicDeriver {
    pub fn add(
        tx: &StoreTx<'_>,
        conceptual_wallet_id: WalletId,
        key_derivation_id: KeyDerivationId,
        name: &str,
    ) -> Result<PublicDeriverRow, HdError> {
        let row = PublicDeriverRow {
            id: PublicDeriverId(tx.next_id(PUBLIC_DERIVER_COUNTER)?),
            conceptual_wallet_id,
            key_derivation_id,
            name: name.to_string(),
        };
        tx.put(Table::PublicDeriver, &row.id.to_key(), &row)?;
        Ok(row)
    }
}

/// Keys attached to the node of a public deriver.
#[derive(Debug, Clone)]
pub struct PublicDeriverKeys {
    pub public_deriver: PublicDeriverRow,
    pub derivation: KeyDerivationRow,
    pub public_key: Option<KeyRow>,
    pub private_key: Option<KeyRow>,
}

pub struct GetKeyForPublicDeriver;

impl Dependency for GetKeyForPublicDeriver {
    const TABLES: &'static [Table] = &[Table::PublicDeriver, Table::KeyDerivation, Table::Key];
}

impl GetKeyForPublicDeriver {
    pub fn get(tx: &StoreTx<'_>, id: PublicDeriverId) -> Result<PublicDeriverKeys, HdError> {
        let public_deriver = GetPublicDeriver::require(tx, id)?;
        let derivation = GetKeyDerivation::require(tx, public_deriver.key_derivation_id)?;
        let public_key = derivation
            .public_key_id
            .map(|key| GetKey::require(tx, key))
            .transpose()?;
        let private_key = derivation
            .private_key_id
            .map(|key| GetKey::require(tx, key))
            .transpose()?;
        Ok(PublicDeriverKeys {
            public_deriver,
            derivation,
            public_key,
            private_key,
        })
    }
}
