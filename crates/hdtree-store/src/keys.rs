//! Stored keys.

use hdtree_core::error::HdError;
use hdtree_core::tree::KeyInsert;
use hdtree_core::types::{KeyId, KeyRow};

use crate::schema::{Dependency, Table};
use crate::tx::StoreTx;

const KEY_COUNTER: &str = "next_key_id";

pub struct GetKey;

impl Dependency for GetKey {
    const TABLES: &'static [Table] = &[Table::Key];
}

impl GetKey {
    pub fn get(tx: &StoreTx<'_>, id: KeyId) -> Result<Option<KeyRow>, HdError> {
        Ok(tx.get(Table::Key, &id.to_key())?)
    }

    pub fn require(tx: &StoreTx<'_>, id: KeyId) -> Result<KeyRow, HdError> {
        Self::get(tx, id)?.ok_or_else(|| HdError::not_found(format!("key {id}")))
    }
}

pub struct AddKey;

impl Dependency for AddKey {
    const TABLES: &'static [Table] = &[Table::Key, Table::Metadata];
}

impl AddKey {
    pub fn add(tx: &StoreTx<'_>, key: &KeyInsert) -> Result<KeyRow, HdError> {
        let row = KeyRow {
            id: KeyId(tx.next_id(KEY_COUNTER)?),
            hash: key.hash.clone(),
            is_encrypted: key.is_encrypted,
            password_last_update: key.password_last_update,
        };
        tx.put(Table::Key, &row.id.to_key(), &row)?;
        Ok(row)
    }
}

/// Replaces a key in place and returns the stored row.
pub struct UpdateGetKey;

impl Dependency for UpdateGetKey {
    const TABLES: &'static [Table] = &[Table::Key];
}

impl UpdateGetKey {
    pub fn update(tx: &StoreTx<'_>, row: &KeyRow) -> Result<KeyRow, HdError> {
        let existing: Option<KeyRow> = tx.get_for_update(Table::Key, &row.id.to_key())?;
        if existing.is_none() {
            return Err(HdError::not_found(format!("key {}", row.id)));
        }
        tx.put(Table::Key, &row.id.to_key(), row)?;
        GetKey::require(tx, row.id)
    }
}
