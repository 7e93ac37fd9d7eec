//! Level-specific records.
//!
//! Which table a record lives in depends on the wallet's
//! [`DerivationTables`]; the caller declares those tables with
//! [`TableSet::with_derivation_tables`](crate::TableSet::with_derivation_tables).

use hdtree_core::error::HdError;
use hdtree_core::types::{
    DerivationLevel, DerivationTables, KeyDerivationId, LevelSpecific, SpecificTable,
};

use crate::schema::{Dependency, Table};
use crate::tx::StoreTx;

pub struct GetDerivationSpecific;

impl Dependency for GetDerivationSpecific {
    // Level-specific tables are per wallet and declared separately.
    const TABLES: &'static [Table] = &[];
}

fn table_for(tables: &DerivationTables, level: DerivationLevel) -> Result<SpecificTable, HdError> {
    tables
        .get(level)
        .ok_or_else(|| HdError::stale(format!("no level-specific table for the {level} level")))
}

impl GetDerivationSpecific {
    pub fn get(
        tx: &StoreTx<'_>,
        id: KeyDerivationId,
        level: DerivationLevel,
        tables: &DerivationTables,
    ) -> Result<Option<LevelSpecific>, HdError> {
        let table = table_for(tables, level)?;
        Ok(tx.get(Table::Specific(table), &id.to_key())?)
    }

    /// Read a record that must exist.
    pub fn require(
        tx: &StoreTx<'_>,
        id: KeyDerivationId,
        level: DerivationLevel,
        tables: &DerivationTables,
    ) -> Result<LevelSpecific, HdError> {
        Self::get(tx, id, level, tables)?
            .ok_or_else(|| HdError::not_found(format!("{level} record of derivation {id}")))
    }

    /// Read a record that must exist, registering it for conflict detection.
    pub fn require_for_update(
        tx: &StoreTx<'_>,
        id: KeyDerivationId,
        level: DerivationLevel,
        tables: &DerivationTables,
    ) -> Result<LevelSpecific, HdError> {
        let table = table_for(tables, level)?;
        tx.get_for_update(Table::Specific(table), &id.to_key())?
            .ok_or_else(|| HdError::not_found(format!("{level} record of derivation {id}")))
    }
}

pub struct ModifyDerivationSpecific;

impl Dependency for ModifyDerivationSpecific {
    const TABLES: &'static [Table] = &[];
}

impl ModifyDerivationSpecific {
    /// Write the record of node `id`; its level picks the table.
    pub fn put(
        tx: &StoreTx<'_>,
        id: KeyDerivationId,
        specific: &LevelSpecific,
        tables: &DerivationTables,
    ) -> Result<(), HdError> {
        let table = table_for(tables, specific.level())?;
        Ok(tx.put(Table::Specific(table), &id.to_key(), specific)?)
    }
}
