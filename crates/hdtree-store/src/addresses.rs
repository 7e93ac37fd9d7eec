//! Addresses and their canonical link to address-level nodes.
//!
//! `address_by_hash` keeps address strings unique: adding an address that is
//! already known returns the existing row.

use hdtree_core::error::HdError;
use hdtree_core::tree::AddressInsert;
use hdtree_core::types::{AddressId, AddressRow, KeyDerivationId};

use crate::schema::{Dependency, Table};
use crate::tx::{StoreTx, pair_key};

const ADDRESS_COUNTER: &str = "next_address_id";

pub struct GetAddress;

impl Dependency for GetAddress {
    const TABLES: &'static [Table] = &[Table::Address, Table::AddressByHash, Table::AddressMapping];
}

impl GetAddress {
    pub fn get(tx: &StoreTx<'_>, id: AddressId) -> Result<Option<AddressRow>, HdError> {
        Ok(tx.get(Table::Address, &id.to_key())?)
    }

    pub fn by_hash(tx: &StoreTx<'_>, hash: &str) -> Result<Option<AddressRow>, HdError> {
        let id: Option<AddressId> = tx.get(Table::AddressByHash, hash.as_bytes())?;
        match id {
            Some(id) => Self::get(tx, id),
            None => Ok(None),
        }
    }

    /// Addresses canonically attached to an address-level node, by id.
    pub fn from_canonical(
        tx: &StoreTx<'_>,
        derivation: KeyDerivationId,
    ) -> Result<Vec<AddressRow>, HdError> {
        tx.scan_prefix::<AddressId>(Table::AddressMapping, &derivation.to_key())?
            .into_iter()
            .map(|(_, id)| {
                Self::get(tx, id)?.ok_or_else(|| HdError::not_found(format!("address {id}")))
            })
            .collect()
    }
}

pub struct AddAddress;

impl Dependency for AddAddress {
    const TABLES: &'static [Table] = &[
        Table::Address,
        Table::AddressByHash,
        Table::AddressMapping,
        Table::Metadata,
    ];
}

impl AddAddress {
    /// Insert an address, or return the existing row with the same hash.
    pub fn add_by_hash(tx: &StoreTx<'_>, address: &AddressInsert) -> Result<AddressRow, HdError> {
        let existing: Option<AddressId> =
            tx.get_for_update(Table::AddressByHash, address.hash.as_bytes())?;
        if let Some(id) = existing {
            return GetAddress::get(tx, id)?
                .ok_or_else(|| HdError::not_found(format!("address {id}")));
        }
        let row = AddressRow {
            id: AddressId(tx.next_id(ADDRESS_COUNTER)?),
            hash: address.hash.clone(),
            kind: address.kind,
        };
        tx.put(Table::Address, &row.id.to_key(), &row)?;
        tx.put(Table::AddressByHash, address.hash.as_bytes(), &row.id)?;
        Ok(row)
    }

    /// Attach an address to an address-level node.
    pub fn link(
        tx: &StoreTx<'_>,
        derivation: KeyDerivationId,
        address: AddressId,
    ) -> Result<(), HdError> {
        Ok(tx.put(
            Table::AddressMapping,
            &pair_key(derivation.0, address.0),
            &address,
        )?)
    }
}
