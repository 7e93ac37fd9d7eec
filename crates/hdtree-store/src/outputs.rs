//! Transaction outputs paying to wallet addresses.
//!
//! Keyed by `address || output index || txid`, so all outputs of one address
//! are a single prefix scan.

use hdtree_core::error::HdError;
use hdtree_core::types::{AddressId, AddressRow, TxOutputRow};

use crate::schema::{Dependency, Table};
use crate::tx::StoreTx;

fn output_key(row: &TxOutputRow) -> Vec<u8> {
    let mut key = Vec::with_capacity(12 + row.txid.len());
    key.extend_from_slice(&row.address_id.to_key());
    key.extend_from_slice(&row.output_index.to_be_bytes());
    key.extend_from_slice(row.txid.as_bytes());
    key
}

pub struct GetTxOutputs;

impl Dependency for GetTxOutputs {
    const TABLES: &'static [Table] = &[Table::TxOutput];
}

impl GetTxOutputs {
    pub fn for_address(tx: &StoreTx<'_>, address: AddressId) -> Result<Vec<TxOutputRow>, HdError> {
        Ok(tx
            .scan_prefix::<TxOutputRow>(Table::TxOutput, &address.to_key())?
            .into_iter()
            .map(|(_, row)| row)
            .collect())
    }

    pub fn for_addresses(
        tx: &StoreTx<'_>,
        addresses: &[AddressId],
    ) -> Result<Vec<TxOutputRow>, HdError> {
        let mut out = Vec::new();
        for address in addresses {
            out.extend(Self::for_address(tx, *address)?);
        }
        Ok(out)
    }
}

pub struct AddTxOutput;

impl Dependency for AddTxOutput {
    const TABLES: &'static [Table] = &[Table::TxOutput, Table::Address];
}

impl AddTxOutput {
    /// Record an output. Re-recording the same output overwrites it.
    pub fn add(tx: &StoreTx<'_>, row: &TxOutputRow) -> Result<(), HdError> {
        let address: Option<AddressRow> = tx.get(Table::Address, &row.address_id.to_key())?;
        if address.is_none() {
            return Err(HdError::not_found(format!("address {}", row.address_id)));
        }
        Ok(tx.put(Table::TxOutput, &output_key(row), row)?)
    }
}
