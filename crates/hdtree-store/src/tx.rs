//! Typed access to the store inside one optimistic transaction.
//!
//! Values are bincode-encoded with the standard configuration. Every access
//! checks the table against the set declared when the transaction opened.

use rocksdb::{ColumnFamily, Direction, IteratorMode, OptimisticTransactionDB, Transaction};

use hdtree_core::error::StorageError;

use crate::schema::{Table, TableSet};

/// A live transaction with its declared table set.
pub struct StoreTx<'db> {
    db: &'db OptimisticTransactionDB,
    txn: Transaction<'db, OptimisticTransactionDB>,
    tables: TableSet,
}

pub(crate) fn encode<T: bincode::Encode>(value: &T) -> Result<Vec<u8>, StorageError> {
    bincode::encode_to_vec(value, bincode::config::standard())
        .map_err(|e| StorageError::Codec(e.to_string()))
}

pub(crate) fn decode<T: bincode::Decode<()>>(bytes: &[u8]) -> Result<T, StorageError> {
    bincode::decode_from_slice(bytes, bincode::config::standard())
        .map(|(value, _)| value)
        .map_err(|e| StorageError::Codec(e.to_string()))
}

fn backend(e: rocksdb::Error) -> StorageError {
    StorageError::Backend(e.to_string())
}

impl<'db> StoreTx<'db> {
    pub(crate) fn new(
        db: &'db OptimisticTransactionDB,
        txn: Transaction<'db, OptimisticTransactionDB>,
        tables: TableSet,
    ) -> Self {
        Self { db, txn, tables }
    }

    /// Tables this transaction may touch.
    pub fn declared(&self) -> TableSet {
        self.tables
    }

    fn cf(&self, table: Table) -> Result<&'db ColumnFamily, StorageError> {
        if !self.tables.contains(table) {
            return Err(StorageError::UndeclaredTable(table.cf_name()));
        }
        self.db
            .cf_handle(table.cf_name())
            .ok_or(StorageError::MissingColumnFamily(table.cf_name()))
    }

    pub fn get<T: bincode::Decode<()>>(
        &self,
        table: Table,
        key: &[u8],
    ) -> Result<Option<T>, StorageError> {
        let cf = self.cf(table)?;
        match self.txn.get_cf(cf, key).map_err(backend)? {
            Some(bytes) => decode(&bytes).map(Some),
            None => Ok(None),
        }
    }

    /// Read a value and register the key for conflict detection at commit.
    pub fn get_for_update<T: bincode::Decode<()>>(
        &self,
        table: Table,
        key: &[u8],
    ) -> Result<Option<T>, StorageError> {
        let cf = self.cf(table)?;
        match self.txn.get_for_update_cf(cf, key, true).map_err(backend)? {
            Some(bytes) => decode(&bytes).map(Some),
            None => Ok(None),
        }
    }

    pub fn put<T: bincode::Encode>(
        &self,
        table: Table,
        key: &[u8],
        value: &T,
    ) -> Result<(), StorageError> {
        let cf = self.cf(table)?;
        let bytes = encode(value)?;
        self.txn.put_cf(cf, key, bytes).map_err(backend)
    }

    /// All entries whose key starts with `prefix`, in key order.
    pub fn scan_prefix<T: bincode::Decode<()>>(
        &self,
        table: Table,
        prefix: &[u8],
    ) -> Result<Vec<(Vec<u8>, T)>, StorageError> {
        let cf = self.cf(table)?;
        let mut out = Vec::new();
        let iter = self
            .txn
            .iterator_cf(cf, IteratorMode::From(prefix, Direction::Forward));
        for item in iter {
            let (key, value) = item.map_err(backend)?;
            if !key.starts_with(prefix) {
                break;
            }
            out.push((key.to_vec(), decode(&value)?));
        }
        Ok(out)
    }

    /// Number of keys starting with `prefix`.
    pub fn count_prefix(&self, table: Table, prefix: &[u8]) -> Result<usize, StorageError> {
        let cf = self.cf(table)?;
        let mut count = 0;
        let iter = self
            .txn
            .iterator_cf(cf, IteratorMode::From(prefix, Direction::Forward));
        for item in iter {
            let (key, _) = item.map_err(backend)?;
            if !key.starts_with(prefix) {
                break;
            }
            count += 1;
        }
        Ok(count)
    }

    /// Allocate the next id of a counter kept in the metadata table.
    ///
    /// Ids start at 1. The counter is read for update, so two transactions
    /// allocating from the same counter conflict.
    pub fn next_id(&self, counter: &str) -> Result<u64, StorageError> {
        let key = counter.as_bytes();
        let current: u64 = self.get_for_update(Table::Metadata, key)?.unwrap_or(0);
        let next = current + 1;
        self.put(Table::Metadata, key, &next)?;
        Ok(next)
    }

    pub(crate) fn commit(self) -> Result<(), StorageError> {
        self.txn.commit().map_err(|e| match e.kind() {
            rocksdb::ErrorKind::Busy | rocksdb::ErrorKind::TryAgain => {
                StorageError::Conflict(e.to_string())
            }
            _ => StorageError::Backend(e.to_string()),
        })
    }

    pub(crate) fn rollback(self) {
        if let Err(e) = self.txn.rollback() {
            tracing::warn!("rollback failed: {e}");
        }
    }
}

/// Key of a child edge: `parent || index`, both big-endian.
pub(crate) fn child_key(parent: u64, index: u32) -> [u8; 12] {
    let mut key = [0u8; 12];
    key[..8].copy_from_slice(&parent.to_be_bytes());
    key[8..].copy_from_slice(&index.to_be_bytes());
    key
}

/// Key joining two ids, both big-endian.
pub(crate) fn pair_key(a: u64, b: u64) -> [u8; 16] {
    let mut key = [0u8; 16];
    key[..8].copy_from_slice(&a.to_be_bytes());
    key[8..].copy_from_slice(&b.to_be_bytes());
    key
}
