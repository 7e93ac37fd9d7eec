//! RocksDB-backed transactional storage of the derivation tree.
//!
//! Opens an [`OptimisticTransactionDB`] with one column family per
//! [`Table`]. All reads and writes happen inside [`TreeStore::atomically`],
//! which commits on success and rolls back on failure, so a partial
//! operation is never observable.

use std::path::{Path, PathBuf};

use rocksdb::{
    ColumnFamilyDescriptor, OptimisticTransactionDB, OptimisticTransactionOptions, Options,
    WriteOptions,
};

use hdtree_core::error::StorageError;

use crate::config::StoreConfig;
use crate::schema::{Table, TableSet};
use crate::tx::StoreTx;

/// Persistent store of derivation trees, keys, addresses and outputs.
pub struct TreeStore {
    db: OptimisticTransactionDB,
    path: PathBuf,
    snapshot_reads: bool,
}

impl TreeStore {
    /// Open or create a store at `path` with default settings.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let config = StoreConfig {
            data_dir: path.as_ref().to_path_buf(),
            ..StoreConfig::default()
        };
        Self::open_at(path, &config)
    }

    /// Open or create the store described by `config`.
    pub fn open_with(config: &StoreConfig) -> Result<Self, StorageError> {
        Self::open_at(config.db_path(), config)
    }

    fn open_at(path: impl AsRef<Path>, config: &StoreConfig) -> Result<Self, StorageError> {
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        if let Some(max) = config.max_open_files {
            db_opts.set_max_open_files(max);
        }

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = Table::all()
            .map(|t| ColumnFamilyDescriptor::new(t.cf_name(), Options::default()))
            .collect();

        let db: OptimisticTransactionDB =
            OptimisticTransactionDB::open_cf_descriptors(&db_opts, path.as_ref(), cf_descriptors)
                .map_err(|e| StorageError::Backend(e.to_string()))?;

        tracing::info!("opened derivation store at {}", path.as_ref().display());
        Ok(Self {
            db,
            path: path.as_ref().to_path_buf(),
            snapshot_reads: config.snapshot_reads,
        })
    }

    /// Directory the database lives in.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Run `f` inside one transaction restricted to `tables`.
    ///
    /// Commits when `f` returns `Ok`, rolls back when it returns `Err`.
    /// A commit that loses a race against a concurrent writer fails with
    /// [`StorageError::Conflict`]; nothing is retried here.
    pub fn atomically<T, E, F>(&self, tables: TableSet, f: F) -> Result<T, E>
    where
        F: FnOnce(&StoreTx<'_>) -> Result<T, E>,
        E: From<StorageError>,
    {
        let write_opts = WriteOptions::default();
        let mut txn_opts = OptimisticTransactionOptions::new();
        txn_opts.set_snapshot(self.snapshot_reads);
        let tx = StoreTx::new(&self.db, self.db.transaction_opt(&write_opts, &txn_opts), tables);
        tracing::debug!(?tables, "transaction opened");

        match f(&tx) {
            Ok(value) => {
                if let Err(e) = tx.commit() {
                    if matches!(e, StorageError::Conflict(_)) {
                        tracing::warn!("transaction aborted: {e}");
                    }
                    return Err(e.into());
                }
                tracing::debug!("transaction committed");
                Ok(value)
            }
            Err(e) => {
                tx.rollback();
                tracing::debug!("transaction rolled back");
                Err(e)
            }
        }
    }
}

impl std::fmt::Debug for TreeStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TreeStore").field("path", &self.path).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hdtree_core::error::HdError;

    fn temp_store() -> (TreeStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = TreeStore::open(dir.path().join("tree")).unwrap();
        (store, dir)
    }

    fn meta() -> TableSet {
        TableSet::empty().with(Table::Metadata)
    }

    // ------------------------------------------------------------------
    // Commit and rollback
    // ------------------------------------------------------------------

    #[test]
    fn committed_writes_are_visible() {
        let (store, _dir) = temp_store();
        store
            .atomically::<_, StorageError, _>(meta(), |tx| tx.put(Table::Metadata, b"k", &5u64))
            .unwrap();
        let v: Option<u64> = store
            .atomically::<_, StorageError, _>(meta(), |tx| tx.get(Table::Metadata, b"k"))
            .unwrap();
        assert_eq!(v, Some(5));
    }

    #[test]
    fn failed_scope_rolls_back() {
        let (store, _dir) = temp_store();
        let result: Result<(), HdError> = store.atomically(meta(), |tx| {
            tx.put(Table::Metadata, b"k", &5u64)?;
            Err(HdError::stale("forced"))
        });
        assert!(result.is_err());
        let v: Option<u64> = store
            .atomically::<_, StorageError, _>(meta(), |tx| tx.get(Table::Metadata, b"k"))
            .unwrap();
        assert_eq!(v, None);
    }

    // ------------------------------------------------------------------
    // Declared tables
    // ------------------------------------------------------------------

    #[test]
    fn undeclared_table_is_rejected() {
        let (store, _dir) = temp_store();
        let err = store
            .atomically::<Option<u64>, StorageError, _>(meta(), |tx| tx.get(Table::Key, b"k"))
            .unwrap_err();
        assert_eq!(err, StorageError::UndeclaredTable("key"));
    }

    // ------------------------------------------------------------------
    // Id allocation and conflicts
    // ------------------------------------------------------------------

    #[test]
    fn ids_are_sequential() {
        let (store, _dir) = temp_store();
        let ids = store
            .atomically::<_, StorageError, _>(meta(), |tx| {
                Ok((tx.next_id("c")?, tx.next_id("c")?, tx.next_id("other")?))
            })
            .unwrap();
        assert_eq!(ids, (1, 2, 1));
        let next = store
            .atomically::<_, StorageError, _>(meta(), |tx| tx.next_id("c"))
            .unwrap();
        assert_eq!(next, 3);
    }

    #[test]
    fn concurrent_writers_conflict() {
        let (store, _dir) = temp_store();
        let err = store
            .atomically::<_, StorageError, _>(meta(), |outer| {
                outer.next_id("c")?;
                // A second transaction commits a write to the same counter first.
                store.atomically::<_, StorageError, _>(meta(), |inner| inner.next_id("c"))?;
                Ok(())
            })
            .unwrap_err();
        assert!(matches!(err, StorageError::Conflict(_)), "got {err:?}");
    }

    #[test]
    fn scan_prefix_stops_at_prefix_end() {
        let (store, _dir) = temp_store();
        let found = store
            .atomically::<_, StorageError, _>(meta(), |tx| {
                tx.put(Table::Metadata, b"a1", &1u64)?;
                tx.put(Table::Metadata, b"a2", &2u64)?;
                tx.put(Table::Metadata, b"b1", &3u64)?;
                tx.scan_prefix::<u64>(Table::Metadata, b"a")
            })
            .unwrap();
        let values: Vec<u64> = found.into_iter().map(|(_, v)| v).collect();
        assert_eq!(values, vec![1, 2]);
    }

    #[test]
    fn reopen_keeps_data() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tree");
        {
            let store = TreeStore::open(&path).unwrap();
            store
                .atomically::<_, StorageError, _>(meta(), |tx| tx.put(Table::Metadata, b"k", &9u64))
                .unwrap();
        }
        let store = TreeStore::open(&path).unwrap();
        let v: Option<u64> = store
            .atomically::<_, StorageError, _>(meta(), |tx| tx.get(Table::Metadata, b"k"))
            .unwrap();
        assert_eq!(v, Some(9));
    }
}
