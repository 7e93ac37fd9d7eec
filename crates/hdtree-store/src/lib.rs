//! # hdtree-store — transactional storage of the derivation tree.
//!
//! Tables live in RocksDB column families of an optimistic transaction
//! database. Every operation runs inside [`TreeStore::atomically`] with an
//! explicit [`TableSet`]; touching a table outside the declared set fails.
//!
//! # Modules
//!
//! - [`schema`] — tables, declared table sets, the [`Dependency`] trait
//! - [`storage`] — `TreeStore` and its transaction scope
//! - [`tx`] — `StoreTx`, typed reads and writes inside a transaction
//! - [`derivations`] — node lookups and path traversal
//! - [`specific`] — level-specific records
//! - [`keys`], [`addresses`], [`outputs`], [`wallets`] — row tables
//! - [`cutoff`] — display cutoff pop/get/set and post-insert raise
//! - [`tree`] — subtree insertion
//! - [`config`] — `StoreConfig`

pub mod addresses;
pub mod config;
pub mod cutoff;
pub mod derivations;
pub mod keys;
pub mod outputs;
pub mod schema;
pub mod specific;
pub mod storage;
pub mod tree;
pub mod tx;
pub mod wallets;

pub use config::StoreConfig;
pub use schema::{Dependency, Table, TableSet};
pub use storage::TreeStore;
pub use tx::StoreTx;
