//! Integration test suite for the hdtree derivation engine.
//!
//! Tests in `tests/` drive the store and wallet crates together against
//! temporary RocksDB directories. Tree and cutoff invariants are checked with
//! proptest over random insert/pop/set sequences.

pub mod helpers;
