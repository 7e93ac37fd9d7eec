//! Table catalogue and declared table sets.
//!
//! Each store API type implements [`Dependency`], naming the tables it reads
//! or writes. A caller assembles the union of its dependencies with
//! [`deps!`](crate::deps) and hands it to
//! [`TreeStore::atomically`](crate::TreeStore::atomically).

use std::fmt;

use hdtree_core::types::{DerivationLevel, DerivationScheme, DerivationTables, SpecificTable};

/// A table of the store, backed by one column family.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Table {
    KeyDerivation,
    KeyDerivationChild,
    Key,
    Address,
    AddressByHash,
    AddressMapping,
    TxOutput,
    ConceptualWallet,
    PublicDeriver,
    Metadata,
    Specific(SpecificTable),
}

const BASE_TABLES: [Table; 10] = [
    Table::KeyDerivation,
    Table::KeyDerivationChild,
    Table::Key,
    Table::Address,
    Table::AddressByHash,
    Table::AddressMapping,
    Table::TxOutput,
    Table::ConceptualWallet,
    Table::PublicDeriver,
    Table::Metadata,
];

impl Table {
    /// Every table, level-specific ones included.
    pub fn all() -> impl Iterator<Item = Table> {
        BASE_TABLES
            .into_iter()
            .chain(SpecificTable::all().map(Table::Specific))
    }

    pub fn cf_name(self) -> &'static str {
        match self {
            Self::KeyDerivation => "key_derivation",
            Self::KeyDerivationChild => "key_derivation_child",
            Self::Key => "key",
            Self::Address => "address",
            Self::AddressByHash => "address_by_hash",
            Self::AddressMapping => "address_mapping",
            Self::TxOutput => "tx_output",
            Self::ConceptualWallet => "conceptual_wallet",
            Self::PublicDeriver => "public_deriver",
            Self::Metadata => "metadata",
            Self::Specific(t) => t.cf_name(),
        }
    }

    fn bit(self) -> u64 {
        let position = match self {
            Self::Specific(t) => {
                let scheme: u32 = match t.scheme {
                    DerivationScheme::Bip44 => 0,
                    DerivationScheme::Cip1852 => 1,
                };
                let per_scheme = DerivationLevel::ALL.len() as u32;
                BASE_TABLES.len() as u32 + scheme * per_scheme + t.level.depth()
            }
            base => BASE_TABLES
                .iter()
                .position(|t| *t == base)
                .map_or(0, |p| p as u32),
        };
        1u64 << position
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.cf_name())
    }
}

/// The tables a transaction declares it will touch.
#[derive(Clone, Copy, Default, PartialEq, Eq)]
pub struct TableSet(u64);

impl TableSet {
    pub fn empty() -> Self {
        Self(0)
    }

    pub fn with(self, table: Table) -> Self {
        Self(self.0 | table.bit())
    }

    pub fn with_all(self, tables: &[Table]) -> Self {
        tables.iter().fold(self, |set, t| set.with(*t))
    }

    /// Add the level-specific tables of a wallet.
    pub fn with_derivation_tables(self, tables: &DerivationTables) -> Self {
        tables.tables().fold(self, |set, t| set.with(Table::Specific(t)))
    }

    pub fn union(self, other: TableSet) -> Self {
        Self(self.0 | other.0)
    }

    pub fn contains(self, table: Table) -> bool {
        self.0 & table.bit() != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Declared tables, in catalogue order.
    pub fn tables(self) -> impl Iterator<Item = Table> {
        Table::all().filter(move |t| self.contains(*t))
    }
}

impl fmt::Debug for TableSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.tables().map(Table::cf_name)).finish()
    }
}

/// A store API that touches a fixed set of tables.
pub trait Dependency {
    const TABLES: &'static [Table];
}

/// Union of the tables of several [`Dependency`] types.
///
/// ```
/// use hdtree_store::deps;
/// use hdtree_store::derivations::GetKeyDerivation;
/// use hdtree_store::keys::GetKey;
/// use hdtree_store::Table;
///
/// let set = deps![GetKeyDerivation, GetKey];
/// assert!(set.contains(Table::Key));
/// ```
#[macro_export]
macro_rules! deps {
    ($($dep:ty),* $(,)?) => {
        $crate::TableSet::empty()$(.with_all(<$dep as $crate::Dependency>::TABLES))*
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_table_has_a_distinct_bit() {
        let bits: Vec<u64> = Table::all().map(Table::bit).collect();
        let mut unique = bits.clone();
        unique.sort_unstable();
        unique.dedup();
        assert_eq!(unique.len(), bits.len());
        assert_eq!(bits.len(), 22);
    }

    #[test]
    fn set_membership() {
        let set = TableSet::empty().with(Table::Key).with(Table::Address);
        assert!(set.contains(Table::Key));
        assert!(set.contains(Table::Address));
        assert!(!set.contains(Table::Metadata));
    }

    #[test]
    fn derivation_tables_are_added() {
        let tables = DerivationTables::for_scheme(DerivationScheme::Bip44);
        let set = TableSet::empty().with_derivation_tables(&tables);
        let chain = SpecificTable {
            scheme: DerivationScheme::Bip44,
            level: DerivationLevel::Chain,
        };
        let other = SpecificTable {
            scheme: DerivationScheme::Cip1852,
            level: DerivationLevel::Chain,
        };
        assert!(set.contains(Table::Specific(chain)));
        assert!(!set.contains(Table::Specific(other)));
    }

    #[test]
    fn union_and_iteration() {
        let a = TableSet::empty().with(Table::Key);
        let b = TableSet::empty().with(Table::TxOutput);
        let names: Vec<_> = a.union(b).tables().map(Table::cf_name).collect();
        assert_eq!(names, vec!["key", "tx_output"]);
        assert!(TableSet::empty().is_empty());
    }
}
