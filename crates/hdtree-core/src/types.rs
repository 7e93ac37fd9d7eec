//! Persisted row types and derivation-level vocabulary.
//!
//! Every row stored by `hdtree-store` is defined here so that the wallet layer
//! and the store agree on one encoding. Rows derive both `serde` (for
//! reporting) and `bincode` (for storage).

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::address::AddressType;
use crate::constants::{BIP44_PURPOSE, CIP1852_PURPOSE};

macro_rules! row_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord,
            Serialize, Deserialize, bincode::Encode, bincode::Decode,
        )]
        pub struct $name(pub u64);

        impl $name {
            /// Big-endian key bytes; iteration order equals id order.
            pub fn to_key(self) -> [u8; 8] {
                self.0.to_be_bytes()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

row_id!(
    /// Identifier of a node in the derivation tree.
    KeyDerivationId
);
row_id!(
    /// Identifier of a stored key.
    KeyId
);
row_id!(
    /// Identifier of a stored address.
    AddressId
);
row_id!(
    /// Identifier of a conceptual wallet.
    WalletId
);
row_id!(
    /// Identifier of a public deriver.
    PublicDeriverId
);

/// Depth of a node in the derivation tree.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord,
    Serialize, Deserialize, bincode::Encode, bincode::Decode,
)]
pub enum DerivationLevel {
    Root,
    Purpose,
    CoinType,
    Account,
    Chain,
    Address,
}

impl DerivationLevel {
    /// All levels from the root down.
    pub const ALL: [DerivationLevel; 6] = [
        DerivationLevel::Root,
        DerivationLevel::Purpose,
        DerivationLevel::CoinType,
        DerivationLevel::Account,
        DerivationLevel::Chain,
        DerivationLevel::Address,
    ];

    /// Numeric depth, root = 0.
    pub fn depth(self) -> u32 {
        self as u32
    }

    /// Level at the given depth, if any.
    pub fn from_depth(depth: u32) -> Option<Self> {
        Self::ALL.get(depth as usize).copied()
    }

    /// Level one step further from the root, or `None` below addresses.
    pub fn child(self) -> Option<Self> {
        Self::from_depth(self.depth() + 1)
    }

    /// Level one step closer to the root, or `None` at the root.
    pub fn parent(self) -> Option<Self> {
        self.depth().checked_sub(1).and_then(Self::from_depth)
    }

    /// Level `steps` below this one.
    pub fn descend(self, steps: usize) -> Option<Self> {
        u32::try_from(steps)
            .ok()
            .and_then(|s| self.depth().checked_add(s))
            .and_then(Self::from_depth)
    }

    fn name(self) -> &'static str {
        match self {
            Self::Root => "root",
            Self::Purpose => "purpose",
            Self::CoinType => "coin_type",
            Self::Account => "account",
            Self::Chain => "chain",
            Self::Address => "address",
        }
    }
}

impl fmt::Display for DerivationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Derivation scheme a wallet was created with.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default,
    Serialize, Deserialize, bincode::Encode, bincode::Decode,
)]
pub enum DerivationScheme {
    #[default]
    Bip44,
    Cip1852,
}

impl DerivationScheme {
    /// Hardened purpose index of the scheme.
    pub fn purpose(self) -> u32 {
        match self {
            Self::Bip44 => BIP44_PURPOSE,
            Self::Cip1852 => CIP1852_PURPOSE,
        }
    }
}

/// A level-specific table: one per (scheme, level) pair.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord,
    Serialize, Deserialize, bincode::Encode, bincode::Decode,
)]
pub struct SpecificTable {
    pub scheme: DerivationScheme,
    pub level: DerivationLevel,
}

impl SpecificTable {
    /// Every level-specific table known to the store.
    pub fn all() -> impl Iterator<Item = SpecificTable> {
        [DerivationScheme::Bip44, DerivationScheme::Cip1852]
            .into_iter()
            .flat_map(|scheme| {
                DerivationLevel::ALL
                    .into_iter()
                    .map(move |level| SpecificTable { scheme, level })
            })
    }

    /// Column family name of the table.
    pub fn cf_name(self) -> &'static str {
        use DerivationLevel as L;
        use DerivationScheme as S;
        match (self.scheme, self.level) {
            (S::Bip44, L::Root) => "bip44_root",
            (S::Bip44, L::Purpose) => "bip44_purpose",
            (S::Bip44, L::CoinType) => "bip44_coin_type",
            (S::Bip44, L::Account) => "bip44_account",
            (S::Bip44, L::Chain) => "bip44_chain",
            (S::Bip44, L::Address) => "bip44_address",
            (S::Cip1852, L::Root) => "cip1852_root",
            (S::Cip1852, L::Purpose) => "cip1852_purpose",
            (S::Cip1852, L::CoinType) => "cip1852_coin_type",
            (S::Cip1852, L::Account) => "cip1852_account",
            (S::Cip1852, L::Chain) => "cip1852_chain",
            (S::Cip1852, L::Address) => "cip1852_address",
        }
    }
}

/// Which level-specific table each level of a wallet uses.
#[derive(
    Clone, Debug, PartialEq, Eq, Default,
    Serialize, Deserialize, bincode::Encode, bincode::Decode,
)]
pub struct DerivationTables(BTreeMap<DerivationLevel, SpecificTable>);

impl DerivationTables {
    /// Tables for every level of `scheme`.
    pub fn for_scheme(scheme: DerivationScheme) -> Self {
        Self(
            DerivationLevel::ALL
                .into_iter()
                .map(|level| (level, SpecificTable { scheme, level }))
                .collect(),
        )
    }

    pub fn get(&self, level: DerivationLevel) -> Option<SpecificTable> {
        self.0.get(&level).copied()
    }

    pub fn tables(&self) -> impl Iterator<Item = SpecificTable> + '_ {
        self.0.values().copied()
    }
}

/// A node of the derivation tree.
#[derive(
    Clone, Debug, PartialEq, Eq,
    Serialize, Deserialize, bincode::Encode, bincode::Decode,
)]
pub struct KeyDerivationRow {
    pub id: KeyDerivationId,
    /// `None` only at the root.
    pub parent: Option<KeyDerivationId>,
    /// `None` only at the root.
    pub index: Option<u32>,
    pub level: DerivationLevel,
    pub private_key_id: Option<KeyId>,
    pub public_key_id: Option<KeyId>,
}

/// Attributes attached to a node according to its level.
#[derive(
    Clone, Debug, PartialEq, Eq,
    Serialize, Deserialize, bincode::Encode, bincode::Decode,
)]
pub enum LevelSpecific {
    Root,
    Purpose,
    CoinType,
    Account,
    Chain {
        /// Addresses with an index below the cutoff are displayed.
        display_cutoff: Option<u32>,
    },
    Address,
}

impl LevelSpecific {
    /// Level this payload belongs to.
    pub fn level(&self) -> DerivationLevel {
        match self {
            Self::Root => DerivationLevel::Root,
            Self::Purpose => DerivationLevel::Purpose,
            Self::CoinType => DerivationLevel::CoinType,
            Self::Account => DerivationLevel::Account,
            Self::Chain { .. } => DerivationLevel::Chain,
            Self::Address => DerivationLevel::Address,
        }
    }

    /// Display cutoff of a chain record.
    pub fn display_cutoff(&self) -> Option<u32> {
        match self {
            Self::Chain { display_cutoff } => *display_cutoff,
            _ => None,
        }
    }
}

/// A level-specific record together with the node that owns it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelSpecificRow {
    pub key_derivation_id: KeyDerivationId,
    pub specific: LevelSpecific,
}

/// A stored key. `hash` is the hex of the (possibly encrypted) key bytes.
#[derive(
    Clone, Debug, PartialEq, Eq,
    Serialize, Deserialize, bincode::Encode, bincode::Decode,
)]
pub struct KeyRow {
    pub id: KeyId,
    pub hash: String,
    pub is_encrypted: bool,
    /// Unix seconds of the last password change.
    pub password_last_update: Option<i64>,
}

/// A stored address.
#[derive(
    Clone, Debug, PartialEq, Eq, Hash,
    Serialize, Deserialize, bincode::Encode, bincode::Decode,
)]
pub struct AddressRow {
    pub id: AddressId,
    pub hash: String,
    pub kind: AddressType,
}

/// Confirmation state of the transaction an output belongs to.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash,
    Serialize, Deserialize, bincode::Encode, bincode::Decode,
)]
pub enum TxState {
    Pending,
    Successful,
    Failed,
}

/// A transaction output paying to one of the wallet's addresses.
#[derive(
    Clone, Debug, PartialEq, Eq,
    Serialize, Deserialize, bincode::Encode, bincode::Decode,
)]
pub struct TxOutputRow {
    pub address_id: AddressId,
    pub txid: String,
    pub output_index: u32,
    pub amount: u64,
    pub state: TxState,
    pub is_unspent: bool,
}

impl TxOutputRow {
    /// An output counts as address usage once its transaction succeeded.
    pub fn marks_usage(&self) -> bool {
        self.state == TxState::Successful
    }
}

/// Wallet-level configuration.
#[derive(
    Clone, Debug, PartialEq, Eq,
    Serialize, Deserialize, bincode::Encode, bincode::Decode,
)]
pub struct ConceptualWalletRow {
    pub id: WalletId,
    pub name: String,
    pub scheme: DerivationScheme,
    /// Level at which public deriver views live.
    pub public_deriver_level: DerivationLevel,
    /// Level holding the private key, `None` for watch-only wallets.
    pub signing_level: Option<DerivationLevel>,
    pub protocol_magic: u32,
    pub address_type: AddressType,
    pub derivation_tables: DerivationTables,
}

/// A designated node acting as the root of a wallet-account view.
#[derive(
    Clone, Debug, PartialEq, Eq,
    Serialize, Deserialize, bincode::Encode, bincode::Decode,
)]
pub struct PublicDeriverRow {
    pub id: PublicDeriverId,
    pub conceptual_wallet_id: WalletId,
    pub key_derivation_id: KeyDerivationId,
    pub name: String,
}
