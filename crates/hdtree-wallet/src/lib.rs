//! # hdtree-wallet — wallet-account views over the derivation tree.
//!
//! Builds [`PublicDeriver`] views on top of `hdtree-store` and supplies the
//! default collaborators the engine needs: key encryption and derivation,
//! gap-limit discovery and mnemonic seeds.
//!
//! # Modules
//!
//! - [`deriver`] — `PublicDeriver`, `WalletEnv`, capability traits
//! - [`resolver`] — addresses by path query, per chain, per deriver
//! - [`usage`] — next-unused frontier, UTXOs, output recording
//! - [`cutoff`] — display cutoff of an account's receiving chain
//! - [`extend`] — merging derived subtrees with cutoff upkeep
//! - [`scan`] — account scanning state machine
//! - [`signing`] — signing key lookup, normalization, password change
//! - [`create`] — wallet creation
//! - [`crypto`], [`encryption`], [`keys`], [`mnemonic`] — key material
//! - [`discovery`] — `GapLimitDiscovery`
//! - [`config`] — `WalletConfig`

pub mod config;
pub mod create;
pub mod crypto;
pub mod cutoff;
pub mod deriver;
pub mod discovery;
pub mod encryption;
pub mod error;
pub mod extend;
pub mod keys;
pub mod mnemonic;
pub mod resolver;
pub mod scan;
pub mod signing;
pub mod usage;

pub use config::WalletConfig;
pub use create::{CreatedWallet, KeySource, WalletSettings, create_wallet, list_public_derivers};
pub use crypto::StandardKeyCrypto;
pub use deriver::{
    AddFromPublic, AllUtxos, DisplayCutoff, GetPublicKey, HasChains, PublicDeriver, ScanAddresses,
    SigningKey, WalletEnv,
};
pub use discovery::GapLimitDiscovery;
pub use error::WalletError;
pub use keys::{ExtendedPrivateKey, ExtendedPublicKey, Seed};
pub use scan::{ScanReport, ScanStage};
pub use usage::{NewOutput, NextUnused, NextUnusedAddress, record_output};
