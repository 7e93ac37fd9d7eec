//! Wallet error types.

use hdtree_core::error::{DiscoveryError, HdError, KeyError, StorageError, TreeError};
use thiserror::Error;

/// Errors that can occur in wallet operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WalletError {
    /// The operation cannot apply to this deriver or wallet configuration.
    #[error("stale state: {0}")]
    StaleState(String),

    /// An expected key, node, or address row is absent.
    #[error("not found: {0}")]
    NotFound(String),

    /// Every persisted address of the chain is already displayed.
    #[error("no unused addresses left; scan or derive more")]
    UnusedAddresses,

    /// A concurrent transaction modified the same rows first.
    #[error("transaction conflict: {0}")]
    Conflict(String),

    /// Storage backend or codec failure.
    #[error("storage: {0}")]
    Storage(String),

    /// A subtree description does not fit the tree.
    #[error("invalid tree: {0}")]
    InvalidTree(String),

    /// Wrong password for an encrypted key.
    #[error("invalid password")]
    InvalidPassword,

    /// Key material could not be decoded, derived or encrypted.
    #[error(transparent)]
    Key(KeyError),

    /// The discovery algorithm or its usage oracle failed.
    #[error("discovery: {0}")]
    Discovery(String),

    /// Invalid BIP-39 mnemonic phrase.
    #[error("invalid mnemonic: {0}")]
    InvalidMnemonic(String),
}

impl WalletError {
    /// Whether retrying the whole operation may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, WalletError::Conflict(_))
    }

    /// Whether this is an expected outcome of normal use rather than an
    /// inconsistency.
    pub fn is_expected(&self) -> bool {
        matches!(self, WalletError::UnusedAddresses)
    }
}

impl From<StorageError> for WalletError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::Conflict(msg) => WalletError::Conflict(msg),
            other => WalletError::Storage(other.to_string()),
        }
    }
}

impl From<TreeError> for WalletError {
    fn from(e: TreeError) -> Self {
        match e {
            TreeError::StaleState(msg) => WalletError::StaleState(msg),
            TreeError::NotFound(msg) => WalletError::NotFound(msg),
            TreeError::InvalidTree(msg) => WalletError::InvalidTree(msg),
        }
    }
}

impl From<HdError> for WalletError {
    fn from(e: HdError) -> Self {
        match e {
            HdError::Storage(e) => e.into(),
            HdError::Tree(e) => e.into(),
        }
    }
}

impl From<KeyError> for WalletError {
    fn from(e: KeyError) -> Self {
        match e {
            KeyError::InvalidPassword => WalletError::InvalidPassword,
            other => WalletError::Key(other),
        }
    }
}

impl From<DiscoveryError> for WalletError {
    fn from(e: DiscoveryError) -> Self {
        match e {
            DiscoveryError::Key(k) => k.into(),
            DiscoveryError::Oracle(msg) => WalletError::Discovery(msg),
        }
    }
}
