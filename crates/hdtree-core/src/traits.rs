//! Collaborator seams of the derivation engine.
//!
//! - [`KeyCrypto`] — key encryption and child derivation (hdtree-wallet implements)
//! - [`UsageChecker`] — on-chain activity oracle (supplied by the caller)
//! - [`AddressDiscovery`] — account scanning strategy (hdtree-wallet implements)

use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::address::AddressType;
use crate::error::{DiscoveryError, KeyError};
use crate::tree::{KeyInsert, TreeInsert};
use crate::types::KeyRow;

/// Decrypted key material. Zeroized on drop.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct RawKey(Vec<u8>);

impl RawKey {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for RawKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("RawKey").field(&"[REDACTED]").finish()
    }
}

/// Password-based key protection and hierarchical derivation.
pub trait KeyCrypto: Send + Sync {
    /// Recover the key bytes of a stored row. Unencrypted rows ignore `password`.
    fn decrypt_key(&self, row: &KeyRow, password: Option<&[u8]>) -> Result<RawKey, KeyError>;

    /// Produce a storable form of `key`, encrypted when a password is given.
    fn encrypt_key(&self, key: &RawKey, password: Option<&[u8]>) -> Result<KeyInsert, KeyError>;

    /// Decrypt `row` and derive its descendant along `path`.
    fn normalize_key_to_level(
        &self,
        row: &KeyRow,
        password: Option<&[u8]>,
        path: &[u32],
    ) -> Result<RawKey, KeyError>;

    /// Public counterpart of a private key.
    fn to_public(&self, private: &RawKey) -> Result<RawKey, KeyError>;
}

/// Answers which of a batch of addresses have on-chain activity.
pub trait UsageChecker {
    /// Returns the subset of `addresses` that are in use.
    fn addresses_in_use(&self, addresses: &[String]) -> Result<Vec<String>, DiscoveryError>;
}

impl<F> UsageChecker for F
where
    F: Fn(&[String]) -> Result<Vec<String>, DiscoveryError>,
{
    fn addresses_in_use(&self, addresses: &[String]) -> Result<Vec<String>, DiscoveryError> {
        self(addresses)
    }
}

/// Input of an account scan.
pub struct ScanAccountRequest<'a> {
    /// Extended public key of the account.
    pub account_public_key: &'a [u8],
    pub last_used_internal: Option<u32>,
    pub last_used_external: Option<u32>,
    pub checker: &'a dyn UsageChecker,
    pub protocol_magic: u32,
    pub address_type: AddressType,
}

/// Discovers used addresses of an account beyond the known frontier.
pub trait AddressDiscovery {
    /// Returns chain-level subtrees (indexed by chain) to merge under the account.
    fn scan_account(&self, request: &ScanAccountRequest<'_>)
        -> Result<Vec<TreeInsert>, DiscoveryError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_key_debug_is_redacted() {
        let key = RawKey::new(vec![1, 2, 3]);
        let shown = format!("{key:?}");
        assert!(shown.contains("REDACTED"));
        assert!(!shown.contains("1, 2, 3"));
    }

    #[test]
    fn closures_are_usage_checkers() {
        let checker = |batch: &[String]| -> Result<Vec<String>, DiscoveryError> {
            Ok(batch.iter().filter(|a| a.starts_with('u')).cloned().collect())
        };
        let used = checker
            .addresses_in_use(&["u1".to_string(), "x2".to_string()])
            .unwrap();
        assert_eq!(used, vec!["u1".to_string()]);
    }
}
