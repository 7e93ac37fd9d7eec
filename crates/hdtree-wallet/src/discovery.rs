//! Gap-limit account discovery.
//!
//! Each chain is scanned from one past its last used address. Candidates are
//! derived in batches and checked against the usage oracle; scanning stops
//! once `gap_limit` consecutive candidates after the last used one are known
//! unused. Every derived candidate is returned, used or not, so the unused
//! tail becomes persisted headroom.

use std::collections::HashSet;

use hdtree_core::constants::{DEFAULT_GAP_LIMIT, EXTERNAL, HARDENED, INTERNAL};
use hdtree_core::error::DiscoveryError;
use hdtree_core::traits::{AddressDiscovery, ScanAccountRequest};
use hdtree_core::tree::{LevelInsert, TreeInsert};

use crate::keys::{ExtendedPublicKey, address_for};

/// Batched gap-limit scan over both chains of an account.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GapLimitDiscovery {
    pub gap_limit: u32,
}

impl Default for GapLimitDiscovery {
    fn default() -> Self {
        Self {
            gap_limit: DEFAULT_GAP_LIMIT,
        }
    }
}

impl GapLimitDiscovery {
    pub fn new(gap_limit: u32) -> Self {
        Self { gap_limit }
    }

    /// First index past the gap that follows `last_used`.
    fn horizon(&self, last_used: Option<u32>) -> u32 {
        last_used
            .map_or(0, |u| u.saturating_add(1))
            .saturating_add(self.gap_limit)
            .min(HARDENED)
    }

    fn scan_chain(
        &self,
        account: &ExtendedPublicKey,
        chain: u32,
        last_used: Option<u32>,
        request: &ScanAccountRequest<'_>,
    ) -> Result<Vec<TreeInsert>, DiscoveryError> {
        let start = last_used.map_or(0, |u| u.saturating_add(1));
        let mut last_used = last_used;
        let mut next = start;
        let mut found = Vec::new();

        while next < self.horizon(last_used) {
            let end = self.horizon(last_used);
            let batch = (next..end)
                .map(|index| {
                    address_for(account, chain, index, request.protocol_magic, request.address_type)
                        .map(|hash| (index, hash))
                })
                .collect::<Result<Vec<_>, _>>()?;
            let hashes: Vec<String> = batch.iter().map(|(_, h)| h.clone()).collect();
            let used: HashSet<String> = request
                .checker
                .addresses_in_use(&hashes)?
                .into_iter()
                .collect();
            for (index, hash) in batch {
                let is_used = used.contains(&hash);
                if is_used {
                    last_used = Some(last_used.map_or(index, |u| u.max(index)));
                }
                found.push(TreeInsert::address(index, hash, request.address_type, is_used));
            }
            next = end;
        }
        tracing::debug!(chain, start, scanned = found.len(), ?last_used, "chain scanned");
        Ok(found)
    }
}

impl AddressDiscovery for GapLimitDiscovery {
    fn scan_account(
        &self,
        request: &ScanAccountRequest<'_>,
    ) -> Result<Vec<TreeInsert>, DiscoveryError> {
        let account = ExtendedPublicKey::from_bytes(request.account_public_key)?;
        let mut chains = Vec::with_capacity(2);
        for (chain, last_used) in [
            (EXTERNAL, request.last_used_external),
            (INTERNAL, request.last_used_internal),
        ] {
            let addresses = self.scan_chain(&account, chain, last_used, request)?;
            if addresses.is_empty() {
                continue;
            }
            chains.push(
                TreeInsert::new(chain, LevelInsert::Chain { display_cutoff: 0 })
                    .with_children(addresses),
            );
        }
        Ok(chains)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::{ExtendedPrivateKey, Seed};
    use hdtree_core::address::AddressType;
    use std::cell::RefCell;

    fn account() -> ExtendedPublicKey {
        ExtendedPrivateKey::from_seed(&Seed::from_bytes([1; 32]))
            .derive_path(&[HARDENED + 44, HARDENED + 1815, HARDENED])
            .public()
    }

    fn addr(chain: u32, index: u32) -> String {
        address_for(&account(), chain, index, 1, AddressType::Legacy).unwrap()
    }

    fn scan(
        gap: u32,
        last_external: Option<u32>,
        last_internal: Option<u32>,
        used: &[String],
    ) -> Vec<TreeInsert> {
        let key = account().to_bytes();
        let used: HashSet<String> = used.iter().cloned().collect();
        let checker = move |batch: &[String]| -> Result<Vec<String>, DiscoveryError> {
            Ok(batch.iter().filter(|a| used.contains(*a)).cloned().collect())
        };
        GapLimitDiscovery::new(gap)
            .scan_account(&ScanAccountRequest {
                account_public_key: &key,
                last_used_internal: last_internal,
                last_used_external: last_external,
                checker: &checker,
                protocol_magic: 1,
                address_type: AddressType::Legacy,
            })
            .unwrap()
    }

    fn indices(chain: &TreeInsert) -> Vec<u32> {
        chain.children.iter().map(|c| c.index).collect()
    }

    #[test]
    fn fresh_account_yields_one_gap_per_chain() {
        let chains = scan(3, None, None, &[]);
        assert_eq!(chains.len(), 2);
        assert_eq!((chains[0].index, chains[1].index), (EXTERNAL, INTERNAL));
        assert_eq!(indices(&chains[0]), vec![0, 1, 2]);
        assert_eq!(chains[0].max_used_child(), None);
    }

    #[test]
    fn used_address_extends_the_scan() {
        let chains = scan(3, None, None, &[addr(0, 2), addr(0, 4)]);
        assert_eq!(indices(&chains[0]), (0..8).collect::<Vec<_>>());
        assert_eq!(chains[0].max_used_child(), Some(4));
        assert_eq!(indices(&chains[1]), vec![0, 1, 2]);
    }

    #[test]
    fn scan_starts_after_last_used() {
        let chains = scan(2, Some(4), Some(0), &[]);
        assert_eq!(indices(&chains[0]), vec![5, 6]);
        assert_eq!(indices(&chains[1]), vec![1, 2]);
    }

    #[test]
    fn candidates_are_checked_in_batches() {
        let key = account().to_bytes();
        let calls = RefCell::new(Vec::new());
        let used = addr(0, 1);
        let checker = |batch: &[String]| -> Result<Vec<String>, DiscoveryError> {
            calls.borrow_mut().push(batch.len());
            Ok(batch.iter().filter(|a| **a == used).cloned().collect())
        };
        GapLimitDiscovery::new(2)
            .scan_account(&ScanAccountRequest {
                account_public_key: &key,
                last_used_internal: None,
                last_used_external: None,
                checker: &checker,
                protocol_magic: 1,
                address_type: AddressType::Legacy,
            })
            .unwrap();
        // external: [0,1] then [2,3]; internal: [0,1]
        assert_eq!(*calls.borrow(), vec![2, 2, 2]);
    }

    #[test]
    fn oracle_failure_propagates() {
        let key = account().to_bytes();
        let checker = |_: &[String]| -> Result<Vec<String>, DiscoveryError> {
            Err(DiscoveryError::Oracle("offline".into()))
        };
        let err = GapLimitDiscovery::default()
            .scan_account(&ScanAccountRequest {
                account_public_key: &key,
                last_used_internal: None,
                last_used_external: None,
                checker: &checker,
                protocol_magic: 1,
                address_type: AddressType::Legacy,
            })
            .unwrap_err();
        assert_eq!(err, DiscoveryError::Oracle("offline".into()));
    }

    #[test]
    fn malformed_account_key_is_rejected() {
        let checker = |_: &[String]| -> Result<Vec<String>, DiscoveryError> { Ok(vec![]) };
        let err = GapLimitDiscovery::default()
            .scan_account(&ScanAccountRequest {
                account_public_key: &[0u8; 10],
                last_used_internal: None,
                last_used_external: None,
                checker: &checker,
                protocol_magic: 1,
                address_type: AddressType::Legacy,
            })
            .unwrap_err();
        assert!(matches!(err, DiscoveryError::Key(_)));
    }
}
