//! Key derivation and discovery properties across random inputs.

use std::collections::HashSet;

use proptest::prelude::*;

use hdtree_core::address::AddressType;
use hdtree_core::constants::{BIP44_PURPOSE, COIN_TYPE, EXTERNAL, HARDENED, INTERNAL};
use hdtree_core::error::DiscoveryError;
use hdtree_core::traits::{AddressDiscovery, ScanAccountRequest};
use hdtree_core::tree::LevelInsert;
use hdtree_wallet::keys::address_for;
use hdtree_wallet::{ExtendedPrivateKey, GapLimitDiscovery, Seed};

fn account(seed: [u8; 32]) -> ExtendedPrivateKey {
    ExtendedPrivateKey::from_seed(&Seed::from_bytes(seed)).derive_path(&[
        BIP44_PURPOSE,
        COIN_TYPE,
        HARDENED,
    ])
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn public_and_private_soft_paths_agree(
        seed in any::<[u8; 32]>(),
        chain in 0u32..2,
        index in 0u32..HARDENED,
    ) {
        let private = account(seed);
        let from_private = private.derive_path(&[chain, index]).public();
        let from_public = private.public().derive_path(&[chain, index]).unwrap();
        prop_assert_eq!(from_private, from_public);
    }

    #[test]
    fn discovery_covers_gap_after_last_used(
        seed in any::<[u8; 32]>(),
        gap in 1u32..6,
        used in prop::collection::btree_set(0u32..15, 0..4),
    ) {
        let key = account(seed).public();
        let used_hashes: HashSet<String> = used
            .iter()
            .map(|&i| address_for(&key, EXTERNAL, i, 1, AddressType::Legacy).unwrap())
            .collect();
        let checker = move |batch: &[String]| -> Result<Vec<String>, DiscoveryError> {
            Ok(batch.iter().filter(|a| used_hashes.contains(*a)).cloned().collect())
        };
        let bytes = key.to_bytes();
        let chains = GapLimitDiscovery::new(gap)
            .scan_account(&ScanAccountRequest {
                account_public_key: &bytes,
                last_used_internal: None,
                last_used_external: None,
                checker: &checker,
                protocol_magic: 1,
                address_type: AddressType::Legacy,
            })
            .unwrap();

        // Usage is only found while it lies within a gap of the previous one.
        let mut reachable = None;
        for &i in &used {
            let frontier = reachable.map_or(0, |u: u32| u + 1);
            if i < frontier + gap {
                reachable = Some(i);
            }
        }
        let expected_end = reachable.map_or(0, |u| u + 1) + gap;

        prop_assert_eq!(chains.len(), 2);
        prop_assert_eq!(chains[0].index, EXTERNAL);
        prop_assert_eq!(chains[1].index, INTERNAL);
        prop_assert!(
            matches!(chains[0].insert, LevelInsert::Chain { .. }),
            "first insert should be a chain level"
        );
        prop_assert_eq!(chains[0].children.len() as u32, expected_end);
        prop_assert_eq!(chains[1].children.len() as u32, gap);
        prop_assert_eq!(chains[0].max_used_child(), reachable);
    }
}
