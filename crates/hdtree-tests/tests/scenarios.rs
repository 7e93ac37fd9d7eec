//! End-to-end wallet scenarios: cutoff, frontier, scanning and atomicity.

use hdtree_core::address::AddressType;
use hdtree_core::constants::{EXTERNAL, INTERNAL};
use hdtree_core::error::DiscoveryError;
use hdtree_core::path::QuerySegment;
use hdtree_core::tree::{LevelInsert, TreeInsert};
use hdtree_core::types::{DerivationLevel, TxState};
use hdtree_store::derivations::GetKeyDerivation;
use hdtree_store::{TableSet, deps};
use hdtree_tests::helpers::*;
use hdtree_wallet::keys::address_for;
use hdtree_wallet::{NewOutput, ScanStage, WalletError, record_output};

fn node_count(fx: &Fixture) -> usize {
    fx.store()
        .atomically::<_, WalletError, _>(deps![GetKeyDerivation], |tx| {
            Ok(GetKeyDerivation::all(tx)?.len())
        })
        .unwrap()
}

fn no_usage(_: &[String]) -> Result<Vec<String>, DiscoveryError> {
    Ok(Vec::new())
}

// ---------------------------------------------------------------------------
// Cutoff
// ---------------------------------------------------------------------------

#[test]
fn pop_exhausts_headroom_then_fails() {
    // Cutoff 2 over three persisted addresses, address 1 paid to.
    let fx = fixture(3);
    let deriver = full_wallet(&fx, 1);
    let cutoff = deriver.as_display_cutoff().unwrap();
    cutoff.set_cutoff(2).unwrap();
    mark_used(&fx, &deriver, EXTERNAL, 1);

    let popped = cutoff.pop_address().unwrap();
    assert_eq!(popped.addressing.index(), Some(2));
    assert_eq!(popped.addrs[0].hash, address_at(&deriver, EXTERNAL, 2));
    assert_eq!(cutoff.get_cutoff().unwrap(), 3);

    let err = cutoff.pop_address().unwrap_err();
    assert_eq!(err, WalletError::UnusedAddresses);
    assert!(err.is_expected());
    assert_eq!(cutoff.get_cutoff().unwrap(), 3);

    let next = deriver
        .as_has_chains()
        .unwrap()
        .get_next_unused_for_chain(EXTERNAL)
        .unwrap();
    assert_eq!(next.index, 0);
    assert_eq!(
        next.address_info.unwrap().addr.hash,
        address_at(&deriver, EXTERNAL, 0)
    );
}

#[test]
fn pops_never_repeat_an_address() {
    let fx = fixture(4);
    let deriver = full_wallet(&fx, 2);
    let cutoff = deriver.as_display_cutoff().unwrap();
    let mut seen = Vec::new();
    while let Ok(family) = cutoff.pop_address() {
        assert!(!seen.contains(&family.addrs[0].hash));
        seen.push(family.addrs[0].hash.clone());
    }
    assert_eq!(seen.len(), 4);
    assert_eq!(cutoff.get_cutoff().unwrap(), 4);
}

#[test]
fn popped_addressing_is_absolute() {
    let fx = fixture(2);
    let deriver = full_wallet(&fx, 3);
    let popped = deriver.as_display_cutoff().unwrap().pop_address().unwrap();
    assert_eq!(popped.addressing.to_string(), "m/44'/1815'/0'/0/0");
    assert_eq!(popped.addressing.level(), Some(DerivationLevel::Address));
}

#[test]
fn chain_level_deriver_has_no_cutoff() {
    let fx = fixture(2);
    let deriver = wallet_at(&fx, 4, DerivationLevel::Chain);
    assert!(deriver.as_display_cutoff().is_none());
    assert!(deriver.as_has_chains().is_none());
    assert!(deriver.as_scan_addresses().is_none());

    let err = deriver
        .core()
        .atomically(hdtree_wallet::cutoff::tables(), |tx| {
            hdtree_wallet::cutoff::raw_get_cutoff(tx, deriver.core())
        })
        .unwrap_err();
    assert!(matches!(err, WalletError::StaleState(_)));
}

// ---------------------------------------------------------------------------
// Frontier
// ---------------------------------------------------------------------------

#[test]
fn frontier_is_lowest_unused_index() {
    let fx = fixture(5);
    let deriver = full_wallet(&fx, 5);
    for index in [0, 2, 3] {
        mark_used(&fx, &deriver, INTERNAL, index);
    }
    let next = deriver
        .as_has_chains()
        .unwrap()
        .get_next_unused_for_chain(INTERNAL)
        .unwrap();
    assert_eq!(next.index, 1);
    assert_eq!(next.address_info.unwrap().addressing.index(), Some(1));
}

#[test]
fn fully_used_chain_points_past_the_end() {
    let fx = fixture(2);
    let deriver = full_wallet(&fx, 6);
    mark_used(&fx, &deriver, INTERNAL, 0);
    mark_used(&fx, &deriver, INTERNAL, 1);
    let next = deriver
        .as_has_chains()
        .unwrap()
        .get_next_unused_for_chain(INTERNAL)
        .unwrap();
    assert_eq!(next.index, 2);
    assert!(next.address_info.is_none());
}

#[test]
fn pending_outputs_do_not_mark_usage() {
    let fx = fixture(2);
    let deriver = full_wallet(&fx, 7);
    record_output(
        fx.store(),
        &NewOutput {
            address: address_at(&deriver, EXTERNAL, 0),
            txid: "pending".into(),
            output_index: 0,
            amount: 5,
            state: TxState::Pending,
            is_unspent: true,
        },
    )
    .unwrap();
    let next = deriver
        .as_has_chains()
        .unwrap()
        .get_next_unused_for_chain(EXTERNAL)
        .unwrap();
    assert_eq!(next.index, 0);
}

#[test]
fn recording_to_unknown_address_is_not_found() {
    let fx = fixture(1);
    let err = pay(&fx, "not-an-address", "t", 1).unwrap_err();
    assert!(matches!(err, WalletError::NotFound(_)));
}

// ---------------------------------------------------------------------------
// Resolution and UTXOs
// ---------------------------------------------------------------------------

#[test]
fn account_resolution_lists_receiving_chain_first() {
    let fx = fixture(2);
    let deriver = full_wallet(&fx, 8);
    let families = deriver.as_all_utxos().get_all_utxo_addresses().unwrap();
    let paths: Vec<(u32, u32)> = families
        .iter()
        .map(|f| {
            let p = &f.addressing.path;
            (p[3], p[4])
        })
        .collect();
    assert_eq!(paths, vec![(0, 0), (0, 1), (1, 0), (1, 1)]);
}

#[test]
fn wildcard_query_matches_chain_lookup() {
    let fx = fixture(3);
    let deriver = full_wallet(&fx, 9);
    let by_query = deriver
        .get_addresses_by_path(&[QuerySegment::Fixed(INTERNAL), QuerySegment::Wildcard])
        .unwrap();
    let by_chain = deriver
        .as_has_chains()
        .unwrap()
        .get_addresses_for_chain(INTERNAL)
        .unwrap();
    assert_eq!(by_query, by_chain);
}

#[test]
fn query_not_ending_at_addresses_is_stale() {
    let fx = fixture(1);
    let deriver = full_wallet(&fx, 10);
    let err = deriver
        .get_addresses_by_path(&[QuerySegment::Wildcard])
        .unwrap_err();
    assert!(matches!(err, WalletError::StaleState(_)));
}

#[test]
fn utxos_carry_their_addressing() {
    let fx = fixture(2);
    let deriver = full_wallet(&fx, 11);
    let address = address_at(&deriver, INTERNAL, 1);
    pay(&fx, &address, "abc", 42).unwrap();
    record_output(
        fx.store(),
        &NewOutput {
            address: address_at(&deriver, EXTERNAL, 0),
            txid: "spent".into(),
            output_index: 1,
            amount: 9,
            state: TxState::Successful,
            is_unspent: false,
        },
    )
    .unwrap();

    let utxos = deriver.as_all_utxos().get_all_utxos().unwrap();
    assert_eq!(utxos.len(), 1);
    assert_eq!(utxos[0].address, address);
    assert_eq!(utxos[0].output.amount, 42);
    assert_eq!(utxos[0].addressing.to_string(), "m/44'/1815'/0'/1/1");
}

#[test]
fn shared_address_row_is_counted_once() {
    let fx = fixture(2);
    let deriver = full_wallet(&fx, 18);
    let reused = address_at(&deriver, EXTERNAL, 0);
    let chain = TreeInsert::new(EXTERNAL, LevelInsert::Chain { display_cutoff: 0 })
        .with_children(vec![TreeInsert::address(2, reused.clone(), AddressType::Legacy, false)]);
    deriver
        .as_add_from_public()
        .add_derivation_tree(&[chain])
        .unwrap();
    assert_eq!(address_at(&deriver, EXTERNAL, 2), reused);

    pay(&fx, &reused, "shared", 7).unwrap();
    let utxos = deriver.as_all_utxos().get_all_utxos().unwrap();
    assert_eq!(utxos.len(), 1);
    assert_eq!(utxos[0].output.amount, 7);
}

// ---------------------------------------------------------------------------
// Scanning
// ---------------------------------------------------------------------------

#[test]
fn scan_twice_inserts_nothing_the_second_time() {
    let fx = fixture(3);
    let deriver = full_wallet(&fx, 12);
    let account = account_key(12);
    let config = &fx.env.config;
    let used =
        address_for(&account, EXTERNAL, 2, config.protocol_magic, config.address_type).unwrap();
    let checker = move |batch: &[String]| -> Result<Vec<String>, DiscoveryError> {
        Ok(batch.iter().filter(|a| **a == used).cloned().collect())
    };
    let scan = deriver.as_scan_addresses().unwrap();

    let first = scan.scan_addresses(&checker).unwrap();
    assert_eq!(first.stage, ScanStage::Done);
    assert_eq!(first.last_used_external, None);
    // Index 2 is used, so 3..6 extend the receiving chain.
    assert_eq!(first.inserted.len(), 3);
    assert_eq!(first.candidates, 9);
    let before = node_count(&fx);

    let second = scan.scan_addresses(&checker).unwrap();
    assert!(second.inserted.is_empty());
    assert!(second.cutoffs_raised.is_empty());
    assert_eq!(node_count(&fx), before);
}

#[test]
fn scan_raises_cutoff_past_used_address() {
    let fx = fixture(3);
    let deriver = full_wallet(&fx, 13);
    let account = account_key(13);
    let config = &fx.env.config;
    let used =
        address_for(&account, EXTERNAL, 2, config.protocol_magic, config.address_type).unwrap();
    let checker = move |batch: &[String]| -> Result<Vec<String>, DiscoveryError> {
        Ok(batch.iter().filter(|a| **a == used).cloned().collect())
    };
    deriver
        .as_scan_addresses()
        .unwrap()
        .scan_addresses(&checker)
        .unwrap();
    // Last used 2, headroom 1.
    assert_eq!(deriver.as_display_cutoff().unwrap().get_cutoff().unwrap(), 4);
}

#[test]
fn scan_starts_from_recorded_frontier() {
    let fx = fixture(2);
    let deriver = full_wallet(&fx, 14);
    mark_used(&fx, &deriver, EXTERNAL, 0);
    mark_used(&fx, &deriver, EXTERNAL, 1);
    let report = deriver
        .as_scan_addresses()
        .unwrap()
        .scan_addresses(&no_usage)
        .unwrap();
    assert_eq!(report.last_used_external, Some(1));
    assert_eq!(report.last_used_internal, None);
    // Receiving chain grows by one gap: indices 2 and 3.
    assert_eq!(report.inserted.len(), 2);
}

#[test]
fn failing_oracle_leaves_store_untouched() {
    let fx = fixture(2);
    let deriver = full_wallet(&fx, 15);
    let before = node_count(&fx);
    let offline = |_: &[String]| -> Result<Vec<String>, DiscoveryError> {
        Err(DiscoveryError::Oracle("offline".into()))
    };
    let err = deriver
        .as_scan_addresses()
        .unwrap()
        .scan_addresses(&offline)
        .unwrap_err();
    assert_eq!(err, WalletError::Discovery("offline".into()));
    assert_eq!(node_count(&fx), before);
}

#[test]
fn watch_only_wallet_scans_but_cannot_sign() {
    let fx = fixture(2);
    let deriver = watch_only(&fx, 16);
    assert!(deriver.as_signing_key().is_none());
    assert!(deriver.as_get_public_key().is_some());
    let report = deriver
        .as_scan_addresses()
        .unwrap()
        .scan_addresses(&no_usage)
        .unwrap();
    assert!(report.inserted.is_empty());
}

// ---------------------------------------------------------------------------
// Atomicity
// ---------------------------------------------------------------------------

#[test]
fn failed_extension_leaves_no_orphans() {
    let fx = fixture(1);
    let deriver = full_wallet(&fx, 17);
    let before = node_count(&fx);
    // A new chain with valid addresses, then a malformed address slot.
    let chain = TreeInsert::new(7, LevelInsert::Chain { display_cutoff: 0 }).with_children(vec![
        TreeInsert::address(0, "fresh-0".into(), AddressType::Legacy, true),
        TreeInsert::new(1, LevelInsert::Address { addresses: vec![], used: false }),
    ]);
    let err = deriver
        .as_add_from_public()
        .add_derivation_tree(&[chain])
        .unwrap_err();
    assert!(matches!(err, WalletError::InvalidTree(_)));
    assert_eq!(node_count(&fx), before);
    assert!(
        deriver
            .get_addresses_by_path(&[QuerySegment::Fixed(7), QuerySegment::Wildcard])
            .unwrap()
            .is_empty()
    );
}

#[test]
fn sparse_extension_is_rejected() {
    let fx = fixture(2);
    let deriver = full_wallet(&fx, 19);
    let cutoff = deriver.as_display_cutoff().unwrap();
    cutoff.set_cutoff(2).unwrap();
    let before = node_count(&fx);
    let chain = TreeInsert::new(EXTERNAL, LevelInsert::Chain { display_cutoff: 0 })
        .with_children(vec![TreeInsert::address(5, "far".into(), AddressType::Legacy, true)]);
    let err = deriver
        .as_add_from_public()
        .add_derivation_tree(&[chain])
        .unwrap_err();
    assert!(matches!(err, WalletError::InvalidTree(ref msg) if msg.contains("gap")), "{err:?}");
    assert_eq!(node_count(&fx), before);
    assert_eq!(cutoff.get_cutoff().unwrap(), 2);
    assert_eq!(cutoff.pop_address().unwrap_err(), WalletError::UnusedAddresses);
}

#[test]
fn undeclared_table_is_rejected() {
    let fx = fixture(1);
    let err = fx
        .store()
        .atomically::<_, WalletError, _>(TableSet::empty(), |tx| {
            Ok(GetKeyDerivation::all(tx)?.len())
        })
        .unwrap_err();
    assert!(matches!(err, WalletError::Storage(msg) if msg.contains("not declared")));
}
