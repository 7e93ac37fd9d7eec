//! Shared fixtures for the integration tests.

use std::sync::Arc;

use hdtree_core::constants::{BIP44_PURPOSE, COIN_TYPE, HARDENED, TESTNET_PROTOCOL_MAGIC};
use hdtree_core::types::{DerivationLevel, TxState};
use hdtree_store::TreeStore;
use hdtree_wallet::encryption::KdfParams;
use hdtree_wallet::{
    ExtendedPrivateKey, ExtendedPublicKey, KeySource, NewOutput, PublicDeriver, Seed, WalletConfig,
    WalletEnv, WalletError, WalletSettings, create_wallet, record_output,
};

/// Password of every full wallet built by these helpers.
pub const PASSWORD: &[u8] = b"correct horse battery staple";

/// A store in a temporary directory, removed on drop.
pub struct Fixture {
    pub env: Arc<WalletEnv>,
    _dir: tempfile::TempDir,
}

impl Fixture {
    pub fn store(&self) -> &TreeStore {
        &self.env.store
    }
}

pub fn test_config(gap_limit: u32) -> WalletConfig {
    WalletConfig::default()
        .with_gap_limit(gap_limit)
        .with_protocol_magic(TESTNET_PROTOCOL_MAGIC)
        .with_kdf(KdfParams::light())
}

pub fn fixture(gap_limit: u32) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let store = TreeStore::open(dir.path().join("tree")).unwrap();
    let env = WalletEnv::new(Arc::new(store), test_config(gap_limit));
    Fixture {
        env: Arc::new(env),
        _dir: dir,
    }
}

pub fn root_key(seed: u8) -> ExtendedPrivateKey {
    ExtendedPrivateKey::from_seed(&Seed::from_bytes([seed; 32]))
}

pub fn account_key(seed: u8) -> ExtendedPublicKey {
    root_key(seed)
        .derive_path(&[BIP44_PURPOSE, COIN_TYPE, HARDENED])
        .public()
}

/// Full wallet (encrypted root key) with an account-level deriver.
pub fn full_wallet(fx: &Fixture, seed: u8) -> PublicDeriver {
    wallet_at(fx, seed, DerivationLevel::Account)
}

/// Full wallet whose deriver sits at `level`.
pub fn wallet_at(fx: &Fixture, seed: u8, level: DerivationLevel) -> PublicDeriver {
    let key = root_key(seed);
    let settings = WalletSettings {
        public_deriver_level: level,
        ..WalletSettings::new(format!("wallet-{seed}"))
    };
    let created = create_wallet(
        &fx.env,
        &settings,
        KeySource::Root {
            key: &key,
            password: PASSWORD,
        },
    )
    .unwrap();
    PublicDeriver::load(fx.env.clone(), created.public_deriver.id).unwrap()
}

/// Watch-only wallet built from an account public key.
pub fn watch_only(fx: &Fixture, seed: u8) -> PublicDeriver {
    let key = account_key(seed);
    let created = create_wallet(
        &fx.env,
        &WalletSettings::new(format!("watch-{seed}")),
        KeySource::AccountPublic { key: &key },
    )
    .unwrap();
    PublicDeriver::load(fx.env.clone(), created.public_deriver.id).unwrap()
}

/// Hash of the address at `chain/index` of an account-level deriver.
pub fn address_at(deriver: &PublicDeriver, chain: u32, index: u32) -> String {
    deriver
        .as_has_chains()
        .unwrap()
        .get_addresses_for_chain(chain)
        .unwrap()
        .into_iter()
        .find(|f| f.addressing.index() == Some(index))
        .map(|f| f.addrs[0].hash.clone())
        .unwrap()
}

/// Record a successful unspent output paying to `address`.
pub fn pay(fx: &Fixture, address: &str, txid: &str, amount: u64) -> Result<(), WalletError> {
    record_output(
        fx.store(),
        &NewOutput {
            address: address.to_string(),
            txid: txid.to_string(),
            output_index: 0,
            amount,
            state: TxState::Successful,
            is_unspent: true,
        },
    )
    .map(|_| ())
}

/// Mark `chain/index` of `deriver` as used on chain.
pub fn mark_used(fx: &Fixture, deriver: &PublicDeriver, chain: u32, index: u32) {
    let address = address_at(deriver, chain, index);
    pay(fx, &address, &format!("tx-{chain}-{index}"), 1_000_000).unwrap();
}
