//! Public derivers and their capabilities.
//!
//! A [`PublicDeriver`] is a view rooted at one node of a wallet's derivation
//! tree. What it can do depends on where that node sits and how the wallet
//! was configured, so [`PublicDeriver::load`] picks the capabilities once and
//! callers reach them through typed accessors:
//!
//! | Capability | Present when |
//! |---|---|
//! | [`AddFromPublic`], [`AllUtxos`] | always |
//! | [`DisplayCutoff`], [`HasChains`] | deriver at the account level |
//! | [`GetPublicKey`] | a public key is stored on the deriver node |
//! | [`ScanAddresses`] | account level with a public key |
//! | [`SigningKey`] | the wallet has a signing level |
//!
//! Every capability method runs in its own transaction over the tables it
//! declares. The `raw_*` functions of the sibling modules run inside a
//! caller's transaction so operations can be composed atomically.

use std::sync::Arc;

use hdtree_core::error::KeyError;
use hdtree_core::path::{AddressFamily, QuerySegment};
use hdtree_core::traits::{AddressDiscovery, KeyCrypto, RawKey, UsageChecker};
use hdtree_core::tree::TreeInsert;
use hdtree_core::types::{
    ConceptualWalletRow, DerivationLevel, DerivationTables, KeyDerivationId, KeyDerivationRow,
    KeyRow, PublicDeriverId, PublicDeriverRow,
};
use hdtree_store::derivations::GetDerivationsByPath;
use hdtree_store::wallets::{GetConceptualWallet, GetKeyForPublicDeriver};
use hdtree_store::{StoreTx, TableSet, TreeStore, deps};

use crate::config::WalletConfig;
use crate::crypto::StandardKeyCrypto;
use crate::cutoff::AccountCutoff;
use crate::discovery::GapLimitDiscovery;
use crate::error::WalletError;
use crate::extend::{ExtendOutcome, PublicExtension};
use crate::resolver::{self, AccountChains};
use crate::scan::{ScanReport, UtxoAccountScan};
use crate::signing::{AncestorSigningKey, SigningKeyInfo};
use crate::usage::{AddressedUtxo, AllUtxoAddresses, NextUnusedAddress};

/// Shared collaborators of every deriver opened over one store.
pub struct WalletEnv {
    pub store: Arc<TreeStore>,
    pub crypto: Arc<dyn KeyCrypto>,
    pub discovery: Arc<dyn AddressDiscovery + Send + Sync>,
    pub config: WalletConfig,
}

impl WalletEnv {
    /// Environment with the default key crypto and gap-limit discovery.
    pub fn new(store: Arc<TreeStore>, config: WalletConfig) -> Self {
        Self {
            store,
            crypto: Arc::new(StandardKeyCrypto::new(config.kdf)),
            discovery: Arc::new(GapLimitDiscovery::new(config.gap_limit)),
            config,
        }
    }

    pub fn with_crypto(mut self, crypto: Arc<dyn KeyCrypto>) -> Self {
        self.crypto = crypto;
        self
    }

    pub fn with_discovery(mut self, discovery: Arc<dyn AddressDiscovery + Send + Sync>) -> Self {
        self.discovery = discovery;
        self
    }
}

impl std::fmt::Debug for WalletEnv {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WalletEnv")
            .field("store", &self.store)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// State every capability of one deriver shares.
#[derive(Debug)]
pub struct DeriverCore {
    pub(crate) env: Arc<WalletEnv>,
    pub(crate) row: PublicDeriverRow,
    pub(crate) derivation: KeyDerivationRow,
    pub(crate) wallet: ConceptualWalletRow,
    /// Indices from the root down to the deriver node.
    pub(crate) path_to_public: Vec<u32>,
}

impl DeriverCore {
    pub fn id(&self) -> PublicDeriverId {
        self.row.id
    }

    pub fn node_id(&self) -> KeyDerivationId {
        self.derivation.id
    }

    pub fn level(&self) -> DerivationLevel {
        self.wallet.public_deriver_level
    }

    pub fn wallet(&self) -> &ConceptualWalletRow {
        &self.wallet
    }

    pub fn path_to_public(&self) -> &[u32] {
        &self.path_to_public
    }

    pub fn tables(&self) -> &DerivationTables {
        &self.wallet.derivation_tables
    }

    pub fn config(&self) -> &WalletConfig {
        &self.env.config
    }

    /// Run `f` in one transaction over `tables` plus this wallet's
    /// level-specific tables.
    pub fn atomically<T, F>(&self, tables: TableSet, f: F) -> Result<T, WalletError>
    where
        F: FnOnce(&StoreTx<'_>) -> Result<T, WalletError>,
    {
        self.env
            .store
            .atomically(tables.with_derivation_tables(self.tables()), f)
    }

    pub(crate) fn require_level(
        &self,
        level: DerivationLevel,
        what: &str,
    ) -> Result<(), WalletError> {
        if self.level() != level {
            return Err(WalletError::StaleState(format!(
                "{what} needs a {level}-level deriver, this one is at the {} level",
                self.level()
            )));
        }
        Ok(())
    }
}

/// Display-cutoff management of the receiving chain.
pub trait DisplayCutoff {
    fn get_cutoff(&self) -> Result<u32, WalletError>;
    /// Expose the next reserved address. Fails with
    /// [`WalletError::UnusedAddresses`] when no headroom is left.
    fn pop_address(&self) -> Result<AddressFamily, WalletError>;
    fn set_cutoff(&self, new_index: u32) -> Result<(), WalletError>;
}

/// Access to the two chains below an account.
pub trait HasChains {
    fn get_addresses_for_chain(&self, chain: u32) -> Result<Vec<AddressFamily>, WalletError>;
    fn get_next_unused_for_chain(&self, chain: u32) -> Result<NextUnusedAddress, WalletError>;
}

pub trait GetPublicKey {
    fn get_public_key(&self) -> Result<KeyRow, WalletError>;
}

/// Discovery of used addresses past the known frontier.
pub trait ScanAddresses {
    fn scan_addresses(&self, checker: &dyn UsageChecker) -> Result<ScanReport, WalletError>;
}

/// Private key held at an ancestor of the deriver.
pub trait SigningKey {
    fn get_signing_key(&self) -> Result<SigningKeyInfo, WalletError>;
    /// Derive the signing key down to the deriver level.
    fn normalize_key(
        &self,
        info: &SigningKeyInfo,
        password: Option<&[u8]>,
    ) -> Result<RawKey, WalletError>;
    fn change_signing_key_password(
        &self,
        old_password: &[u8],
        new_password: &[u8],
    ) -> Result<KeyRow, WalletError>;
}

pub trait AllUtxos {
    fn get_all_utxo_addresses(&self) -> Result<Vec<AddressFamily>, WalletError>;
    /// Unspent outputs of successful transactions, with their addressing.
    fn get_all_utxos(&self) -> Result<Vec<AddressedUtxo>, WalletError>;
}

/// Merging of publicly derived subtrees below the deriver.
pub trait AddFromPublic {
    fn add_derivation_tree(&self, tree: &[TreeInsert]) -> Result<ExtendOutcome, WalletError>;
}

/// Public key stored on the deriver node.
#[derive(Debug, Clone)]
pub struct StoredPublicKey {
    core: Arc<DeriverCore>,
}

/// Public key row of the deriver node, inside a caller's transaction.
pub fn raw_get_public_key(tx: &StoreTx<'_>, core: &DeriverCore) -> Result<KeyRow, WalletError> {
    GetKeyForPublicDeriver::get(tx, core.id())?
        .public_key
        .ok_or_else(|| {
            WalletError::StaleState(format!("public deriver {} has no public key", core.id()))
        })
}

impl GetPublicKey for StoredPublicKey {
    fn get_public_key(&self) -> Result<KeyRow, WalletError> {
        self.core
            .atomically(deps![GetKeyForPublicDeriver], |tx| raw_get_public_key(tx, &self.core))
    }
}

/// A wallet-account view with the capabilities its configuration allows.
pub struct PublicDeriver {
    core: Arc<DeriverCore>,
    extension: PublicExtension,
    utxos: AllUtxoAddresses,
    cutoff: Option<AccountCutoff>,
    chains: Option<AccountChains>,
    public_key: Option<StoredPublicKey>,
    scan: Option<UtxoAccountScan>,
    signing: Option<AncestorSigningKey>,
}

impl PublicDeriver {
    /// Open public deriver `id` and select its capabilities.
    pub fn load(env: Arc<WalletEnv>, id: PublicDeriverId) -> Result<Self, WalletError> {
        let declared = deps![GetKeyForPublicDeriver, GetConceptualWallet, GetDerivationsByPath];
        let (keys, wallet, path) = env.store.atomically(declared, |tx| {
            let keys = GetKeyForPublicDeriver::get(tx, id)?;
            let wallet =
                GetConceptualWallet::require(tx, keys.public_deriver.conceptual_wallet_id)?;
            if keys.derivation.level != wallet.public_deriver_level {
                return Err(WalletError::StaleState(format!(
                    "public deriver {id} sits at the {} level, wallet {} expects {}",
                    keys.derivation.level, wallet.id, wallet.public_deriver_level
                )));
            }
            let path = GetDerivationsByPath::get_parent_path(
                tx,
                keys.derivation.id,
                keys.derivation.level.depth(),
            )?;
            Ok::<_, WalletError>((keys, wallet, path))
        })?;

        let path_to_public = path
            .iter()
            .skip(1)
            .map(|node| {
                node.index.ok_or_else(|| {
                    WalletError::NotFound(format!("index of derivation {}", node.id))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let has_public_key = keys.public_key.is_some();
        let at_account = wallet.public_deriver_level == DerivationLevel::Account;
        let has_signing = wallet.signing_level.is_some();
        let core = Arc::new(DeriverCore {
            env,
            row: keys.public_deriver,
            derivation: keys.derivation,
            wallet,
            path_to_public,
        });

        let deriver = Self {
            extension: PublicExtension::new(core.clone(), at_account),
            utxos: AllUtxoAddresses::new(core.clone()),
            cutoff: at_account.then(|| AccountCutoff::new(core.clone())),
            chains: at_account.then(|| AccountChains::new(core.clone())),
            public_key: has_public_key.then(|| StoredPublicKey { core: core.clone() }),
            scan: (at_account && has_public_key).then(|| UtxoAccountScan::new(core.clone())),
            signing: has_signing.then(|| AncestorSigningKey::new(core.clone())),
            core,
        };
        tracing::debug!(
            id = %deriver.core.id(),
            level = %deriver.core.level(),
            cutoff = deriver.cutoff.is_some(),
            scan = deriver.scan.is_some(),
            signing = deriver.signing.is_some(),
            "public deriver loaded"
        );
        Ok(deriver)
    }

    pub fn core(&self) -> &DeriverCore {
        &self.core
    }

    pub fn id(&self) -> PublicDeriverId {
        self.core.id()
    }

    pub fn name(&self) -> &str {
        &self.core.row.name
    }

    pub fn level(&self) -> DerivationLevel {
        self.core.level()
    }

    /// Addresses matching `query` below the deriver node, grouped by the
    /// node that produced them.
    pub fn get_addresses_by_path(
        &self,
        query: &[QuerySegment],
    ) -> Result<Vec<AddressFamily>, WalletError> {
        self.core.atomically(resolver::tables(), |tx| {
            resolver::raw_get_addresses_by_path(
                tx,
                self.core.node_id(),
                self.core.level(),
                self.core.path_to_public(),
                query,
            )
        })
    }

    pub fn as_add_from_public(&self) -> &dyn AddFromPublic {
        &self.extension
    }

    pub fn as_all_utxos(&self) -> &dyn AllUtxos {
        &self.utxos
    }

    pub fn as_display_cutoff(&self) -> Option<&dyn DisplayCutoff> {
        self.cutoff.as_ref().map(|c| c as &dyn DisplayCutoff)
    }

    pub fn as_has_chains(&self) -> Option<&dyn HasChains> {
        self.chains.as_ref().map(|c| c as &dyn HasChains)
    }

    pub fn as_get_public_key(&self) -> Option<&dyn GetPublicKey> {
        self.public_key.as_ref().map(|k| k as &dyn GetPublicKey)
    }

    pub fn as_scan_addresses(&self) -> Option<&dyn ScanAddresses> {
        self.scan.as_ref().map(|s| s as &dyn ScanAddresses)
    }

    pub fn as_signing_key(&self) -> Option<&dyn SigningKey> {
        self.signing.as_ref().map(|s| s as &dyn SigningKey)
    }
}

impl std::fmt::Debug for PublicDeriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PublicDeriver")
            .field("id", &self.core.id())
            .field("level", &self.core.level())
            .finish_non_exhaustive()
    }
}

/// Decrypt the public key of a deriver with the environment's crypto.
pub(crate) fn public_key_bytes(core: &DeriverCore, row: &KeyRow) -> Result<RawKey, KeyError> {
    core.env.crypto.decrypt_key(row, None)
}
