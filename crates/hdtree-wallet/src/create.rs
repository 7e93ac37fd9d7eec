//! Wallet creation.
//!
//! One transaction writes the conceptual wallet, the tree down to both
//! chains of one account with an initial gap of addresses per chain, and the
//! public deriver.

use serde::{Deserialize, Serialize};

use hdtree_core::constants::{COIN_TYPE, EXTERNAL, HARDENED, INTERNAL};
use hdtree_core::traits::RawKey;
use hdtree_core::tree::{KeyInsert, LevelInsert, TreeInsert};
use hdtree_core::types::{
    ConceptualWalletRow, DerivationLevel, DerivationScheme, DerivationTables, PublicDeriverRow,
    WalletId,
};
use hdtree_store::derivations::GetDerivationsByPath;
use hdtree_store::tree::AddDerivationTree;
use hdtree_store::wallets::{AddConceptualWallet, AddPublicDeriver, GetPublicDeriver};
use hdtree_store::{TreeStore, deps};

use crate::deriver::WalletEnv;
use crate::error::WalletError;
use crate::keys::{ExtendedPrivateKey, ExtendedPublicKey, address_for};

/// Where the wallet's keys come from.
pub enum KeySource<'a> {
    /// Full wallet: the root private key, stored encrypted under `password`.
    Root {
        key: &'a ExtendedPrivateKey,
        password: &'a [u8],
    },
    /// Watch-only wallet built from an account public key.
    AccountPublic { key: &'a ExtendedPublicKey },
}

/// Shape of a new wallet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletSettings {
    pub name: String,
    pub scheme: DerivationScheme,
    /// Account index, without the hardened offset.
    pub account: u32,
    /// `Account` or `Chain`; a chain-level deriver sits on the receiving chain.
    pub public_deriver_level: DerivationLevel,
}

impl WalletSettings {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            scheme: DerivationScheme::Bip44,
            account: 0,
            public_deriver_level: DerivationLevel::Account,
        }
    }
}

/// Rows written by [`create_wallet`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CreatedWallet {
    pub wallet: ConceptualWalletRow,
    pub public_deriver: PublicDeriverRow,
}

fn chain_subtree(
    env: &WalletEnv,
    account: &ExtendedPublicKey,
    chain: u32,
    chain_key: Option<KeyInsert>,
) -> Result<TreeInsert, WalletError> {
    let addresses = (0..env.config.gap_limit)
        .map(|index| {
            address_for(
                account,
                chain,
                index,
                env.config.protocol_magic,
                env.config.address_type,
            )
            .map(|hash| TreeInsert::address(index, hash, env.config.address_type, false))
        })
        .collect::<Result<Vec<_>, _>>()?;
    let node =
        TreeInsert::new(chain, LevelInsert::Chain { display_cutoff: 0 }).with_children(addresses);
    Ok(match chain_key {
        Some(key) => node.with_public_key(key),
        None => node,
    })
}

/// Create a wallet with one account and return its public deriver.
pub fn create_wallet(
    env: &WalletEnv,
    settings: &WalletSettings,
    source: KeySource<'_>,
) -> Result<CreatedWallet, WalletError> {
    let deriver_path_len = match settings.public_deriver_level {
        DerivationLevel::Account => 3,
        DerivationLevel::Chain => 4,
        other => {
            return Err(WalletError::StaleState(format!(
                "public derivers at the {other} level are not supported"
            )));
        }
    };
    if settings.account >= HARDENED {
        return Err(WalletError::StaleState(format!(
            "account index {} is out of range",
            settings.account
        )));
    }
    let account_index = HARDENED + settings.account;
    let purpose = settings.scheme.purpose();

    let (root_private, signing_level, account_key) = match source {
        KeySource::Root { key, password } => {
            let raw = RawKey::new(key.to_bytes().to_vec());
            let sealed = env.crypto.encrypt_key(&raw, Some(password))?;
            let sealed = KeyInsert {
                password_last_update: Some(chrono::Utc::now().timestamp()),
                ..sealed
            };
            let account = key.derive_path(&[purpose, COIN_TYPE, account_index]);
            let public = env
                .crypto
                .to_public(&RawKey::new(account.to_bytes().to_vec()))?;
            let account = ExtendedPublicKey::from_bytes(public.as_bytes())?;
            (Some(sealed), Some(DerivationLevel::Root), account)
        }
        KeySource::AccountPublic { key } => (None, None, *key),
    };

    let chain_key = |chain: u32| -> Result<Option<KeyInsert>, WalletError> {
        if settings.public_deriver_level != DerivationLevel::Chain || chain != EXTERNAL {
            return Ok(None);
        }
        Ok(Some(KeyInsert::plain(&account_key.derive_child(chain)?.to_bytes())))
    };
    let chains = vec![
        chain_subtree(env, &account_key, EXTERNAL, chain_key(EXTERNAL)?)?,
        chain_subtree(env, &account_key, INTERNAL, chain_key(INTERNAL)?)?,
    ];
    let mut account_node =
        TreeInsert::new(account_index, LevelInsert::Account).with_children(chains);
    if settings.public_deriver_level == DerivationLevel::Account {
        account_node = account_node.with_public_key(KeyInsert::plain(&account_key.to_bytes()));
    }
    let tree = vec![TreeInsert::new(purpose, LevelInsert::Purpose)
        .with_children(vec![TreeInsert::new(COIN_TYPE, LevelInsert::CoinType)
            .with_children(vec![account_node])])];

    let tables = DerivationTables::for_scheme(settings.scheme);
    let declared = deps![
        AddDerivationTree,
        GetDerivationsByPath,
        AddConceptualWallet,
        AddPublicDeriver
    ]
    .with_derivation_tables(&tables);
    let created = env.store.atomically(declared, |tx| {
        let root = AddDerivationTree::insert_root(tx, root_private.as_ref(), None, &tables)?;
        AddDerivationTree::excluding_parent(tx, root.id, &tree, &tables)?;
        let mut path = vec![purpose, COIN_TYPE, account_index];
        if deriver_path_len == 4 {
            path.push(EXTERNAL);
        }
        let nodes = GetDerivationsByPath::get_single_path(tx, root.id, &path)?;
        let deriver_node = nodes
            .last()
            .ok_or_else(|| WalletError::NotFound("public deriver node".into()))?;
        let wallet = AddConceptualWallet::add(
            tx,
            ConceptualWalletRow {
                id: WalletId(0),
                name: settings.name.clone(),
                scheme: settings.scheme,
                public_deriver_level: settings.public_deriver_level,
                signing_level,
                protocol_magic: env.config.protocol_magic,
                address_type: env.config.address_type,
                derivation_tables: tables.clone(),
            },
        )?;
        let public_deriver = AddPublicDeriver::add(
            tx,
            wallet.id,
            deriver_node.id,
            &format!("{} #{}", settings.name, settings.account),
        )?;
        Ok::<_, WalletError>(CreatedWallet {
            wallet,
            public_deriver,
        })
    })?;
    tracing::info!(
        wallet = %created.wallet.id,
        public_deriver = %created.public_deriver.id,
        level = %settings.public_deriver_level,
        watch_only = signing_level.is_none(),
        "wallet created"
    );
    Ok(created)
}

/// Every public deriver in the store, by id.
pub fn list_public_derivers(store: &TreeStore) -> Result<Vec<PublicDeriverRow>, WalletError> {
    store.atomically(deps![GetPublicDeriver], |tx| Ok(GetPublicDeriver::all(tx)?))
}
