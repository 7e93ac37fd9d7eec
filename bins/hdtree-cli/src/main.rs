//! hdtree-cli — operator interface over a derivation-tree store.
//!
//! Creates wallets, hands out receive addresses, moves display cutoffs,
//! scans accounts against a list of used addresses and manages the signing
//! key password. Every command opens the store, runs one engine operation
//! and prints the result, as text or as JSON with `--json`.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;

use hdtree_core::constants::{EXTERNAL, INTERNAL, MAINNET_PROTOCOL_MAGIC, TESTNET_PROTOCOL_MAGIC};
use hdtree_core::error::DiscoveryError;
use hdtree_core::types::{DerivationLevel, PublicDeriverId, TxState};
use hdtree_store::TreeStore;
use hdtree_store::config::StoreConfig;
use hdtree_wallet::mnemonic::{mnemonic_to_seed, seed_to_mnemonic};
use hdtree_wallet::{
    ExtendedPrivateKey, ExtendedPublicKey, KeySource, NewOutput, PublicDeriver, Seed, WalletConfig,
    WalletEnv, WalletSettings, create_wallet, list_public_derivers, record_output,
};

/// File in the data directory holding the [`WalletConfig`] chosen at init.
const WALLET_CONFIG_FILE: &str = "wallet.json";

/// HD wallet derivation-tree command-line interface.
#[derive(Parser)]
#[command(name = "hdtree-cli")]
#[command(version, about = "Derivation-tree wallet operations")]
struct Cli {
    /// Data directory (default: $HDTREE_DATA_DIR, then the platform data dir).
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Public deriver to operate on (default: the first one).
    #[arg(long, global = true)]
    deriver: Option<u64>,

    /// Print results as JSON.
    #[arg(long, global = true)]
    json: bool,

    /// Log level filter, overridden by RUST_LOG.
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    /// Log format: "text" or "json".
    #[arg(long, global = true, default_value = "text")]
    log_format: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a wallet from a new or given seed, or watch-only from an account key.
    Init(InitArgs),
    /// List public derivers.
    Derivers,
    /// List addresses of the deriver, or of one chain.
    Addresses(AddressesArgs),
    /// Hand out the next receive address.
    Receive,
    /// Show or move the display cutoff of the receiving chain.
    Cutoff {
        #[command(subcommand)]
        action: CutoffAction,
    },
    /// Show the lowest unused address of a chain.
    NextUnused(NextUnusedArgs),
    /// Scan the account against a file of used addresses.
    Scan(ScanArgs),
    /// Record a transaction output paying to a wallet address.
    RecordOutput(RecordOutputArgs),
    /// List unspent outputs with their addressing.
    Utxos,
    /// Show where the signing key is held.
    SigningKey,
    /// Change the signing key password.
    Passwd,
}

#[derive(Args)]
struct InitArgs {
    /// Wallet name.
    #[arg(short, long, default_value = "wallet")]
    name: String,

    /// Seed as a 24-word mnemonic or 64 hex characters (default: generate).
    #[arg(long, conflicts_with = "account_key")]
    seed: Option<String>,

    /// Hex account public key; creates a watch-only wallet.
    #[arg(long)]
    account_key: Option<String>,

    /// Account index, unhardened.
    #[arg(long, default_value_t = 0)]
    account: u32,

    /// Place the public deriver on the receiving chain instead of the account.
    #[arg(long)]
    chain_level: bool,

    /// Consecutive unused addresses that end a scan.
    #[arg(long)]
    gap_limit: Option<u32>,

    /// Use the test network protocol magic.
    #[arg(long)]
    testnet: bool,
}

#[derive(Args)]
struct AddressesArgs {
    /// Restrict to one chain (0 receiving, 1 change).
    #[arg(long)]
    chain: Option<u32>,
}

#[derive(Subcommand)]
enum CutoffAction {
    /// Print the current cutoff.
    Get,
    /// Overwrite the cutoff.
    Set {
        /// New cutoff value.
        index: u32,
    },
}

#[derive(Args)]
struct NextUnusedArgs {
    /// Chain to inspect (default: change).
    #[arg(long, default_value_t = INTERNAL)]
    chain: u32,
}

#[derive(Args)]
struct ScanArgs {
    /// File with one used address per line.
    #[arg(long)]
    used_file: Option<PathBuf>,
}

#[derive(Args)]
struct RecordOutputArgs {
    /// Address the output pays to.
    #[arg(long)]
    address: String,

    /// Transaction id.
    #[arg(long)]
    txid: String,

    /// Output index within the transaction.
    #[arg(long, default_value_t = 0)]
    index: u32,

    /// Amount in base units.
    #[arg(long)]
    amount: u64,

    /// Transaction state.
    #[arg(long, value_enum, default_value_t = StateArg::Successful)]
    state: StateArg,

    /// Mark the output as already spent.
    #[arg(long)]
    spent: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum StateArg {
    Pending,
    Successful,
    Failed,
}

impl From<StateArg> for TxState {
    fn from(s: StateArg) -> Self {
        match s {
            StateArg::Pending => TxState::Pending,
            StateArg::Successful => TxState::Successful,
            StateArg::Failed => TxState::Failed,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level, &cli.log_format);

    let ctx = App::open(cli.data_dir.clone(), cli.json)?;
    match &cli.command {
        Commands::Init(args) => cmd_init(&ctx, args),
        Commands::Derivers => cmd_derivers(&ctx),
        Commands::Addresses(args) => cmd_addresses(&ctx, &ctx.deriver(cli.deriver)?, args),
        Commands::Receive => cmd_receive(&ctx, &ctx.deriver(cli.deriver)?),
        Commands::Cutoff { action } => cmd_cutoff(&ctx, &ctx.deriver(cli.deriver)?, action),
        Commands::NextUnused(args) => cmd_next_unused(&ctx, &ctx.deriver(cli.deriver)?, args),
        Commands::Scan(args) => cmd_scan(&ctx, &ctx.deriver(cli.deriver)?, args),
        Commands::RecordOutput(args) => cmd_record_output(&ctx, args),
        Commands::Utxos => cmd_utxos(&ctx, &ctx.deriver(cli.deriver)?),
        Commands::SigningKey => cmd_signing_key(&ctx, &ctx.deriver(cli.deriver)?),
        Commands::Passwd => cmd_passwd(&ctx.deriver(cli.deriver)?),
    }
}

fn init_logging(level_str: &str, format: &str) {
    use tracing_subscriber::filter::EnvFilter;
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level_str));

    if format == "json" {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init();
    }
}

/// Opened store plus the wallet configuration of its data directory.
struct App {
    env: Arc<WalletEnv>,
    data_dir: PathBuf,
    json: bool,
}

impl App {
    fn open(data_dir: Option<PathBuf>, json: bool) -> Result<Self> {
        let mut store_config = StoreConfig::default();
        let data_dir =
            data_dir.or_else(|| std::env::var_os("HDTREE_DATA_DIR").map(PathBuf::from));
        if let Some(dir) = data_dir {
            store_config = store_config.with_data_dir(dir);
        }
        std::fs::create_dir_all(&store_config.data_dir).with_context(|| {
            format!("Failed to create data directory: {}", store_config.data_dir.display())
        })?;
        let config = load_wallet_config(&store_config.data_dir)?;
        let store = TreeStore::open_with(&store_config).context("Failed to open store")?;
        Ok(Self {
            env: Arc::new(WalletEnv::new(Arc::new(store), config)),
            data_dir: store_config.data_dir,
            json,
        })
    }

    fn deriver(&self, id: Option<u64>) -> Result<PublicDeriver> {
        let id = match id {
            Some(id) => PublicDeriverId(id),
            None => list_public_derivers(&self.env.store)?
                .first()
                .map(|row| row.id)
                .context("No wallet in this data directory; run `hdtree-cli init` first")?,
        };
        PublicDeriver::load(self.env.clone(), id)
            .with_context(|| format!("Failed to load public deriver {id}"))
    }

    fn print<T: Serialize>(&self, value: &T, text: impl FnOnce() -> String) -> Result<()> {
        if self.json {
            println!("{}", serde_json::to_string_pretty(value)?);
        } else {
            println!("{}", text());
        }
        Ok(())
    }
}

fn load_wallet_config(data_dir: &Path) -> Result<WalletConfig> {
    let path = data_dir.join(WALLET_CONFIG_FILE);
    if !path.exists() {
        return Ok(WalletConfig::default());
    }
    let raw = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("Invalid wallet config: {}", path.display()))
}

fn save_wallet_config(data_dir: &Path, config: &WalletConfig) -> Result<()> {
    let path = data_dir.join(WALLET_CONFIG_FILE);
    std::fs::write(&path, serde_json::to_string_pretty(config)?)
        .with_context(|| format!("Failed to write {}", path.display()))
}

/// Password from `HDTREE_PASSWORD`, or prompted without echo.
fn password(prompt: &str) -> Result<String> {
    if let Ok(p) = std::env::var("HDTREE_PASSWORD") {
        return Ok(p);
    }
    rpassword::prompt_password(format!("{prompt}: ")).context("Failed to read password")
}

/// Parse seed input as either a BIP-39 mnemonic (multi-word) or hex string.
fn parse_seed_input(input: &str) -> Result<Seed> {
    let trimmed = input.trim();
    if trimmed.split_whitespace().count() > 1 {
        return mnemonic_to_seed(trimmed).map_err(|e| anyhow::anyhow!("Invalid mnemonic: {e}"));
    }
    let bytes = hex::decode(trimmed).context("Invalid hex seed")?;
    let array: [u8; 32] = bytes
        .try_into()
        .map_err(|_| anyhow::anyhow!("Seed must be exactly 32 bytes (64 hex characters)"))?;
    Ok(Seed::from_bytes(array))
}

fn cmd_init(ctx: &App, args: &InitArgs) -> Result<()> {
    if !list_public_derivers(&ctx.env.store)?.is_empty() {
        bail!("Data directory already holds a wallet: {}", ctx.data_dir.display());
    }
    let mut config = ctx.env.config.clone();
    if let Some(gap) = args.gap_limit {
        config = config.with_gap_limit(gap);
    }
    config = config.with_protocol_magic(if args.testnet {
        TESTNET_PROTOCOL_MAGIC
    } else {
        MAINNET_PROTOCOL_MAGIC
    });
    let env = WalletEnv::new(ctx.env.store.clone(), config.clone());

    let settings = WalletSettings {
        account: args.account,
        public_deriver_level: if args.chain_level {
            DerivationLevel::Chain
        } else {
            DerivationLevel::Account
        },
        ..WalletSettings::new(args.name.clone())
    };

    let mut mnemonic = None;
    let created = if let Some(key_hex) = &args.account_key {
        let bytes = hex::decode(key_hex.trim()).context("Invalid hex account key")?;
        let key = ExtendedPublicKey::from_bytes(&bytes).context("Invalid account key")?;
        create_wallet(&env, &settings, KeySource::AccountPublic { key: &key })?
    } else {
        let seed = match &args.seed {
            Some(input) => parse_seed_input(input)?,
            None => {
                let seed = Seed::generate();
                mnemonic = Some(seed_to_mnemonic(&seed)?);
                seed
            }
        };
        let pass = password("Enter wallet password")?;
        if std::env::var("HDTREE_PASSWORD").is_err() && pass != password("Confirm password")? {
            bail!("Passwords do not match");
        }
        let root = ExtendedPrivateKey::from_seed(&seed);
        create_wallet(
            &env,
            &settings,
            KeySource::Root {
                key: &root,
                password: pass.as_bytes(),
            },
        )?
    };
    save_wallet_config(&ctx.data_dir, &config)?;

    ctx.print(&created, || {
        let mut out = format!(
            "Wallet {} created with public deriver {} ({}) at the {} level",
            created.wallet.id,
            created.public_deriver.id,
            created.public_deriver.name,
            created.wallet.public_deriver_level,
        );
        if let Some(phrase) = &mnemonic {
            out.push_str("\n\nSEED PHRASE (24 words, shown once):\n  ");
            out.push_str(phrase);
        }
        out
    })
}

fn cmd_derivers(ctx: &App) -> Result<()> {
    let rows = list_public_derivers(&ctx.env.store)?;
    ctx.print(&rows, || {
        rows.iter()
            .map(|r| format!("{}\t{}\twallet {}", r.id, r.name, r.conceptual_wallet_id))
            .collect::<Vec<_>>()
            .join("\n")
    })
}

fn cmd_addresses(ctx: &App, deriver: &PublicDeriver, args: &AddressesArgs) -> Result<()> {
    let families = match args.chain {
        Some(chain) => deriver
            .as_has_chains()
            .context("Per-chain listing needs an account-level deriver")?
            .get_addresses_for_chain(chain)?,
        None => deriver.as_all_utxos().get_all_utxo_addresses()?,
    };
    ctx.print(&families, || {
        families
            .iter()
            .flat_map(|f| f.addrs.iter().map(move |a| format!("{}\t{}", f.addressing, a.hash)))
            .collect::<Vec<_>>()
            .join("\n")
    })
}

fn cmd_receive(ctx: &App, deriver: &PublicDeriver) -> Result<()> {
    let family = deriver
        .as_display_cutoff()
        .context("Receiving needs an account-level deriver")?
        .pop_address()?;
    ctx.print(&family, || {
        let hash = family.addrs.first().map_or("", |a| a.hash.as_str());
        format!("{hash}\t{}", family.addressing)
    })
}

fn cmd_cutoff(ctx: &App, deriver: &PublicDeriver, action: &CutoffAction) -> Result<()> {
    let cutoff = deriver
        .as_display_cutoff()
        .context("Display cutoffs need an account-level deriver")?;
    if let CutoffAction::Set { index } = action {
        cutoff.set_cutoff(*index)?;
    }
    let value = cutoff.get_cutoff()?;
    ctx.print(&serde_json::json!({ "chain": EXTERNAL, "cutoff": value }), || {
        value.to_string()
    })
}

fn cmd_next_unused(ctx: &App, deriver: &PublicDeriver, args: &NextUnusedArgs) -> Result<()> {
    let next = deriver
        .as_has_chains()
        .context("Chain lookups need an account-level deriver")?
        .get_next_unused_for_chain(args.chain)?;
    ctx.print(&next, || match &next.address_info {
        Some(info) => format!("{}\t{}\t{}", next.index, info.addr.hash, info.addressing),
        None => format!("{}\t(not derived yet; run `scan`)", next.index),
    })
}

fn cmd_scan(ctx: &App, deriver: &PublicDeriver, args: &ScanArgs) -> Result<()> {
    let used: HashSet<String> = match &args.used_file {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(String::from)
            .collect(),
        None => HashSet::new(),
    };
    let checker = |batch: &[String]| -> Result<Vec<String>, DiscoveryError> {
        Ok(batch.iter().filter(|a| used.contains(*a)).cloned().collect())
    };
    let report = deriver
        .as_scan_addresses()
        .context("Scanning needs an account-level deriver with a public key")?
        .scan_addresses(&checker)?;
    ctx.print(&report, || {
        format!(
            "Scan {}: {} candidates, {} new nodes, {} cutoffs raised",
            report.stage,
            report.candidates,
            report.inserted.len(),
            report.cutoffs_raised.len()
        )
    })
}

fn cmd_record_output(ctx: &App, args: &RecordOutputArgs) -> Result<()> {
    let row = record_output(
        &ctx.env.store,
        &NewOutput {
            address: args.address.clone(),
            txid: args.txid.clone(),
            output_index: args.index,
            amount: args.amount,
            state: args.state.into(),
            is_unspent: !args.spent,
        },
    )?;
    ctx.print(&row, || format!("Recorded {}:{} ({})", row.txid, row.output_index, row.amount))
}

fn cmd_utxos(ctx: &App, deriver: &PublicDeriver) -> Result<()> {
    let utxos = deriver.as_all_utxos().get_all_utxos()?;
    ctx.print(&utxos, || {
        utxos
            .iter()
            .map(|u| {
                format!(
                    "{}:{}\t{}\t{}\t{}",
                    u.output.txid, u.output.output_index, u.output.amount, u.address, u.addressing
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    })
}

fn cmd_signing_key(ctx: &App, deriver: &PublicDeriver) -> Result<()> {
    let info = deriver
        .as_signing_key()
        .context("Wallet is watch-only")?
        .get_signing_key()?;
    let summary = serde_json::json!({
        "level": info.level,
        "key_id": info.row.id,
        "encrypted": info.row.is_encrypted,
        "password_last_update": info.row.password_last_update,
        "levels_below": info.path.len().saturating_sub(1),
    });
    ctx.print(&summary, || {
        format!(
            "Signing key {} at the {} level, {} levels above the deriver ({})",
            info.row.id,
            info.level,
            info.path.len().saturating_sub(1),
            if info.row.is_encrypted { "encrypted" } else { "plain" },
        )
    })
}

fn cmd_passwd(deriver: &PublicDeriver) -> Result<()> {
    let signing = deriver.as_signing_key().context("Wallet is watch-only")?;
    let old = rpassword::prompt_password("Current password: ").context("Failed to read password")?;
    let new = rpassword::prompt_password("New password: ").context("Failed to read password")?;
    let confirm =
        rpassword::prompt_password("Confirm new password: ").context("Failed to read password")?;
    if new != confirm {
        bail!("Passwords do not match");
    }
    signing
        .change_signing_key_password(old.as_bytes(), new.as_bytes())
        .context("Failed to change password (check the current password)")?;
    println!("Password changed");
    Ok(())
}
