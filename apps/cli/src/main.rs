//! ChopShop CLI
//!
//! Offline tooling for the reward pipeline plus a thin client for `chopshopd`.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::{Address, B256, U256};
use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::info;

use chopshop_aggregator::{
    distribution_from_players, verify_distribution, ArtifactStore, FsArtifactStore,
};
use chopshop_core::{u256_dec, ClaimVoucher, EpochDistribution, EpochPlayerRecord};
use chopshop_crypto::{NonceSource, VoucherSigner};
use chopshop_daemon::{run_scheduled, voucher_domain, CoordinatorConfig, EpochCoordinator};
use chopshop_ipc_client::{IpcClient, IpcError, RedeemParams};
use chopshop_keystore::{
    default_keystore_dir, expand_path, load_or_generate_signer, load_signer, ADMIN_KEY_ENV,
    SIGNER_KEY_ENV,
};
use chopshop_logging::init_logging;
use chopshop_merkle::verify_allocation;
use chopshop_settings::Settings;
use chopshop_settlement::{LedgerReader, MockLedger, MockLedgerConfig, StarClaimer, StateLock};

/// ChopShop - epoch reward pipeline
#[derive(Parser)]
#[command(name = "chopshop")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Settings file (defaults to the platform config directory)
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sign a star-claim voucher locally
    Sign {
        /// Claimant address
        #[arg(long)]
        claimant: String,

        /// Stars earned
        #[arg(long)]
        stars: u64,

        /// Explicit nonce (decimal or 0x hex); generated when omitted
        #[arg(long)]
        nonce: Option<String>,
    },

    /// Regenerate an epoch artifact from a players file
    Compute {
        /// JSON array of `{ "address", "starsInEpoch" }`
        #[arg(long)]
        players: PathBuf,

        #[arg(long)]
        epoch: u64,

        /// Write the artifact here instead of stdout
        #[arg(short, long)]
        out: Option<PathBuf>,

        /// Fail unless the regenerated root equals this one
        #[arg(long)]
        expect_root: Option<String>,

        /// Fail unless the regenerated root equals this artifact's root
        #[arg(long)]
        compare: Option<PathBuf>,
    },

    /// Look up an allocation in the artifact store
    Lookup {
        #[arg(long)]
        address: String,

        #[arg(long)]
        epoch: u64,

        /// Artifact directory (defaults to coordinator.artifact_dir)
        #[arg(long)]
        artifact_dir: Option<PathBuf>,
    },

    /// Verify a proof or a whole artifact
    Verify {
        #[command(subcommand)]
        target: VerifyTarget,
    },

    /// Run one rollover cycle against the ledger snapshot
    Rollover,

    /// Run rollover cycles on the configured interval until Ctrl+C
    Schedule {
        /// Override coordinator.interval_secs
        #[arg(long)]
        interval: Option<u64>,
    },

    /// Create a ledger snapshot for the configured chain and keys
    LedgerInit {
        /// Trusted voucher signer (defaults to the signer key's address)
        #[arg(long)]
        signer: Option<String>,

        /// Root-setter account (defaults to the admin key's address)
        #[arg(long)]
        admin: Option<String>,

        /// Extra root-setter accounts, comma separated
        #[arg(long, value_delimiter = ',')]
        grant: Vec<String>,

        /// Overwrite an existing snapshot
        #[arg(long)]
        force: bool,
    },

    /// Create a signing key in the keystore directory, or show the existing one
    Keygen {
        #[arg(long, value_enum, default_value_t = KeyRole::Signer)]
        role: KeyRole,

        /// Key file (defaults to <config dir>/keys/<role>.key)
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Redeem a signed voucher for stars
    Claim {
        /// Voucher JSON as printed by `sign` or `voucher`; `-` reads stdin
        voucher: PathBuf,

        /// Daemon socket (defaults to daemon.socket_path)
        #[arg(long)]
        socket: Option<PathBuf>,

        /// Write to the ledger snapshot even if a daemon is listening
        #[arg(long)]
        offline: bool,
    },

    /// Request a voucher from the daemon and print it as claim input
    Voucher {
        #[arg(long)]
        claimant: String,

        #[arg(long)]
        stars: u64,

        /// Daemon socket (defaults to daemon.socket_path)
        #[arg(long)]
        socket: Option<PathBuf>,
    },

    /// Look up an allocation through the daemon
    Reward {
        #[arg(long)]
        address: String,

        #[arg(long)]
        epoch: u64,

        #[arg(long)]
        socket: Option<PathBuf>,
    },

    /// Print rollover results streamed by the daemon
    Watch {
        /// Stop after this many events
        #[arg(short = 'n', long)]
        count: Option<usize>,

        #[arg(long)]
        socket: Option<PathBuf>,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum KeyRole {
    /// Signs claim vouchers
    Signer,
    /// Holds the root-setter role
    Admin,
}

impl KeyRole {
    fn file_name(self) -> &'static str {
        match self {
            KeyRole::Signer => "signer.key",
            KeyRole::Admin => "admin.key",
        }
    }

    fn setting(self) -> &'static str {
        match self {
            KeyRole::Signer => "signer.key_file",
            KeyRole::Admin => "coordinator.admin_key_file",
        }
    }
}

#[derive(Subcommand)]
enum VerifyTarget {
    /// Check one allocation against a root
    Proof {
        #[arg(long)]
        root: String,

        #[arg(long)]
        address: String,

        /// Reward amount in base units
        #[arg(long)]
        amount: String,

        /// Proof nodes, leaf to root
        #[arg(long, value_delimiter = ',')]
        proof: Vec<String>,
    },

    /// Rebuild an artifact's tree and check every proof
    Artifact {
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let settings = load_settings(cli.settings.as_deref())?;

    match cli.command {
        Commands::Sign {
            claimant,
            stars,
            nonce,
        } => sign(&settings, &claimant, stars, nonce.as_deref())?,
        Commands::Compute {
            players,
            epoch,
            out,
            expect_root,
            compare,
        } => compute(
            &settings,
            &players,
            epoch,
            out.as_deref(),
            expect_root.as_deref(),
            compare.as_deref(),
        )?,
        Commands::Lookup {
            address,
            epoch,
            artifact_dir,
        } => lookup(&settings, &address, epoch, artifact_dir).await?,
        Commands::Verify { target } => verify(target)?,
        Commands::Rollover => rollover(&settings).await?,
        Commands::Schedule { interval } => schedule(&settings, interval).await?,
        Commands::LedgerInit {
            signer,
            admin,
            grant,
            force,
        } => ledger_init(&settings, signer.as_deref(), admin.as_deref(), &grant, force)?,
        Commands::Keygen { role, out } => keygen(role, out)?,
        Commands::Claim {
            voucher,
            socket,
            offline,
        } => claim(&settings, &voucher, socket, offline).await?,
        Commands::Voucher {
            claimant,
            stars,
            socket,
        } => {
            let client = IpcClient::new(socket_path(&settings, socket));
            let voucher = client.issue_voucher(&claimant, stars).await?;
            let params = RedeemParams::from_issued(&claimant, &voucher);
            println!("{}", serde_json::to_string_pretty(&params)?);
        }
        Commands::Reward {
            address,
            epoch,
            socket,
        } => {
            let client = IpcClient::new(socket_path(&settings, socket));
            let reward = client.lookup_reward(&address, epoch).await?;
            println!("Epoch {} reward for {}", reward.epoch, reward.address);
            println!("Amount:     {}", reward.reward_amount);
            println!("Rank:       {}", reward.rank);
            println!("Percentile: {:.2}%", reward.percentile);
            println!("Claimed:    {}", reward.claimed);
            println!("Proof:      {}", reward.proof.join(","));
        }
        Commands::Watch { count, socket } => {
            let client = IpcClient::new(socket_path(&settings, socket));
            let seen = client
                .watch_rollovers(count, |event| match (event.epoch, event.merkle_root) {
                    (Some(epoch), Some(root)) => println!("{} epoch {} root {}", event.result, epoch, root),
                    (Some(epoch), None) => println!("{} epoch {}", event.result, epoch),
                    _ => println!("{}", event.result),
                })
                .await?;
            info!("Received {} rollover events", seen);
        }
    }

    Ok(())
}

// ============================================================================
// Helpers
// ============================================================================

fn load_settings(path: Option<&Path>) -> Result<Settings> {
    let settings = match path {
        Some(path) => Settings::load_from(&expand_path(&path.to_string_lossy())),
        None => Settings::load_or_default(),
    };
    settings.context("Failed to load settings")
}

fn socket_path(settings: &Settings, socket: Option<PathBuf>) -> PathBuf {
    socket.unwrap_or_else(|| settings.daemon.socket_path.clone())
}

fn parse_address(raw: &str) -> Result<Address> {
    Address::from_str(raw.trim()).with_context(|| format!("Invalid address {:?}", raw))
}

fn parse_root(raw: &str) -> Result<B256> {
    B256::from_str(raw.trim()).with_context(|| format!("Invalid 32-byte hash {:?}", raw))
}

fn admin_address(settings: &Settings) -> Result<Address> {
    let admin = load_signer(ADMIN_KEY_ENV, settings.coordinator.admin_key_file.as_deref())
        .context("Failed to load admin key")?;
    Ok(admin.address())
}

/// Load the snapshot as `sender` under its write lock. Every confirmed write
/// is saved back while the lock is held.
fn open_ledger(settings: &Settings, sender: Address) -> Result<(MockLedger, StateLock)> {
    let path = &settings.ledger.state_path;
    if !path.exists() {
        bail!("No ledger state at {:?}; run `chopshop ledger-init` first", path);
    }
    let lock = StateLock::acquire(path).context("Ledger state is in use; stop chopshopd first")?;
    let ledger = MockLedger::load_from(path, sender).context("Failed to load ledger state")?;
    ledger.autosave_to(path);
    Ok((ledger, lock))
}

type LocalCoordinator = EpochCoordinator<MockLedger, MockLedger, Arc<FsArtifactStore>>;

fn local_coordinator(settings: &Settings, ledger: &MockLedger) -> LocalCoordinator {
    let store = Arc::new(FsArtifactStore::new(settings.coordinator.artifact_dir.clone()));
    EpochCoordinator::new(
        ledger.clone(),
        ledger.clone(),
        store,
        CoordinatorConfig::from_settings(settings),
    )
}

// ============================================================================
// Vouchers
// ============================================================================

fn sign(settings: &Settings, claimant: &str, stars: u64, nonce: Option<&str>) -> Result<()> {
    settings.validate().context("Settings are incomplete")?;
    let claimant = parse_address(claimant)?;
    if stars == 0 {
        bail!("--stars must be positive");
    }
    if let Some(max) = settings.signer.max_stars_per_claim {
        if stars > max {
            bail!("--stars {} exceeds the per-claim limit of {}", stars, max);
        }
    }

    let key = load_signer(SIGNER_KEY_ENV, settings.signer.key_file.as_deref())
        .context("Failed to load signer key")?;
    let signer = VoucherSigner::new(key, voucher_domain(&settings.signer))
        .with_validity(settings.signer.validity_secs);
    let nonce = match nonce {
        Some(raw) => u256_dec::parse(raw).map_err(anyhow::Error::msg)?,
        None => NonceSource::new().next_nonce(),
    };

    let voucher = signer
        .sign(claimant, U256::from(stars), nonce)
        .context("Failed to sign voucher")?;
    info!("Signed voucher as {}", signer.address());
    println!("{}", serde_json::to_string_pretty(&voucher)?);
    Ok(())
}

fn read_voucher_input(path: &Path) -> Result<String> {
    if path == Path::new("-") {
        return std::io::read_to_string(std::io::stdin()).context("Failed to read voucher from stdin");
    }
    std::fs::read_to_string(path).with_context(|| format!("Failed to read {:?}", path))
}

async fn claim(settings: &Settings, path: &Path, socket: Option<PathBuf>, offline: bool) -> Result<()> {
    let raw = read_voucher_input(path)?;

    if !offline {
        let params: RedeemParams =
            serde_json::from_str(&raw).context("Voucher JSON is missing fields")?;
        let client = IpcClient::new(socket_path(settings, socket));
        match client.redeem_voucher(&params).await {
            Ok(result) => {
                println!("Claimed in tx {}", result.tx_hash);
                println!("Epoch {} balance: {}", result.epoch, result.stars_balance);
                return Ok(());
            }
            Err(IpcError::DaemonNotRunning) => {
                info!("Daemon is not running; redeeming against the ledger snapshot")
            }
            Err(e) => return Err(e).context("Daemon did not accept the voucher"),
        }
    }

    let voucher: ClaimVoucher = serde_json::from_str(&raw).context("Voucher JSON is malformed")?;
    let (ledger, _lock) = open_ledger(settings, voucher.claimant)?;
    let tx = ledger
        .submit_star_claim(&voucher)
        .await
        .context("Ledger rejected the voucher")?;
    let epoch = ledger.current_epoch().await?;
    let balance = ledger.stars_balance(voucher.claimant, epoch).await?;
    println!("Claimed in tx {}", tx);
    println!("Epoch {} balance: {}", epoch, balance);
    Ok(())
}

fn keygen(role: KeyRole, out: Option<PathBuf>) -> Result<()> {
    let path = out.unwrap_or_else(|| default_keystore_dir().join(role.file_name()));
    let key = load_or_generate_signer(&path)
        .with_context(|| format!("Failed to load or create {:?}", path))?;
    println!("Address:  {}", key.address());
    println!("Key file: {}", path.display());
    println!("Point {} at this file to use it", role.setting());
    Ok(())
}

// ============================================================================
// Artifacts
// ============================================================================

fn compute(
    settings: &Settings,
    players_path: &Path,
    epoch: u64,
    out: Option<&Path>,
    expect_root: Option<&str>,
    compare: Option<&Path>,
) -> Result<()> {
    let raw = std::fs::read(players_path)
        .with_context(|| format!("Failed to read {:?}", players_path))?;
    let players: Vec<EpochPlayerRecord> =
        serde_json::from_slice(&raw).context("Players file is not a JSON array of player records")?;

    let rewards = CoordinatorConfig::from_settings(settings).rewards;
    let distribution = distribution_from_players(epoch, &players, &rewards)
        .context("Failed to build distribution")?;

    let bytes = distribution.to_json_bytes()?;
    match out {
        Some(path) => {
            std::fs::write(path, &bytes).with_context(|| format!("Failed to write {:?}", path))?;
            println!(
                "Epoch {}: {} players, root {}",
                distribution.epoch, distribution.total_players, distribution.merkle_root
            );
        }
        None => println!("{}", String::from_utf8_lossy(&bytes)),
    }

    if let Some(expected) = expect_root {
        let expected = parse_root(expected)?;
        if expected != distribution.merkle_root {
            bail!("Root mismatch: expected {}, regenerated {}", expected, distribution.merkle_root);
        }
        info!("Regenerated root matches {}", expected);
    }
    if let Some(path) = compare {
        let existing = read_artifact(path)?;
        if existing.merkle_root != distribution.merkle_root {
            bail!(
                "Root mismatch: {:?} has {}, regenerated {}",
                path,
                existing.merkle_root,
                distribution.merkle_root
            );
        }
        info!("Regenerated root matches {:?}", path);
    }
    Ok(())
}

fn read_artifact(path: &Path) -> Result<EpochDistribution> {
    let bytes = std::fs::read(path).with_context(|| format!("Failed to read {:?}", path))?;
    EpochDistribution::from_json_bytes(&bytes).with_context(|| format!("Failed to parse {:?}", path))
}

async fn lookup(
    settings: &Settings,
    address: &str,
    epoch: u64,
    artifact_dir: Option<PathBuf>,
) -> Result<()> {
    let address = parse_address(address)?;
    let store = FsArtifactStore::new(
        artifact_dir.unwrap_or_else(|| settings.coordinator.artifact_dir.clone()),
    );
    let Some(distribution) = store.load(epoch).await? else {
        bail!("No distribution for epoch {}", epoch);
    };
    let Some(entry) = distribution.allocation_for(&address) else {
        bail!("No allocation for {} in epoch {}", address, epoch);
    };
    println!("{}", serde_json::to_string_pretty(entry)?);
    Ok(())
}

fn verify(target: VerifyTarget) -> Result<()> {
    match target {
        VerifyTarget::Proof {
            root,
            address,
            amount,
            proof,
        } => {
            let root = parse_root(&root)?;
            let address = parse_address(&address)?;
            let amount = u256_dec::parse(&amount).map_err(anyhow::Error::msg)?;
            let proof = proof
                .iter()
                .filter(|node| !node.trim().is_empty())
                .map(|node| parse_root(node))
                .collect::<Result<Vec<_>>>()?;
            if !verify_allocation(&root, &address, amount, &proof) {
                bail!("Proof does not verify against {}", root);
            }
            println!("Proof valid for {} ({}) under {}", address, amount, root);
        }
        VerifyTarget::Artifact { path } => {
            let distribution = read_artifact(&path)?;
            verify_distribution(&distribution).context("Artifact failed verification")?;
            println!(
                "Artifact valid: epoch {}, {} players, root {}",
                distribution.epoch, distribution.total_players, distribution.merkle_root
            );
        }
    }
    Ok(())
}

// ============================================================================
// Rollover
// ============================================================================

async fn rollover(settings: &Settings) -> Result<()> {
    let (ledger, _lock) = open_ledger(settings, admin_address(settings)?)?;
    let coordinator = local_coordinator(settings, &ledger);

    let result = coordinator
        .run_epoch_cycle()
        .await
        .context("Rollover cycle failed")?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

async fn schedule(settings: &Settings, interval: Option<u64>) -> Result<()> {
    let (ledger, _lock) = open_ledger(settings, admin_address(settings)?)?;
    let coordinator = local_coordinator(settings, &ledger);
    let period = Duration::from_secs(interval.unwrap_or(settings.coordinator.interval_secs).max(1));

    info!("Scheduling rollover every {:?}. Press Ctrl+C to stop.", period);
    let cycles = run_scheduled(
        &coordinator,
        period,
        async {
            let _ = tokio::signal::ctrl_c().await;
        },
        |outcome| {
            if let Ok(result) = outcome {
                println!("{}", result);
            }
        },
    )
    .await;
    println!("Ran {} cycles", cycles);
    Ok(())
}

fn ledger_init(
    settings: &Settings,
    signer: Option<&str>,
    admin: Option<&str>,
    grant: &[String],
    force: bool,
) -> Result<()> {
    settings.validate().context("Settings are incomplete")?;
    let path = &settings.ledger.state_path;
    let _lock = StateLock::acquire(path).context("Ledger state is in use; stop chopshopd first")?;
    if path.exists() && !force {
        bail!("Ledger state already exists at {:?}; pass --force to overwrite", path);
    }

    let voucher_signer = match signer {
        Some(raw) => parse_address(raw)?,
        None => load_signer(SIGNER_KEY_ENV, settings.signer.key_file.as_deref())
            .context("Failed to load signer key; pass --signer")?
            .address(),
    };
    let root_setter = match admin {
        Some(raw) => parse_address(raw)?,
        None => load_signer(ADMIN_KEY_ENV, settings.coordinator.admin_key_file.as_deref())
            .context("Failed to load admin key; pass --admin")?
            .address(),
    };

    let ledger = MockLedger::new(MockLedgerConfig {
        chain_id: settings.signer.chain_id,
        contract: settings.signer.verifying_contract,
        voucher_signer,
        root_setter,
        epoch_duration: settings.ledger.epoch_duration_secs,
        start_time: None,
    });
    ledger.save_to(path).context("Failed to write ledger state")?;
    ledger.autosave_to(path);
    for raw in grant {
        let account = parse_address(raw)?;
        ledger
            .grant_root_setter(account)
            .with_context(|| format!("Failed to grant root setter to {}", account))?;
    }

    println!("Ledger state written to {:?}", path);
    println!("Voucher signer: {}", voucher_signer);
    for setter in &ledger.snapshot().root_setters {
        println!("Root setter:    {}", setter);
    }
    Ok(())
}
