//! Configuration types

use std::path::{Path, PathBuf};

use alloy_primitives::Address;
use serde::{Deserialize, Serialize};
use tracing::info;

use chopshop_core::CurveExponent;
use chopshop_keystore::default_config_dir;

use crate::{default_settings_path, Result, SettingsError};

/// Main settings structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub signer: SignerSettings,

    #[serde(default)]
    pub rewards: RewardSettings,

    #[serde(default)]
    pub coordinator: CoordinatorSettings,

    #[serde(default)]
    pub ledger: LedgerSettings,

    #[serde(default)]
    pub daemon: DaemonSettings,

    /// Custom settings file path (not serialized)
    #[serde(skip)]
    config_path: Option<PathBuf>,
}

impl Settings {
    /// Load settings from the default path, or create defaults
    pub fn load_or_default() -> Result<Self> {
        Self::load_from(&default_settings_path())
    }

    /// Load settings from a specific path, or create defaults
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path).map_err(SettingsError::ReadError)?;
            let mut settings: Settings =
                serde_json::from_str(&content).map_err(SettingsError::ParseError)?;
            settings.config_path = Some(path.to_path_buf());
            info!("Loaded settings from {:?}", path);
            Ok(settings)
        } else {
            let mut settings = Self::default();
            settings.config_path = Some(path.to_path_buf());
            Ok(settings)
        }
    }

    /// Save settings to the configured path
    pub fn save(&self) -> Result<()> {
        let path = self.config_path.clone().unwrap_or_else(default_settings_path);
        self.save_to(&path)
    }

    /// Save settings to a specific path
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(SettingsError::CreateDirError)?;
            }
        }

        let content = serde_json::to_string_pretty(self).map_err(SettingsError::ParseError)?;
        std::fs::write(path, content).map_err(SettingsError::WriteError)?;
        info!("Saved settings to {:?}", path);
        Ok(())
    }

    /// Checks that must pass before anything signs or publishes.
    pub fn validate(&self) -> Result<()> {
        if self.signer.verifying_contract == Address::ZERO {
            return Err(SettingsError::Invalid(
                "signer.verifying_contract is not set".to_string(),
            ));
        }
        if self.signer.chain_id == 0 {
            return Err(SettingsError::Invalid("signer.chain_id must be non-zero".to_string()));
        }
        if self.signer.validity_secs == 0 {
            return Err(SettingsError::Invalid(
                "signer.validity_secs must be non-zero".to_string(),
            ));
        }
        if self.rewards.total_emission == 0 {
            return Err(SettingsError::Invalid(
                "rewards.total_emission must be non-zero".to_string(),
            ));
        }
        if self.coordinator.interval_secs == 0 {
            return Err(SettingsError::Invalid(
                "coordinator.interval_secs must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Voucher signing settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignerSettings {
    #[serde(default = "default_chain_id")]
    pub chain_id: u64,

    /// The stars contract that verifies vouchers
    #[serde(default)]
    pub verifying_contract: Address,

    /// Voucher lifetime in seconds
    #[serde(default = "default_validity_secs")]
    pub validity_secs: u64,

    /// Largest `starsEarned` accepted per request; `null` for no cap
    #[serde(default = "default_max_stars_per_claim")]
    pub max_stars_per_claim: Option<u64>,

    /// Key file used when `CHOPS_SIGNER_KEY` is unset
    #[serde(default)]
    pub key_file: Option<PathBuf>,
}

fn default_chain_id() -> u64 {
    8453
}

fn default_validity_secs() -> u64 {
    3600
}

fn default_max_stars_per_claim() -> Option<u64> {
    Some(10_000)
}

impl Default for SignerSettings {
    fn default() -> Self {
        Self {
            chain_id: default_chain_id(),
            verifying_contract: Address::ZERO,
            validity_secs: default_validity_secs(),
            max_stars_per_claim: default_max_stars_per_claim(),
            key_file: None,
        }
    }
}

/// Reward curve settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RewardSettings {
    /// Whole tokens per epoch
    #[serde(default = "default_total_emission")]
    pub total_emission: u64,

    #[serde(default)]
    pub curve_exponent: CurveExponent,

    #[serde(default = "default_token_decimals")]
    pub token_decimals: u8,
}

fn default_total_emission() -> u64 {
    10_000
}

fn default_token_decimals() -> u8 {
    18
}

impl Default for RewardSettings {
    fn default() -> Self {
        Self {
            total_emission: default_total_emission(),
            curve_exponent: CurveExponent::default(),
            token_decimals: default_token_decimals(),
        }
    }
}

/// Epoch rollover settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorSettings {
    #[serde(default = "default_artifact_dir")]
    pub artifact_dir: PathBuf,

    #[serde(default = "default_history_path")]
    pub history_path: PathBuf,

    /// Seconds between scheduled cycles
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    /// Balance reads in flight while collecting players
    #[serde(default = "default_collector_concurrency")]
    pub collector_concurrency: usize,

    /// Key file used when `CHOPS_ADMIN_KEY` is unset
    #[serde(default)]
    pub admin_key_file: Option<PathBuf>,
}

fn default_artifact_dir() -> PathBuf {
    default_config_dir().join("artifacts")
}

fn default_history_path() -> PathBuf {
    default_config_dir().join("history.jsonl")
}

fn default_interval_secs() -> u64 {
    300
}

fn default_collector_concurrency() -> usize {
    8
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self {
            artifact_dir: default_artifact_dir(),
            history_path: default_history_path(),
            interval_secs: default_interval_secs(),
            collector_concurrency: default_collector_concurrency(),
            admin_key_file: None,
        }
    }
}

/// Ledger settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerSettings {
    /// JSON snapshot backing the in-process ledger
    #[serde(default = "default_state_path")]
    pub state_path: PathBuf,

    #[serde(default = "default_epoch_duration_secs")]
    pub epoch_duration_secs: u64,
}

fn default_state_path() -> PathBuf {
    default_config_dir().join("ledger.json")
}

fn default_epoch_duration_secs() -> u64 {
    604_800
}

impl Default for LedgerSettings {
    fn default() -> Self {
        Self {
            state_path: default_state_path(),
            epoch_duration_secs: default_epoch_duration_secs(),
        }
    }
}

/// Daemon settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonSettings {
    /// Unix socket for JSON-RPC requests
    #[serde(default = "default_socket_path")]
    pub socket_path: PathBuf,
}

fn default_socket_path() -> PathBuf {
    let runtime = std::env::var("XDG_RUNTIME_DIR").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(runtime).join("chopshop.sock")
}

impl Default for DaemonSettings {
    fn default() -> Self {
        Self {
            socket_path: default_socket_path(),
        }
    }
}
