//! ChopShop Settings
//!
//! Configuration for the reward pipeline, stored as a JSON file.
//! Secrets never live here; see `chopshop-keystore`.
//!
//! ## Usage
//!
//! ```no_run
//! use chopshop_settings::Settings;
//!
//! let mut settings = Settings::load_or_default()?;
//! settings.rewards.total_emission = 20_000;
//! settings.save()?;
//! # Ok::<(), chopshop_settings::SettingsError>(())
//! ```

mod config;

pub use config::{
    CoordinatorSettings, DaemonSettings, LedgerSettings, RewardSettings, Settings, SignerSettings,
};

use std::path::PathBuf;

use thiserror::Error;

use chopshop_core::ChopsError;
use chopshop_keystore::default_config_dir;

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("Failed to read settings: {0}")]
    ReadError(std::io::Error),

    #[error("Failed to write settings: {0}")]
    WriteError(std::io::Error),

    #[error("Failed to parse settings: {0}")]
    ParseError(serde_json::Error),

    #[error("Failed to create config directory: {0}")]
    CreateDirError(std::io::Error),

    #[error("Invalid settings: {0}")]
    Invalid(String),
}

pub type Result<T> = std::result::Result<T, SettingsError>;

impl From<SettingsError> for ChopsError {
    fn from(e: SettingsError) -> Self {
        ChopsError::Configuration(e.to_string())
    }
}

/// Get the default settings file path
pub fn default_settings_path() -> PathBuf {
    default_config_dir().join("settings.json")
}
