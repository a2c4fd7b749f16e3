//! ChopShop Keystore
//!
//! secp256k1 signing keys for the voucher signer and the root publisher.
//! Keys come from an environment variable (hex) or a key file holding the
//! hex secret. Key material is never logged.

use std::fs;
use std::path::{Path, PathBuf};

use alloy_primitives::B256;
use alloy_signer_local::PrivateKeySigner;
use thiserror::Error;
use tracing::{debug, info};

use chopshop_core::ChopsError;

/// Hex private key used to sign claim vouchers.
pub const SIGNER_KEY_ENV: &str = "CHOPS_SIGNER_KEY";

/// Hex private key holding the root-setter role.
pub const ADMIN_KEY_ENV: &str = "CHOPS_ADMIN_KEY";

const SERVICE: &str = "chopshop";

#[derive(Error, Debug)]
pub enum KeystoreError {
    #[error("Failed to read key file: {0}")]
    ReadError(String),
    #[error("Failed to write key file: {0}")]
    WriteError(String),
    #[error("Invalid key format")]
    InvalidFormat,
    #[error("Failed to create directory: {0}")]
    CreateDirError(String),
    #[error("No key configured: set {0} or provide a key file")]
    MissingKey(String),
}

pub type Result<T> = std::result::Result<T, KeystoreError>;

impl From<KeystoreError> for ChopsError {
    fn from(e: KeystoreError) -> Self {
        ChopsError::Configuration(e.to_string())
    }
}

/// Parse a 32-byte hex secret, with or without `0x`.
pub fn parse_private_key(hex_key: &str) -> Result<PrivateKeySigner> {
    let trimmed = hex_key.trim();
    let digits = trimmed.strip_prefix("0x").unwrap_or(trimmed);
    let bytes = hex::decode(digits).map_err(|_| KeystoreError::InvalidFormat)?;
    if bytes.len() != 32 {
        return Err(KeystoreError::InvalidFormat);
    }
    PrivateKeySigner::from_bytes(&B256::from_slice(&bytes)).map_err(|_| KeystoreError::InvalidFormat)
}

/// Load a key from the environment variable `var`.
pub fn load_signer_from_env(var: &str) -> Result<PrivateKeySigner> {
    match std::env::var(var) {
        Ok(value) if !value.trim().is_empty() => {
            let signer = parse_private_key(&value)?;
            debug!("Loaded key for {} from {}", signer.address(), var);
            Ok(signer)
        }
        _ => Err(KeystoreError::MissingKey(var.to_string())),
    }
}

/// Load a key from a file holding the hex secret.
pub fn load_signer_file(path: &Path) -> Result<PrivateKeySigner> {
    debug!("Loading key from {}", path.display());
    let content = fs::read_to_string(path).map_err(|e| KeystoreError::ReadError(e.to_string()))?;
    parse_private_key(&content)
}

/// Load a key from `var`, falling back to `key_file`.
pub fn load_signer(var: &str, key_file: Option<&Path>) -> Result<PrivateKeySigner> {
    match load_signer_from_env(var) {
        Err(KeystoreError::MissingKey(_)) => match key_file {
            Some(path) if path.exists() => load_signer_file(path),
            _ => Err(KeystoreError::MissingKey(var.to_string())),
        },
        other => other,
    }
}

/// Load the key at `path`, or generate one and save it there.
pub fn load_or_generate_signer(path: &Path) -> Result<PrivateKeySigner> {
    if path.exists() {
        load_signer_file(path)
    } else {
        let signer = PrivateKeySigner::random();
        save_signer(path, &signer)?;
        info!("Generated new key {} at {}", signer.address(), path.display());
        Ok(signer)
    }
}

/// Save the hex secret to `path`, creating parent directories as needed.
/// On unix the file is readable by the owner only.
pub fn save_signer(path: &Path, signer: &PrivateKeySigner) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|e| KeystoreError::CreateDirError(e.to_string()))?;
        }
    }
    let encoded = format!("0x{}\n", hex::encode(signer.to_bytes()));
    fs::write(path, encoded).map_err(|e| KeystoreError::WriteError(e.to_string()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))
            .map_err(|e| KeystoreError::WriteError(e.to_string()))?;
    }
    Ok(())
}

/// Default config directory.
///
/// - Linux: `$XDG_CONFIG_HOME/chopshop` or `~/.config/chopshop`
/// - macOS: `~/Library/Application Support/ChopShop`
/// - elsewhere: `~/.chopshop`
pub fn default_config_dir() -> PathBuf {
    #[cfg(target_os = "macos")]
    {
        home_dir().join("Library").join("Application Support").join("ChopShop")
    }
    #[cfg(target_os = "linux")]
    {
        let xdg = std::env::var("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| home_dir().join(".config"));
        xdg.join(SERVICE)
    }
    #[cfg(not(any(target_os = "macos", target_os = "linux")))]
    {
        home_dir().join(format!(".{}", SERVICE))
    }
}

pub fn default_keystore_dir() -> PathBuf {
    default_config_dir().join("keys")
}

/// Expand a leading `~/` to the home directory.
pub fn expand_path(path: &str) -> PathBuf {
    match path.strip_prefix("~/") {
        Some(rest) => home_dir().join(rest),
        None if path == "~" => home_dir(),
        None => PathBuf::from(path),
    }
}

fn home_dir() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::address;

    const HARDHAT_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

    fn temp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("chopshop-keystore-{}-{}", name, std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        dir
    }

    #[test]
    fn test_parse_private_key() {
        let expected = address!("f39Fd6e51aad88F6F4ce6aB8827279cffFb92266");
        assert_eq!(parse_private_key(HARDHAT_KEY).unwrap().address(), expected);
        assert_eq!(parse_private_key(&HARDHAT_KEY[2..]).unwrap().address(), expected);
        assert_eq!(
            parse_private_key(&format!("  {}\n", HARDHAT_KEY)).unwrap().address(),
            expected
        );
    }

    #[test]
    fn test_invalid_key_format() {
        assert!(matches!(parse_private_key("0x1234"), Err(KeystoreError::InvalidFormat)));
        assert!(matches!(parse_private_key("not hex"), Err(KeystoreError::InvalidFormat)));
        assert!(matches!(
            parse_private_key(&format!("0x{}", "00".repeat(32))),
            Err(KeystoreError::InvalidFormat)
        ));
    }

    #[test]
    fn test_env_key() {
        let var = "CHOPS_TEST_KEY_ENV_LOAD";
        std::env::set_var(var, HARDHAT_KEY);
        assert!(load_signer_from_env(var).is_ok());
        std::env::remove_var(var);
        assert!(matches!(load_signer_from_env(var), Err(KeystoreError::MissingKey(_))));
    }

    #[test]
    fn test_missing_key_is_configuration_error() {
        let err: ChopsError = load_signer("CHOPS_TEST_KEY_UNSET", None).unwrap_err().into();
        assert!(matches!(err, ChopsError::Configuration(_)));
    }

    #[test]
    fn test_generate_and_load_signer() {
        let dir = temp_dir("generate");
        let path = dir.join("keys").join("admin.key");

        let first = load_or_generate_signer(&path).unwrap();
        let second = load_or_generate_signer(&path).unwrap();
        assert_eq!(first.address(), second.address());

        let contents = fs::read_to_string(&path).unwrap();
        assert!(contents.starts_with("0x"));

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_file_fallback() {
        let dir = temp_dir("fallback");
        let path = dir.join("signer.key");
        let signer = parse_private_key(HARDHAT_KEY).unwrap();
        save_signer(&path, &signer).unwrap();

        let loaded = load_signer("CHOPS_TEST_KEY_FALLBACK_UNSET", Some(&path)).unwrap();
        assert_eq!(loaded.address(), signer.address());

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_expand_path() {
        assert_eq!(expand_path("/etc/chopshop"), PathBuf::from("/etc/chopshop"));
        assert!(expand_path("~/keys").ends_with("keys"));
        assert!(!expand_path("~/keys").starts_with("~"));
    }
}
