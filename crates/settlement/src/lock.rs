//! Single-writer lock on a ledger snapshot.
//!
//! The daemon and the CLI both load the snapshot, mutate it in memory and
//! write it back. Whoever holds `<snapshot>.lock` is the only writer; the
//! file is created exclusively and removed on drop.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::{LedgerError, Result};

/// Held for as long as the process may write the snapshot.
#[derive(Debug)]
pub struct StateLock {
    path: PathBuf,
}

impl StateLock {
    /// Take the lock beside `state_path`, failing if another process holds it.
    pub fn acquire(state_path: &Path) -> Result<Self> {
        let path = lock_path(state_path);
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| {
                    LedgerError::TransactionFailed(format!("create {}: {}", parent.display(), e))
                })?;
            }
        }

        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                let holder = fs::read_to_string(&path).unwrap_or_default();
                return Err(LedgerError::StateLocked(format!(
                    "{} is held by pid {}; remove it if that process is gone",
                    path.display(),
                    holder.trim()
                )));
            }
            Err(e) => {
                return Err(LedgerError::TransactionFailed(format!(
                    "create {}: {}",
                    path.display(),
                    e
                )))
            }
        };
        writeln!(file, "{}", std::process::id())
            .map_err(|e| LedgerError::TransactionFailed(format!("write {}: {}", path.display(), e)))?;

        debug!("Acquired ledger state lock {}", path.display());
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for StateLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

fn lock_path(state_path: &Path) -> PathBuf {
    state_path.with_extension("lock")
}
