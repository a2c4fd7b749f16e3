//! Append-only distribution history.
//!
//! Every built distribution and every confirmed root publication gets an
//! entry with a global sequence number. Entries are buffered in memory and
//! appended to a JSONL file on flush.

use std::io::{BufRead, Write};
use std::path::Path;

use alloy_primitives::{B256, U256};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use chopshop_core::EpochDistribution;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Global monotonic sequence number
    pub seq: u64,
    /// Wall clock, unix seconds
    pub recorded_at: u64,
    pub event: HistoryEvent,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum HistoryEvent {
    /// An artifact was built and stored
    DistributionBuilt {
        epoch: u64,
        merkle_root: B256,
        total_players: usize,
        #[serde(with = "chopshop_core::u256_dec")]
        total_allocated: U256,
        /// SHA-256 of the stored artifact bytes, hex
        artifact_sha256: String,
    },
    /// The root was confirmed on the ledger
    RootPublished {
        epoch: u64,
        merkle_root: B256,
        tx_hash: B256,
    },
}

/// Hex SHA-256 of artifact bytes.
pub fn artifact_digest(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

#[derive(Debug, Default)]
pub struct HistoryLog {
    entries: Vec<HistoryEntry>,
    next_seq: u64,
    flushed_count: usize,
}

impl HistoryLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: Vec<HistoryEntry>) -> Self {
        let next_seq = entries.last().map_or(0, |e| e.seq + 1);
        let flushed_count = entries.len();
        Self {
            entries,
            next_seq,
            flushed_count,
        }
    }

    /// Load a JSONL history file. A missing file is an empty log; unparsable
    /// lines are skipped.
    pub fn load(path: &Path) -> Self {
        let file = match std::fs::File::open(path) {
            Ok(f) => f,
            Err(_) => return Self::new(),
        };
        let reader = std::io::BufReader::new(file);
        let mut entries = Vec::new();
        for line in reader.lines().map_while(|r| r.ok()) {
            match serde_json::from_str::<HistoryEntry>(&line) {
                Ok(entry) => entries.push(entry),
                Err(e) => warn!("Skipping bad history line in {}: {}", path.display(), e),
            }
        }
        if !entries.is_empty() {
            info!("Loaded {} history entries from {}", entries.len(), path.display());
        }
        Self::from_entries(entries)
    }

    pub fn append(&mut self, event: HistoryEvent) -> u64 {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        let seq = self.next_seq;
        self.entries.push(HistoryEntry {
            seq,
            recorded_at: now,
            event,
        });
        self.next_seq += 1;
        debug!("Appended history entry seq={}", seq);
        seq
    }

    pub fn record_distribution_built(&mut self, distribution: &EpochDistribution, artifact: &[u8]) -> u64 {
        self.append(HistoryEvent::DistributionBuilt {
            epoch: distribution.epoch,
            merkle_root: distribution.merkle_root,
            total_players: distribution.total_players,
            total_allocated: distribution.total_allocated(),
            artifact_sha256: artifact_digest(artifact),
        })
    }

    pub fn record_root_published(&mut self, epoch: u64, merkle_root: B256, tx_hash: B256) -> u64 {
        self.append(HistoryEvent::RootPublished {
            epoch,
            merkle_root,
            tx_hash,
        })
    }

    /// Next sequence number to be assigned.
    pub fn height(&self) -> u64 {
        self.next_seq
    }

    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }

    /// Entries from `seq` onwards.
    pub fn since(&self, seq: u64) -> &[HistoryEntry] {
        let start = self.entries.partition_point(|e| e.seq < seq);
        &self.entries[start..]
    }

    /// Every history entry for `epoch`, oldest first.
    pub fn for_epoch(&self, epoch: u64) -> Vec<&HistoryEntry> {
        self.entries
            .iter()
            .filter(|e| match &e.event {
                HistoryEvent::DistributionBuilt { epoch: ev, .. } => *ev == epoch,
                HistoryEvent::RootPublished { epoch: ev, .. } => *ev == epoch,
            })
            .collect()
    }

    /// Append unflushed entries to `path`. Returns how many were written.
    pub fn flush(&mut self, path: &Path) -> std::io::Result<usize> {
        let unflushed = &self.entries[self.flushed_count..];
        if unflushed.is_empty() {
            return Ok(0);
        }
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let mut file = std::fs::OpenOptions::new().create(true).append(true).open(path)?;
        let count = unflushed.len();
        for entry in unflushed {
            let json = serde_json::to_string(entry).map_err(std::io::Error::other)?;
            writeln!(file, "{}", json)?;
        }
        self.flushed_count = self.entries.len();
        debug!("Flushed {} history entries to {}", count, path.display());
        Ok(count)
    }
}
