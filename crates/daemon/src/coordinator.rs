//! Epoch Rollover Coordinator.
//!
//! One cycle:
//!
//! ```text
//! CHECK_WINDOW -> (elapsed? RESET_EPOCH) -> TARGET = current - 1
//!   -> artifact exists? (root set? ALREADY_GENERATED : PUBLISH_ROOT)
//!   -> root set? ALREADY_GENERATED
//!   -> COLLECT -> CALCULATE -> BUILD_TREE -> STORE_ARTIFACT -> PUBLISH_ROOT
//! ```
//!
//! Cycles must not overlap. Duplicate guards are the artifact existence
//! check, the on-chain root reads before storing and before publishing, and
//! the write-once artifact store. A published artifact is never replaced.

use std::fmt;
use std::path::PathBuf;
use std::sync::Mutex;

use alloy_primitives::B256;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use chopshop_aggregator::{
    distribution_from_players, verify_distribution, ArtifactStore, EpochPlayerCollector, HistoryEntry,
    HistoryLog, RewardConfig, DEFAULT_COLLECTOR_CONCURRENCY,
};
use chopshop_core::{ChopsError, Result};
use chopshop_settings::Settings;
use chopshop_settlement::{LedgerError, LedgerReader, LedgerWriter};

/// Outcome of one [`EpochCoordinator::run_epoch_cycle`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum RolloverResult {
    /// The ledger is still in its first epoch
    NoClosedEpoch,
    /// The closed epoch had no players; nothing stored, nothing published
    NoPlayers { epoch: u64 },
    /// Artifact and on-chain root already exist
    AlreadyGenerated { epoch: u64 },
    /// Root confirmed on-chain. `recovered` is set when an earlier cycle had
    /// stored the artifact but not published it.
    Published {
        epoch: u64,
        merkle_root: B256,
        total_players: usize,
        tx_hash: B256,
        recovered: bool,
    },
}

impl fmt::Display for RolloverResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoClosedEpoch => write!(f, "no closed epoch"),
            Self::NoPlayers { epoch } => write!(f, "epoch {}: no players", epoch),
            Self::AlreadyGenerated { epoch } => write!(f, "epoch {}: already generated", epoch),
            Self::Published {
                epoch,
                merkle_root,
                total_players,
                recovered,
                ..
            } => write!(
                f,
                "epoch {}: published root {} for {} players{}",
                epoch,
                merkle_root,
                total_players,
                if *recovered { " (recovered)" } else { "" }
            ),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub rewards: RewardConfig,
    pub collector_concurrency: usize,
    /// JSONL history file; `None` keeps history in memory only
    pub history_path: Option<PathBuf>,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            rewards: RewardConfig::default(),
            collector_concurrency: DEFAULT_COLLECTOR_CONCURRENCY,
            history_path: None,
        }
    }
}

impl CoordinatorConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            rewards: RewardConfig {
                total_emission: settings.rewards.total_emission,
                curve_exponent: settings.rewards.curve_exponent,
                token_decimals: settings.rewards.token_decimals,
            },
            collector_concurrency: settings.coordinator.collector_concurrency.max(1),
            history_path: Some(settings.coordinator.history_path.clone()),
        }
    }
}

fn read_error(e: LedgerError) -> ChopsError {
    ChopsError::LedgerRead(e.to_string())
}

pub struct EpochCoordinator<R, W, S> {
    reader: R,
    writer: W,
    store: S,
    config: CoordinatorConfig,
    history: Mutex<HistoryLog>,
}

impl<R, W, S> EpochCoordinator<R, W, S>
where
    R: LedgerReader + Clone,
    W: LedgerWriter,
    S: ArtifactStore,
{
    /// `writer` must hold the root-setter role.
    pub fn new(reader: R, writer: W, store: S, config: CoordinatorConfig) -> Self {
        let history = match &config.history_path {
            Some(path) => HistoryLog::load(path),
            None => HistoryLog::new(),
        };
        Self {
            reader,
            writer,
            store,
            config,
            history: Mutex::new(history),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn history(&self) -> Vec<HistoryEntry> {
        self.history.lock().expect("history lock poisoned").entries().to_vec()
    }

    /// Run one full rollover cycle.
    pub async fn run_epoch_cycle(&self) -> Result<RolloverResult> {
        // CHECK_WINDOW
        let mut window = self.reader.epoch_window().await.map_err(read_error)?;
        let now = self.reader.chain_time().await.map_err(read_error)?;
        if window.is_elapsed(now) {
            info!(
                "Epoch {} closed at {} (now {}), resetting",
                window.current_epoch,
                window.next_reset_at(),
                now
            );
            let tx = self
                .writer
                .reset_epoch()
                .await
                .map_err(|e| ChopsError::LedgerWrite(format!("reset epoch: {}", e)))?;
            window = self.reader.epoch_window().await.map_err(read_error)?;
            info!("Epoch reset confirmed in {}: now epoch {}", tx, window.current_epoch);
        } else {
            debug!(
                "Epoch {} still live until {}",
                window.current_epoch,
                window.next_reset_at()
            );
        }

        // DETERMINE_TARGET_EPOCH
        let Some(epoch) = window.closed_epoch() else {
            debug!("No closed epoch yet");
            return Ok(RolloverResult::NoClosedEpoch);
        };

        // CHECK_EXISTING_OUTPUT
        let exists = match self.store.exists(epoch).await {
            Ok(exists) => exists,
            Err(e) => {
                warn!(
                    "Artifact lookup for epoch {} failed, treating as absent: {}",
                    epoch, e
                );
                false
            }
        };
        if exists {
            return self.resume_existing(epoch).await;
        }

        // A published root pins the artifact it was built from.
        let onchain = self.reader.epoch_root(epoch).await.map_err(read_error)?;
        if onchain != B256::ZERO {
            warn!(
                "Epoch {} root {} is on-chain but no artifact was found; not regenerating",
                epoch, onchain
            );
            return Ok(RolloverResult::AlreadyGenerated { epoch });
        }

        // COLLECT
        let players = EpochPlayerCollector::new(self.reader.clone())
            .with_concurrency(self.config.collector_concurrency)
            .collect(epoch)
            .await?;
        if players.is_empty() {
            info!("Epoch {} has no players; nothing to publish", epoch);
            return Ok(RolloverResult::NoPlayers { epoch });
        }

        // CALCULATE + BUILD_TREE
        let distribution = distribution_from_players(epoch, &players, &self.config.rewards)?;

        // PUBLISH_ARTIFACT
        let bytes = self.store.save(&distribution).await?;
        self.record(|history| history.record_distribution_built(&distribution, &bytes));
        info!(
            "Stored artifact for epoch {} ({} players, root {})",
            epoch, distribution.total_players, distribution.merkle_root
        );

        // PUBLISH_ROOT_ONCHAIN
        self.publish_root(epoch, distribution.merkle_root, distribution.total_players, false)
            .await
    }

    /// An artifact is already stored for `epoch`: finish the publication if
    /// an earlier cycle stopped short of it, without recomputing.
    async fn resume_existing(&self, epoch: u64) -> Result<RolloverResult> {
        let onchain = self.reader.epoch_root(epoch).await.map_err(read_error)?;
        if onchain != B256::ZERO {
            info!("Epoch {} already generated (root {})", epoch, onchain);
            return Ok(RolloverResult::AlreadyGenerated { epoch });
        }

        let distribution = self
            .store
            .load(epoch)
            .await?
            .ok_or_else(|| ChopsError::Storage(format!("artifact for epoch {} disappeared", epoch)))?;
        if distribution.epoch != epoch {
            return Err(ChopsError::ProofMismatch(format!(
                "artifact for epoch {} is labelled epoch {}",
                epoch, distribution.epoch
            )));
        }
        verify_distribution(&distribution)?;
        if distribution.merkle_root == B256::ZERO {
            return Ok(RolloverResult::NoPlayers { epoch });
        }

        warn!(
            "Artifact for epoch {} exists but its root is unpublished; retrying publication",
            epoch
        );
        self.publish_root(epoch, distribution.merkle_root, distribution.total_players, true)
            .await
    }

    async fn publish_root(
        &self,
        epoch: u64,
        root: B256,
        total_players: usize,
        recovered: bool,
    ) -> Result<RolloverResult> {
        let onchain = self.reader.epoch_root(epoch).await.map_err(read_error)?;
        if onchain == root {
            info!("Epoch {} root {} is already on-chain", epoch, root);
            return Ok(RolloverResult::AlreadyGenerated { epoch });
        }
        if onchain != B256::ZERO {
            return Err(ChopsError::LedgerWrite(format!(
                "epoch {} already has root {}, computed {}",
                epoch, onchain, root
            )));
        }

        let tx_hash = self.writer.set_epoch_root(epoch, root).await.map_err(|e| {
            error!(
                "Publishing root for epoch {} failed; artifact retained for retry: {}",
                epoch, e
            );
            ChopsError::LedgerWrite(e.to_string())
        })?;
        self.record(|history| history.record_root_published(epoch, root, tx_hash));
        info!("Published root {} for epoch {} in {}", root, epoch, tx_hash);

        Ok(RolloverResult::Published {
            epoch,
            merkle_root: root,
            total_players,
            tx_hash,
            recovered,
        })
    }

    fn record(&self, append: impl FnOnce(&mut HistoryLog) -> u64) {
        let mut history = self.history.lock().expect("history lock poisoned");
        append(&mut history);
        if let Some(path) = &self.config.history_path {
            if let Err(e) = history.flush(path) {
                warn!("Failed to flush history to {}: {}", path.display(), e);
            }
        }
    }
}
