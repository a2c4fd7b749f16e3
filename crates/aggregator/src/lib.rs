//! ChopShop Aggregator
//!
//! Turns a closed epoch's on-chain star balances into a claimable chops
//! distribution:
//!
//! 1. [`EpochPlayerCollector`] reconstructs the epoch's players from the
//!    `StarsClaimed` log and reads each authoritative balance.
//! 2. [`calculate`] ranks them and splits the emission along a
//!    deterministic fixed-point power curve.
//! 3. [`build_distribution`] commits the allocations to a sorted-pairs
//!    Merkle tree and attaches a self-verified proof to every entry.
//!
//! Artifacts are persisted through an [`ArtifactStore`] and every build or
//! publication is appended to a [`HistoryLog`].

mod collector;
mod curve;
mod distribution;
mod history;
mod store;

pub use collector::{distinct_players, EpochPlayerCollector, DEFAULT_COLLECTOR_CONCURRENCY};
pub use curve::{calculate, rank_weight};
pub use distribution::{
    build_distribution, distribution_from_players, verify_distribution, RewardConfig,
};
pub use history::{artifact_digest, HistoryEntry, HistoryEvent, HistoryLog};
pub use store::{ArtifactStore, FsArtifactStore, MemoryArtifactStore, StoreError, StoreResult};

use chopshop_core::ChopsError;
use chopshop_settlement::LedgerError;

/// Aggregator errors
#[derive(Debug, thiserror::Error)]
pub enum AggregatorError {
    #[error("Ledger read failed: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Arithmetic overflow: {0}")]
    Overflow(String),

    #[error("Proof mismatch: {0}")]
    ProofMismatch(String),
}

pub type Result<T> = std::result::Result<T, AggregatorError>;

impl From<AggregatorError> for ChopsError {
    fn from(e: AggregatorError) -> Self {
        match e {
            AggregatorError::Ledger(e) => ChopsError::LedgerRead(e.to_string()),
            AggregatorError::InvalidInput(msg) => ChopsError::Validation(msg),
            AggregatorError::Overflow(msg) => ChopsError::Validation(msg),
            AggregatorError::ProofMismatch(msg) => ChopsError::ProofMismatch(msg),
        }
    }
}
