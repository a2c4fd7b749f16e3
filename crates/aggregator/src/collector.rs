//! Epoch Player Collector.
//!
//! The claim log is the only enumeration of who played in an epoch, but a
//! log entry is not a balance. Player discovery comes from `StarsClaimed`
//! events; every balance is then re-read from the ledger's per-epoch
//! storage, which is authoritative.

use std::collections::HashSet;

use alloy_primitives::{Address, U256};
use futures::stream::{self, StreamExt, TryStreamExt};
use tracing::{debug, info};

use chopshop_core::{EpochPlayerRecord, StarsClaimedEvent};
use chopshop_settlement::LedgerReader;

use crate::Result;

/// Balance reads in flight at once.
pub const DEFAULT_COLLECTOR_CONCURRENCY: usize = 8;

/// Distinct claimants for `epoch`, in order of first appearance in the log.
pub fn distinct_players(events: &[StarsClaimedEvent], epoch: u64) -> Vec<Address> {
    let mut seen = HashSet::new();
    events
        .iter()
        .filter(|e| e.epoch == epoch)
        .filter(|e| seen.insert(e.player))
        .map(|e| e.player)
        .collect()
}

pub struct EpochPlayerCollector<L> {
    ledger: L,
    concurrency: usize,
}

impl<L: LedgerReader> EpochPlayerCollector<L> {
    pub fn new(ledger: L) -> Self {
        Self {
            ledger,
            concurrency: DEFAULT_COLLECTOR_CONCURRENCY,
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Every player with a non-zero star balance in `epoch`, in order of
    /// first claim. Any failed read fails the whole collection.
    pub async fn collect(&self, epoch: u64) -> Result<Vec<EpochPlayerRecord>> {
        let events = self.ledger.star_claim_events().await?;
        let players = distinct_players(&events, epoch);
        debug!(
            "Epoch {}: {} claim events, {} distinct players",
            epoch,
            events.len(),
            players.len()
        );

        let ledger = &self.ledger;
        let balances: Vec<(Address, U256)> = stream::iter(players)
            .map(|player| async move {
                let balance = ledger.stars_balance(player, epoch).await?;
                Ok::<_, chopshop_settlement::LedgerError>((player, balance))
            })
            .buffered(self.concurrency)
            .try_collect()
            .await?;

        let records: Vec<EpochPlayerRecord> = balances
            .into_iter()
            .filter(|(_, balance)| !balance.is_zero())
            .map(|(address, balance)| EpochPlayerRecord::new(address, balance))
            .collect();

        info!("Collected {} players for epoch {}", records.len(), epoch);
        Ok(records)
    }
}
