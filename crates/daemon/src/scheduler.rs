//! Fixed-interval rollover loop.

use std::future::Future;
use std::time::Duration;

use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info, warn};

use chopshop_aggregator::ArtifactStore;
use chopshop_core::Result;
use chopshop_settlement::{LedgerReader, LedgerWriter};

use crate::{EpochCoordinator, RolloverResult};

/// Run a cycle every `period` until `shutdown` resolves. Returns the number
/// of cycles run.
///
/// Cycles never overlap: a tick that lands while a cycle is running is
/// skipped. Failures are logged and the next tick retries.
pub async fn run_scheduled<R, W, S, F>(
    coordinator: &EpochCoordinator<R, W, S>,
    period: Duration,
    shutdown: impl Future<Output = ()>,
    mut on_cycle: F,
) -> u64
where
    R: LedgerReader + Clone,
    W: LedgerWriter,
    S: ArtifactStore,
    F: FnMut(&Result<RolloverResult>),
{
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    tokio::pin!(shutdown);

    info!("Rollover scheduler started, interval {:?}", period);
    let mut cycles = 0u64;
    loop {
        tokio::select! {
            biased;
            _ = &mut shutdown => break,
            _ = ticker.tick() => {
                let outcome = coordinator.run_epoch_cycle().await;
                cycles += 1;
                match &outcome {
                    Ok(result) => info!("Rollover cycle {}: {}", cycles, result),
                    Err(e) if e.is_retryable() => {
                        warn!("Rollover cycle {} failed, retrying next tick: {}", cycles, e)
                    }
                    Err(e) => error!("Rollover cycle {} failed: {}", cycles, e),
                }
                on_cycle(&outcome);
            }
        }
    }
    info!("Rollover scheduler stopped after {} cycles", cycles);
    cycles
}
