//! Ledger read/write traits.

use std::sync::Arc;

use alloy_primitives::{Address, B256, U256};
use async_trait::async_trait;

use chopshop_core::{ClaimVoucher, EpochWindow, StarsClaimedEvent};

use crate::Result;

/// Transaction hash of a confirmed ledger write.
pub type TxHash = B256;

/// Read-only view of the ledger.
#[async_trait]
pub trait LedgerReader: Send + Sync {
    /// Timestamp of the latest block.
    async fn chain_time(&self) -> Result<u64>;

    async fn epoch_window(&self) -> Result<EpochWindow>;

    async fn current_epoch(&self) -> Result<u64> {
        Ok(self.epoch_window().await?.current_epoch)
    }

    /// Authoritative star balance of `player` for `epoch`.
    async fn stars_balance(&self, player: Address, epoch: u64) -> Result<U256>;

    /// Full `StarsClaimed` log, oldest first.
    async fn star_claim_events(&self) -> Result<Vec<StarsClaimedEvent>>;

    async fn chops_claimed(&self, epoch: u64, player: Address) -> Result<bool>;

    /// Committed distribution root; zero if unset.
    async fn epoch_root(&self, epoch: u64) -> Result<B256>;
}

/// Privileged ledger writes. Each call returns only after confirmation.
#[async_trait]
pub trait LedgerWriter: Send + Sync {
    /// Advance the epoch counter. Time-gated on the ledger side.
    async fn reset_epoch(&self) -> Result<TxHash>;

    /// Commit the distribution root for a closed epoch. Role-gated.
    async fn set_epoch_root(&self, epoch: u64, root: B256) -> Result<TxHash>;
}

/// Player-side write: redeem a voucher, submitted as its claimant.
#[async_trait]
pub trait StarClaimer: Send + Sync {
    async fn submit_star_claim(&self, voucher: &ClaimVoucher) -> Result<TxHash>;
}

#[async_trait]
impl<T: LedgerReader + ?Sized> LedgerReader for Arc<T> {
    async fn chain_time(&self) -> Result<u64> {
        (**self).chain_time().await
    }

    async fn epoch_window(&self) -> Result<EpochWindow> {
        (**self).epoch_window().await
    }

    async fn stars_balance(&self, player: Address, epoch: u64) -> Result<U256> {
        (**self).stars_balance(player, epoch).await
    }

    async fn star_claim_events(&self) -> Result<Vec<StarsClaimedEvent>> {
        (**self).star_claim_events().await
    }

    async fn chops_claimed(&self, epoch: u64, player: Address) -> Result<bool> {
        (**self).chops_claimed(epoch, player).await
    }

    async fn epoch_root(&self, epoch: u64) -> Result<B256> {
        (**self).epoch_root(epoch).await
    }
}

#[async_trait]
impl<T: LedgerWriter + ?Sized> LedgerWriter for Arc<T> {
    async fn reset_epoch(&self) -> Result<TxHash> {
        (**self).reset_epoch().await
    }

    async fn set_epoch_root(&self, epoch: u64, root: B256) -> Result<TxHash> {
        (**self).set_epoch_root(epoch, root).await
    }
}

#[async_trait]
impl<T: StarClaimer + ?Sized> StarClaimer for Arc<T> {
    async fn submit_star_claim(&self, voucher: &ClaimVoucher) -> Result<TxHash> {
        (**self).submit_star_claim(voucher).await
    }
}
