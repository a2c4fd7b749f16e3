//! ChopShop Settlement
//!
//! Ledger surfaces consumed by the reward pipeline.
//!
//! ## Ledger Model
//!
//! 1. **Claim stars**: A player submits a server-signed voucher. The ledger
//!    checks the deadline, the nonce-used set and the signer, then credits the
//!    player's star balance for the live epoch and emits `StarsClaimed`.
//! 2. **Reset epoch**: Anyone may advance the epoch counter once
//!    `last_reset + epoch_duration` has passed.
//! 3. **Set epoch root**: An account holding the root-setter role commits the
//!    Merkle root of a closed epoch's chops distribution. First write wins.
//! 4. **Claim chops**: A player proves `(address, amount)` against the epoch
//!    root and is credited exactly once per epoch.
//!
//! The pipeline talks to the ledger through [`LedgerReader`] and
//! [`LedgerWriter`]; vouchers are redeemed through [`StarClaimer`].
//! [`MockLedger`] enforces the same rules in memory and can be persisted as
//! a JSON snapshot, guarded by a [`StateLock`] so only one process writes it.

mod ledger;
mod lock;
mod mock;

pub use ledger::{LedgerReader, LedgerWriter, StarClaimer, TxHash};
pub use lock::StateLock;
pub use mock::{MockLedger, MockLedgerConfig, MockLedgerState, MockTransaction};

use alloy_primitives::Address;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("RPC error: {0}")]
    RpcError(String),

    #[error("Transaction failed: {0}")]
    TransactionFailed(String),

    #[error("Not authorized: {0}")]
    NotAuthorized(Address),

    #[error("Epoch not elapsed: next reset at {next_reset_at}")]
    EpochNotElapsed { next_reset_at: u64 },

    #[error("Epoch {0} is still live")]
    EpochStillLive(u64),

    #[error("Root already set for epoch {0}")]
    RootAlreadySet(u64),

    #[error("Root not set for epoch {0}")]
    RootNotSet(u64),

    #[error("Invalid root")]
    InvalidRoot,

    #[error("Nonce already used")]
    NonceUsed,

    #[error("Voucher rejected: {0}")]
    VoucherRejected(String),

    #[error("Already claimed")]
    AlreadyClaimed,

    #[error("Invalid proof")]
    InvalidProof,

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Ledger state locked: {0}")]
    StateLocked(String),
}

pub type Result<T> = std::result::Result<T, LedgerError>;
