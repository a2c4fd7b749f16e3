//! ChopShop Daemon
//!
//! Long-running side of the reward pipeline:
//!
//! - Epoch rollover on a fixed interval
//! - Voucher issuance and redemption over a JSON-RPC unix socket
//! - Reward lookup over the same socket
//! - Rollover results streamed to connected clients

mod coordinator;
mod ipc;
mod scheduler;
mod service;

pub use coordinator::{CoordinatorConfig, EpochCoordinator, RolloverResult};
pub use ipc::{dispatch, IpcConfig, IpcHandler, IpcServer, JsonRpcError, JsonRpcRequest, JsonRpcResponse};
pub use scheduler::run_scheduled;
pub use service::{
    voucher_domain, ClaimService, RedeemResponse, RewardLookupRequest, RewardLookupResponse, VoucherRequest,
    VoucherResponse,
};

use thiserror::Error;

use chopshop_core::ChopsError;

#[derive(Error, Debug)]
pub enum DaemonError {
    #[error("IPC error: {0}")]
    IpcError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Startup error: {0}")]
    Startup(#[from] ChopsError),
}

pub type Result<T> = std::result::Result<T, DaemonError>;
