//! ChopShop IPC Client
//!
//! JSON-RPC client for the `chopshopd` unix socket.

mod client;
mod protocol;

pub use client::IpcClient;
pub use protocol::*;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum IpcError {
    #[error("Daemon is not running")]
    DaemonNotRunning,

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Daemon error {code}: {message}")]
    DaemonError { code: i32, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, IpcError>;
