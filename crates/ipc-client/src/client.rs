//! IPC Client implementation

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tracing::debug;

use crate::protocol::{
    RedeemParams, RedeemResult, RewardParams, RewardResult, RolloverEvent, RpcRequest, RpcResponse,
    SignerResult, VoucherParams, VoucherResult,
};
use crate::{IpcError, Result};

/// IPC client for the ChopShop daemon
pub struct IpcClient {
    socket_path: PathBuf,
    request_id: AtomicU64,
}

impl IpcClient {
    /// Each request opens its own connection.
    pub fn new(socket_path: PathBuf) -> Self {
        Self {
            socket_path,
            request_id: AtomicU64::new(1),
        }
    }

    /// Connect and verify the daemon answers.
    pub async fn connect(socket_path: &Path) -> Result<Self> {
        let client = Self::new(socket_path.to_path_buf());
        client.signer_address().await?;
        Ok(client)
    }

    fn next_id(&self) -> u64 {
        self.request_id.fetch_add(1, Ordering::Relaxed)
    }

    async fn open(&self) -> Result<UnixStream> {
        UnixStream::connect(&self.socket_path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound
                || e.kind() == std::io::ErrorKind::ConnectionRefused
            {
                IpcError::DaemonNotRunning
            } else {
                IpcError::ConnectionFailed(e.to_string())
            }
        })
    }

    /// Send a raw JSON-RPC request
    pub async fn send_request(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<serde_json::Value> {
        let stream = self.open().await?;
        let (reader, mut writer) = stream.into_split();

        let request = RpcRequest::new(method, params, self.next_id());
        let request_json = serde_json::to_string(&request)?;
        debug!("Sending request: {}", request_json);

        writer.write_all(request_json.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;

        // Broadcast events can interleave with the response; skip lines
        // until one carries our id.
        let mut reader = BufReader::new(reader);
        let mut line = String::new();
        loop {
            line.clear();
            if reader.read_line(&mut line).await? == 0 {
                return Err(IpcError::InvalidResponse("connection closed".to_string()));
            }
            debug!("Received: {}", line.trim());
            let value: serde_json::Value = serde_json::from_str(&line)
                .map_err(|e| IpcError::InvalidResponse(e.to_string()))?;
            if value.get("jsonrpc").is_none() || value["id"] != request.id {
                continue;
            }
            let response: RpcResponse = serde_json::from_value(value)
                .map_err(|e| IpcError::InvalidResponse(e.to_string()))?;
            if let Some(error) = response.error {
                return Err(IpcError::DaemonError {
                    code: error.code,
                    message: error.message,
                });
            }
            return Ok(response.result.unwrap_or(serde_json::Value::Null));
        }
    }

    /// Request a signed voucher for `stars_earned` stars.
    pub async fn issue_voucher(&self, claimant: &str, stars_earned: u64) -> Result<VoucherResult> {
        let params = VoucherParams {
            claimant_address: claimant.to_string(),
            stars_earned,
        };
        let result = self
            .send_request("issue_voucher", Some(serde_json::to_value(params)?))
            .await?;
        serde_json::from_value(result).map_err(|e| IpcError::InvalidResponse(e.to_string()))
    }

    /// Have the daemon submit a signed voucher to the ledger.
    pub async fn redeem_voucher(&self, voucher: &RedeemParams) -> Result<RedeemResult> {
        let result = self
            .send_request("redeem_voucher", Some(serde_json::to_value(voucher)?))
            .await?;
        serde_json::from_value(result).map_err(|e| IpcError::InvalidResponse(e.to_string()))
    }

    /// Allocation and proof for `address` in `epoch`.
    pub async fn lookup_reward(&self, address: &str, epoch: u64) -> Result<RewardResult> {
        let params = RewardParams {
            address: address.to_string(),
            epoch,
        };
        let result = self
            .send_request("lookup_reward", Some(serde_json::to_value(params)?))
            .await?;
        serde_json::from_value(result).map_err(|e| IpcError::InvalidResponse(e.to_string()))
    }

    pub async fn signer_address(&self) -> Result<SignerResult> {
        let result = self.send_request("signer_address", None).await?;
        serde_json::from_value(result).map_err(|e| IpcError::InvalidResponse(e.to_string()))
    }

    /// Read streamed rollover results until `limit` arrive or the daemon
    /// closes the connection.
    pub async fn watch_rollovers<F>(&self, limit: Option<usize>, mut on_event: F) -> Result<usize>
    where
        F: FnMut(RolloverEvent),
    {
        let stream = self.open().await?;
        let mut lines = BufReader::new(stream).lines();
        let mut seen = 0usize;
        while let Some(line) = lines.next_line().await? {
            match serde_json::from_str::<RolloverEvent>(&line) {
                Ok(event) => {
                    on_event(event);
                    seen += 1;
                    if limit.is_some_and(|limit| seen >= limit) {
                        break;
                    }
                }
                Err(e) => debug!("Ignoring non-event line: {}", e),
            }
        }
        Ok(seen)
    }
}
