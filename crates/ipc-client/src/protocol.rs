//! JSON-RPC 2.0 protocol types

use serde::{Deserialize, Serialize};

/// JSON-RPC 2.0 request
#[derive(Debug, Clone, Serialize)]
pub struct RpcRequest {
    pub jsonrpc: &'static str,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
    pub id: u64,
}

impl RpcRequest {
    pub fn new(method: impl Into<String>, params: Option<serde_json::Value>, id: u64) -> Self {
        Self {
            jsonrpc: "2.0",
            method: method.into(),
            params,
            id,
        }
    }
}

/// JSON-RPC 2.0 response
#[derive(Debug, Clone, Deserialize)]
pub struct RpcResponse {
    pub jsonrpc: String,
    pub result: Option<serde_json::Value>,
    pub error: Option<RpcError>,
    pub id: serde_json::Value,
}

/// JSON-RPC 2.0 error
#[derive(Debug, Clone, Deserialize)]
pub struct RpcError {
    pub code: i32,
    pub message: String,
    pub data: Option<serde_json::Value>,
}

/// Parameters for `issue_voucher`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoucherParams {
    pub claimant_address: String,
    pub stars_earned: u64,
}

/// Result of `issue_voucher`. Amounts and nonces are decimal strings.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoucherResult {
    pub signature: String,
    pub nonce: String,
    pub deadline: u64,
    pub amount: String,
}

/// A voucher as `redeem_voucher` takes it, and as `chopshop sign` prints it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RedeemParams {
    pub claimant: String,
    pub amount: String,
    pub nonce: String,
    pub deadline: u64,
    pub signature: String,
}

impl RedeemParams {
    /// Pair an issued voucher with the claimant it was issued to.
    pub fn from_issued(claimant: &str, voucher: &VoucherResult) -> Self {
        Self {
            claimant: claimant.to_string(),
            amount: voucher.amount.clone(),
            nonce: voucher.nonce.clone(),
            deadline: voucher.deadline,
            signature: voucher.signature.clone(),
        }
    }
}

/// Result of `redeem_voucher`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RedeemResult {
    pub tx_hash: String,
    pub epoch: u64,
    pub stars_balance: String,
}

/// Parameters for `lookup_reward`
#[derive(Debug, Clone, Serialize)]
pub struct RewardParams {
    pub address: String,
    pub epoch: u64,
}

/// Result of `lookup_reward`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RewardResult {
    pub address: String,
    pub epoch: u64,
    pub reward_amount: String,
    pub rank: u32,
    /// Percent, in (0, 100]
    #[serde(default)]
    pub percentile: f64,
    pub percentile_bps: u32,
    pub proof: Vec<String>,
    pub claimed: bool,
}

/// Result of `signer_address`
#[derive(Debug, Clone, Deserialize)]
pub struct SignerResult {
    pub address: String,
}

/// A rollover result streamed by the daemon after each scheduled cycle.
#[derive(Debug, Clone, Deserialize)]
pub struct RolloverEvent {
    pub result: String,
    #[serde(default)]
    pub epoch: Option<u64>,
    #[serde(default)]
    pub merkle_root: Option<String>,
    #[serde(default)]
    pub tx_hash: Option<String>,
}
