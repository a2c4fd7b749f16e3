//! Claim service: vouchers in and out, plus reward lookup.

use std::str::FromStr;

use alloy_primitives::{Address, Bytes, B256, U256};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use chopshop_aggregator::ArtifactStore;
use chopshop_core::{ChopsError, ClaimVoucher, Result};
use chopshop_crypto::{NonceSource, VoucherDomain, VoucherError, VoucherSigner};
use chopshop_settings::SignerSettings;
use chopshop_settlement::{LedgerError, LedgerReader, StarClaimer};

use crate::IpcHandler;

/// Chain binding for vouchers signed under `settings`.
pub fn voucher_domain(settings: &SignerSettings) -> VoucherDomain {
    VoucherDomain {
        chain_id: settings.chain_id,
        verifying_contract: settings.verifying_contract,
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoucherRequest {
    #[serde(default)]
    pub claimant_address: String,
    #[serde(default)]
    pub stars_earned: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoucherResponse {
    pub signature: Bytes,
    #[serde(with = "chopshop_core::u256_dec")]
    pub nonce: U256,
    pub deadline: u64,
    #[serde(with = "chopshop_core::u256_dec")]
    pub amount: U256,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RewardLookupRequest {
    pub address: Address,
    pub epoch: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RewardLookupResponse {
    pub address: Address,
    pub epoch: u64,
    #[serde(with = "chopshop_core::u256_dec")]
    pub reward_amount: U256,
    pub rank: u32,
    /// Percent of the field at or below this rank, in (0, 100]
    pub percentile: f64,
    /// `percentile` in basis points, exact
    pub percentile_bps: u32,
    pub proof: Vec<B256>,
    /// Whether the allocation has already been redeemed on-chain
    pub claimed: bool,
}

/// Result of submitting a voucher to the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RedeemResponse {
    pub tx_hash: B256,
    /// Epoch live when the balance was read
    pub epoch: u64,
    #[serde(with = "chopshop_core::u256_dec")]
    pub stars_balance: U256,
}

/// Backs the voucher-issuance and reward-lookup endpoints.
///
/// Signing needs no lock: the key is read-only after load and the nonce
/// source is the only shared mutable state.
pub struct ClaimService<R, S> {
    signer: VoucherSigner,
    nonces: NonceSource,
    max_stars_per_claim: Option<u64>,
    ledger: R,
    store: S,
}

impl<R: LedgerReader, S: ArtifactStore> ClaimService<R, S> {
    pub fn new(signer: VoucherSigner, ledger: R, store: S) -> Self {
        info!("Claim service signing as {}", signer.address());
        Self {
            signer,
            nonces: NonceSource::new(),
            max_stars_per_claim: None,
            ledger,
            store,
        }
    }

    pub fn with_max_stars_per_claim(mut self, max: Option<u64>) -> Self {
        self.max_stars_per_claim = max;
        self
    }

    pub fn signer_address(&self) -> Address {
        self.signer.address()
    }

    /// Sign a voucher for `stars_earned` stars to `claimant_address`.
    pub fn issue_voucher(&self, request: &VoucherRequest) -> Result<VoucherResponse> {
        let raw = request.claimant_address.trim();
        if raw.is_empty() {
            return Err(ChopsError::Validation("claimantAddress is required".to_string()));
        }
        let claimant = Address::from_str(raw)
            .map_err(|e| ChopsError::Validation(format!("claimantAddress {:?}: {}", raw, e)))?;
        if claimant == Address::ZERO {
            return Err(ChopsError::Validation("claimantAddress is the zero address".to_string()));
        }
        if request.stars_earned == 0 {
            return Err(ChopsError::Validation("starsEarned must be positive".to_string()));
        }
        if let Some(max) = self.max_stars_per_claim {
            if request.stars_earned > max {
                return Err(ChopsError::Validation(format!(
                    "starsEarned {} exceeds the per-claim limit of {}",
                    request.stars_earned, max
                )));
            }
        }

        let nonce = self.nonces.next_nonce();
        let voucher = self
            .signer
            .sign(claimant, U256::from(request.stars_earned), nonce)
            .map_err(|e| match e {
                VoucherError::ZeroAmount => ChopsError::Validation(e.to_string()),
                other => ChopsError::Configuration(other.to_string()),
            })?;

        debug!("Issued voucher to {} for {} stars", claimant, request.stars_earned);
        Ok(VoucherResponse {
            signature: voucher.signature,
            nonce: voucher.nonce,
            deadline: voucher.deadline,
            amount: voucher.amount,
        })
    }

    /// Allocation and proof for `address` in a published epoch.
    pub async fn lookup_reward(&self, request: &RewardLookupRequest) -> Result<RewardLookupResponse> {
        if request.epoch == 0 {
            return Err(ChopsError::Validation("epoch must be >= 1".to_string()));
        }
        let distribution = self
            .store
            .load(request.epoch)
            .await?
            .ok_or_else(|| ChopsError::NotFound(format!("no distribution for epoch {}", request.epoch)))?;
        let entry = distribution.allocation_for(&request.address).ok_or_else(|| {
            ChopsError::NotFound(format!(
                "no allocation for {} in epoch {}",
                request.address, request.epoch
            ))
        })?;
        let claimed = self
            .ledger
            .chops_claimed(request.epoch, request.address)
            .await
            .map_err(|e| ChopsError::LedgerRead(e.to_string()))?;

        Ok(RewardLookupResponse {
            address: entry.allocation.address,
            epoch: request.epoch,
            reward_amount: entry.allocation.reward_amount,
            rank: entry.allocation.rank,
            percentile: f64::from(entry.allocation.percentile_bps) / 100.0,
            percentile_bps: entry.allocation.percentile_bps,
            proof: entry.proof.clone(),
            claimed,
        })
    }
}

impl<R: LedgerReader + StarClaimer, S: ArtifactStore> ClaimService<R, S> {
    /// Redeem a signed voucher on the ledger as its claimant.
    ///
    /// The ledger does every check (signer, deadline, nonce); a rejection
    /// comes back as a validation error.
    pub async fn redeem_voucher(&self, voucher: &ClaimVoucher) -> Result<RedeemResponse> {
        let tx_hash = self
            .ledger
            .submit_star_claim(voucher)
            .await
            .map_err(|e| match e {
                LedgerError::NonceUsed | LedgerError::VoucherRejected(_) => {
                    ChopsError::Validation(e.to_string())
                }
                other => ChopsError::LedgerWrite(other.to_string()),
            })?;
        let epoch = self
            .ledger
            .current_epoch()
            .await
            .map_err(|e| ChopsError::LedgerRead(e.to_string()))?;
        let stars_balance = self
            .ledger
            .stars_balance(voucher.claimant, epoch)
            .await
            .map_err(|e| ChopsError::LedgerRead(e.to_string()))?;

        info!(
            "Redeemed voucher for {} ({} stars) in tx {}",
            voucher.claimant, voucher.amount, tx_hash
        );
        Ok(RedeemResponse {
            tx_hash,
            epoch,
            stars_balance,
        })
    }
}

fn parse_params<T: serde::de::DeserializeOwned>(
    params: Option<serde_json::Value>,
) -> std::result::Result<T, String> {
    let params = params.ok_or_else(|| "Invalid params: missing".to_string())?;
    serde_json::from_value(params).map_err(|e| format!("Invalid params: {}", e))
}

#[async_trait]
impl<R, S> IpcHandler for ClaimService<R, S>
where
    R: LedgerReader + StarClaimer,
    S: ArtifactStore,
{
    async fn handle(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> std::result::Result<serde_json::Value, String> {
        match method {
            "issue_voucher" => {
                let request: VoucherRequest = parse_params(params)?;
                let response = self.issue_voucher(&request).map_err(|e| e.to_string())?;
                serde_json::to_value(response).map_err(|e| e.to_string())
            }
            "redeem_voucher" => {
                let voucher: ClaimVoucher = parse_params(params)?;
                let response = self.redeem_voucher(&voucher).await.map_err(|e| e.to_string())?;
                serde_json::to_value(response).map_err(|e| e.to_string())
            }
            "lookup_reward" => {
                let request: RewardLookupRequest = parse_params(params)?;
                let response = self.lookup_reward(&request).await.map_err(|e| e.to_string())?;
                serde_json::to_value(response).map_err(|e| e.to_string())
            }
            "signer_address" => Ok(serde_json::json!({ "address": self.signer_address() })),
            _ => Err(format!("Method not found: {}", method)),
        }
    }
}
