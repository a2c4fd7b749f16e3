use alloy_primitives::{Address, Bytes, B256, U256};
use serde::{Deserialize, Serialize};

use crate::CurveExponent;

/// Signed, time-bounded, single-use authorization to mint stars on-chain.
///
/// The signature covers exactly `(claimant, amount, nonce, deadline, chain_id,
/// verifying_contract)`; the last two are bound by the signer and not
/// carried here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimVoucher {
    pub claimant: Address,
    #[serde(with = "crate::u256_dec")]
    pub amount: U256,
    #[serde(with = "crate::u256_dec")]
    pub nonce: U256,
    /// Unix seconds; the verifier accepts the voucher while `now <= deadline`
    pub deadline: u64,
    /// 65-byte `r || s || v` secp256k1 signature
    pub signature: Bytes,
}

impl ClaimVoucher {
    /// Whether a verifier whose clock reads `now` would reject this voucher.
    pub fn is_expired(&self, now: u64) -> bool {
        now > self.deadline
    }
}

/// A `StarsClaimed` event from the ledger's claim log.
///
/// `epoch` is not an indexed field on-chain, so filtering by epoch always
/// happens client-side over the full log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StarsClaimedEvent {
    pub player: Address,
    pub epoch: u64,
    #[serde(with = "crate::u256_dec")]
    pub amount: U256,
    #[serde(with = "crate::u256_dec")]
    pub nonce: U256,
}

/// One distinct player with a strictly positive star balance for an epoch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EpochPlayerRecord {
    pub address: Address,
    #[serde(with = "crate::u256_dec")]
    pub stars_in_epoch: U256,
}

impl EpochPlayerRecord {
    pub fn new(address: Address, stars_in_epoch: U256) -> Self {
        Self { address, stars_in_epoch }
    }
}

/// The ledger's epoch window, read to decide whether rollover is due.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EpochWindow {
    pub current_epoch: u64,
    pub last_reset_timestamp: u64,
    pub epoch_duration: u64,
}

impl EpochWindow {
    /// Earliest time at which the ledger accepts a reset.
    pub fn next_reset_at(&self) -> u64 {
        self.last_reset_timestamp.saturating_add(self.epoch_duration)
    }

    pub fn is_elapsed(&self, now: u64) -> bool {
        now >= self.next_reset_at()
    }

    /// The most recently closed epoch, if any.
    pub fn closed_epoch(&self) -> Option<u64> {
        self.current_epoch.checked_sub(1).filter(|e| *e >= 1)
    }
}

/// Rank-weighted token allocation for one player.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RewardAllocation {
    pub address: Address,
    #[serde(with = "crate::u256_dec")]
    pub stars_in_epoch: U256,
    /// 1-based; ties keep input order
    pub rank: u32,
    /// Curve weight relative to the epoch's common scale, with 120 fractional bits
    #[serde(with = "crate::u256_dec")]
    pub weight: U256,
    /// Token base units
    #[serde(with = "crate::u256_dec")]
    pub reward_amount: U256,
    /// `(N - rank + 1) / N` in basis points. Informational only.
    pub percentile_bps: u32,
}

/// An allocation together with its Merkle proof.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationWithProof {
    #[serde(flatten)]
    pub allocation: RewardAllocation,
    pub proof: Vec<B256>,
}

/// The per-epoch distribution artifact.
///
/// The on-chain root is the authoritative commitment; this document is the
/// index used for proof lookup and must regenerate to the same root from the
/// same players and curve configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EpochDistribution {
    pub epoch: u64,
    pub total_players: usize,
    /// Whole tokens; base units are `total_emission * 10^token_decimals`
    pub total_emission: u64,
    pub token_decimals: u8,
    pub curve_exponent: CurveExponent,
    pub merkle_root: B256,
    pub allocations: Vec<AllocationWithProof>,
}

impl EpochDistribution {
    pub fn allocation_for(&self, address: &Address) -> Option<&AllocationWithProof> {
        self.allocations
            .iter()
            .find(|a| a.allocation.address == *address)
    }

    /// Sum of every allocated reward, in base units.
    pub fn total_allocated(&self) -> U256 {
        self.allocations
            .iter()
            .fold(U256::ZERO, |acc, a| acc.saturating_add(a.allocation.reward_amount))
    }

    /// `total_emission * 10^token_decimals`, saturating.
    pub fn emission_base_units(&self) -> U256 {
        emission_base_units(self.total_emission, self.token_decimals)
    }

    /// Pretty JSON, the format persisted to artifact storage.
    pub fn to_json_bytes(&self) -> crate::Result<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    pub fn from_json_bytes(bytes: &[u8]) -> crate::Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Scale a whole-token emission into base units.
pub fn emission_base_units(total_emission: u64, token_decimals: u8) -> U256 {
    U256::from(10u64)
        .checked_pow(U256::from(token_decimals))
        .and_then(|scale| scale.checked_mul(U256::from(total_emission)))
        .unwrap_or(U256::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(b: u8) -> Address {
        Address::repeat_byte(b)
    }

    fn sample_distribution() -> EpochDistribution {
        let alloc = |b: u8, rank: u32, amount: u64| AllocationWithProof {
            allocation: RewardAllocation {
                address: addr(b),
                stars_in_epoch: U256::from(100u64),
                rank,
                weight: U256::from(1u64) << 120usize,
                reward_amount: U256::from(amount),
                percentile_bps: 10_000,
            },
            proof: vec![B256::repeat_byte(0xAB)],
        };
        EpochDistribution {
            epoch: 3,
            total_players: 2,
            total_emission: 10,
            token_decimals: 0,
            curve_exponent: CurveExponent::LINEAR,
            merkle_root: B256::repeat_byte(0x11),
            allocations: vec![alloc(1, 1, 6), alloc(2, 2, 3)],
        }
    }

    #[test]
    fn test_voucher_expiry_boundary() {
        let voucher = ClaimVoucher {
            claimant: addr(1),
            amount: U256::from(5u64),
            nonce: U256::from(1u64),
            deadline: 1_700_000_000,
            signature: Bytes::new(),
        };
        assert!(!voucher.is_expired(1_699_999_999));
        assert!(!voucher.is_expired(1_700_000_000));
        assert!(voucher.is_expired(1_700_000_001));
    }

    #[test]
    fn test_epoch_window() {
        let window = EpochWindow {
            current_epoch: 4,
            last_reset_timestamp: 1000,
            epoch_duration: 600,
        };
        assert_eq!(window.next_reset_at(), 1600);
        assert!(!window.is_elapsed(1599));
        assert!(window.is_elapsed(1600));
        assert_eq!(window.closed_epoch(), Some(3));

        let first = EpochWindow { current_epoch: 1, ..window };
        assert_eq!(first.closed_epoch(), None);
    }

    #[test]
    fn test_window_saturates() {
        let window = EpochWindow {
            current_epoch: 1,
            last_reset_timestamp: u64::MAX - 1,
            epoch_duration: 10,
        };
        assert_eq!(window.next_reset_at(), u64::MAX);
    }

    #[test]
    fn test_distribution_lookup_and_totals() {
        let dist = sample_distribution();
        assert_eq!(dist.allocation_for(&addr(2)).unwrap().allocation.rank, 2);
        assert!(dist.allocation_for(&addr(9)).is_none());
        assert_eq!(dist.total_allocated(), U256::from(9u64));
        assert_eq!(dist.emission_base_units(), U256::from(10u64));
    }

    #[test]
    fn test_distribution_json_field_names() {
        let dist = sample_distribution();
        let value: serde_json::Value = serde_json::from_slice(&dist.to_json_bytes().unwrap()).unwrap();
        assert_eq!(value["epoch"], 3);
        assert_eq!(value["totalPlayers"], 2);
        assert_eq!(value["totalEmission"], 10);
        assert_eq!(value["curveExponent"], 1.0);
        assert!(value["merkleRoot"].as_str().unwrap().starts_with("0x"));
        let first = &value["allocations"][0];
        assert_eq!(first["rewardAmount"], "6");
        assert_eq!(first["rank"], 1);
        assert!(first["proof"].is_array());

        let parsed = EpochDistribution::from_json_bytes(&dist.to_json_bytes().unwrap()).unwrap();
        assert_eq!(parsed, dist);
    }

    #[test]
    fn test_emission_base_units() {
        assert_eq!(emission_base_units(10_000, 0), U256::from(10_000u64));
        assert_eq!(
            emission_base_units(10_000, 18),
            U256::from(10_000u64) * U256::from(10u64).pow(U256::from(18u64))
        );
    }
}
