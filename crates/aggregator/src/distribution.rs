//! Merkle Distribution Builder.

use alloy_primitives::{Address, U256};
use tracing::info;

use chopshop_core::{
    AllocationWithProof, CurveExponent, EpochDistribution, EpochPlayerRecord, RewardAllocation,
};
use chopshop_merkle::{verify_allocation, MerkleTree};

use crate::{calculate, AggregatorError, Result};

/// Emission parameters for one epoch's distribution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RewardConfig {
    /// Whole tokens
    pub total_emission: u64,
    pub curve_exponent: CurveExponent,
    pub token_decimals: u8,
}

impl Default for RewardConfig {
    fn default() -> Self {
        Self {
            total_emission: 10_000,
            curve_exponent: CurveExponent::default(),
            token_decimals: 18,
        }
    }
}

fn leaf_entries(allocations: &[RewardAllocation]) -> Vec<(Address, U256)> {
    allocations
        .iter()
        .map(|a| (a.address, a.reward_amount))
        .collect()
}

/// Commit `allocations` to a Merkle tree (leaf order = allocation order)
/// and attach a proof to each one.
///
/// Every proof is checked against the root before the distribution is
/// returned; a failure is a [`AggregatorError::ProofMismatch`] and nothing
/// should be published.
pub fn build_distribution(
    epoch: u64,
    allocations: Vec<RewardAllocation>,
    config: &RewardConfig,
) -> Result<EpochDistribution> {
    if epoch == 0 {
        return Err(AggregatorError::InvalidInput("epoch must be >= 1".to_string()));
    }

    let tree = MerkleTree::from_allocations(&leaf_entries(&allocations));
    let root = tree.root();

    let allocations = allocations
        .into_iter()
        .enumerate()
        .map(|(i, allocation)| {
            let proof = tree
                .proof(i)
                .ok_or_else(|| AggregatorError::ProofMismatch(format!("no proof for leaf {}", i)))?;
            if !verify_allocation(&root, &allocation.address, allocation.reward_amount, &proof) {
                return Err(AggregatorError::ProofMismatch(format!(
                    "proof for {} does not verify against {}",
                    allocation.address, root
                )));
            }
            Ok(AllocationWithProof { allocation, proof })
        })
        .collect::<Result<Vec<_>>>()?;

    info!(
        "Built distribution for epoch {}: {} allocations, root {}",
        epoch,
        allocations.len(),
        root
    );

    Ok(EpochDistribution {
        epoch,
        total_players: allocations.len(),
        total_emission: config.total_emission,
        token_decimals: config.token_decimals,
        curve_exponent: config.curve_exponent,
        merkle_root: root,
        allocations,
    })
}

/// Rank, weight and commit a player list in one step.
pub fn distribution_from_players(
    epoch: u64,
    players: &[EpochPlayerRecord],
    config: &RewardConfig,
) -> Result<EpochDistribution> {
    let allocations = calculate(
        players,
        config.total_emission,
        config.curve_exponent,
        config.token_decimals,
    )?;
    build_distribution(epoch, allocations, config)
}

/// Re-check a stored distribution: the root must rebuild from its
/// allocations and every attached proof must verify.
pub fn verify_distribution(distribution: &EpochDistribution) -> Result<()> {
    if distribution.total_players != distribution.allocations.len() {
        return Err(AggregatorError::ProofMismatch(format!(
            "total_players {} but {} allocations",
            distribution.total_players,
            distribution.allocations.len()
        )));
    }

    let entries: Vec<(Address, U256)> = distribution
        .allocations
        .iter()
        .map(|a| (a.allocation.address, a.allocation.reward_amount))
        .collect();
    let rebuilt = MerkleTree::from_allocations(&entries).root();
    if rebuilt != distribution.merkle_root {
        return Err(AggregatorError::ProofMismatch(format!(
            "epoch {} root {} rebuilds as {}",
            distribution.epoch, distribution.merkle_root, rebuilt
        )));
    }

    for entry in &distribution.allocations {
        let a = &entry.allocation;
        if !verify_allocation(&distribution.merkle_root, &a.address, a.reward_amount, &entry.proof) {
            return Err(AggregatorError::ProofMismatch(format!(
                "stored proof for {} does not verify",
                a.address
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::B256;

    fn player(b: u8, stars: u64) -> EpochPlayerRecord {
        EpochPlayerRecord::new(Address::repeat_byte(b), U256::from(stars))
    }

    fn scenario() -> EpochDistribution {
        let players = vec![player(0xA, 100), player(0xB, 50), player(0xC, 25)];
        distribution_from_players(1, &players, &RewardConfig::default()).unwrap()
    }

    #[test]
    fn test_build_distribution_proofs_verify() {
        let d = scenario();
        assert_eq!(d.total_players, 3);
        assert_ne!(d.merkle_root, B256::ZERO);
        for entry in &d.allocations {
            assert!(verify_allocation(
                &d.merkle_root,
                &entry.allocation.address,
                entry.allocation.reward_amount,
                &entry.proof
            ));
        }
        verify_distribution(&d).unwrap();
    }

    #[test]
    fn test_build_distribution_deterministic() {
        let a = scenario();
        let b = scenario();
        assert_eq!(a.merkle_root, b.merkle_root);
        assert_eq!(a.to_json_bytes().unwrap(), b.to_json_bytes().unwrap());
    }

    #[test]
    fn test_foreign_or_tampered_entries_fail() {
        let d = scenario();
        let first = &d.allocations[0];
        assert!(!verify_allocation(
            &d.merkle_root,
            &first.allocation.address,
            first.allocation.reward_amount + U256::from(1u8),
            &first.proof
        ));
        assert!(!verify_allocation(
            &d.merkle_root,
            &Address::repeat_byte(0xEE),
            first.allocation.reward_amount,
            &first.proof
        ));
    }

    #[test]
    fn test_verify_distribution_detects_tampering() {
        let mut d = scenario();
        d.allocations[1].allocation.reward_amount += U256::from(1u8);
        assert!(matches!(
            verify_distribution(&d),
            Err(AggregatorError::ProofMismatch(_))
        ));

        let mut d = scenario();
        d.merkle_root = B256::repeat_byte(0x42);
        assert!(verify_distribution(&d).is_err());

        let mut d = scenario();
        d.total_players = 4;
        assert!(verify_distribution(&d).is_err());
    }

    #[test]
    fn test_artifact_json_roundtrip_keeps_root() {
        let d = scenario();
        let bytes = d.to_json_bytes().unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["epoch"], 1);
        assert_eq!(json["totalPlayers"], 3);
        assert_eq!(json["curveExponent"], 1.5);
        assert!(json["merkleRoot"].is_string());
        assert!(json["allocations"][0]["proof"].is_array());

        let loaded = EpochDistribution::from_json_bytes(&bytes).unwrap();
        assert_eq!(loaded, d);
        verify_distribution(&loaded).unwrap();
    }

    #[test]
    fn test_epoch_zero_rejected() {
        let err = build_distribution(0, Vec::new(), &RewardConfig::default()).unwrap_err();
        assert!(matches!(err, AggregatorError::InvalidInput(_)));
    }
}
