//! Rank-weighted reward curve.
//!
//! For rank `r` among `N` players the curve weight is `(N - r + 1) ^ exponent`.
//! Only the ratio between weights matters, so each weight is computed as
//! `(k / 2^s) ^ exponent` where `2^s` is the smallest power of two above `N`.
//! That keeps every weight in `[0, 1)`, stored as an unsigned fixed-point
//! value with 120 fractional bits, for any accepted exponent and player count.
//! Everything is integer arithmetic, so every machine derives the same
//! allocations, and therefore the same root, from the same inputs.
//!
//! Integral exponents are exact while `exponent * s <= 120`. A fractional
//! part `f` is evaluated as `2^(-f * (s - log2 k))`, with `log2` by repeated
//! squaring and `exp2` by a product over the table `2^(2^-i)`, itself derived
//! with integer square roots.

use std::collections::HashSet;
use std::sync::OnceLock;

use alloy_primitives::U256;
use tracing::debug;

use chopshop_core::{emission_base_units, CurveExponent, EpochPlayerRecord, RewardAllocation};

use crate::{AggregatorError, Result};

/// Fractional bits of the `log2`/`exp2` helpers (Q64.64).
const Q64: usize = 64;

/// Fractional bits of a curve weight.
const WEIGHT_BITS: usize = 120;

/// Bound that keeps `weight * emission` inside 256 bits.
const MAX_EMISSION_BITS: usize = 96;

const PERCENTILE_SCALE: u64 = 10_000;

fn q64_one() -> U256 {
    U256::from(1u8) << Q64
}

fn weight_one() -> U256 {
    U256::from(1u8) << WEIGHT_BITS
}

/// `a * b / d`. The product never overflows under the bounds checked in
/// [`calculate`].
fn mul_div(a: U256, b: U256, d: U256) -> Result<U256> {
    let product = a
        .checked_mul(b)
        .ok_or_else(|| AggregatorError::Overflow(format!("{} * {}", a, b)))?;
    Ok(product / d)
}

fn isqrt(n: U256) -> U256 {
    if n.is_zero() {
        return U256::ZERO;
    }
    let mut x = n;
    let mut y = (x >> 1usize) + U256::from(1u8);
    while y < x {
        x = y;
        y = (x + n / x) >> 1usize;
    }
    x
}

/// `2^(2^-i)` in Q64.64 for `i = 1..=64`, at index `i - 1`.
fn exp2_table() -> &'static [U256; Q64] {
    static TABLE: OnceLock<[U256; Q64]> = OnceLock::new();
    TABLE.get_or_init(|| {
        let mut table = [U256::ZERO; Q64];
        let mut c = U256::from(2u8) << Q64;
        for entry in table.iter_mut() {
            c = isqrt(c << Q64);
            *entry = c;
        }
        table
    })
}

/// `log2(k)` in Q64.64. `k` must be at least 1.
fn log2_q64(k: u64) -> U256 {
    let int_part = 63 - k.leading_zeros();
    // k / 2^int_part in [1, 2), as Q1.63
    let mut y: u128 = (k as u128) << (63 - int_part);
    let mut frac: u64 = 0;
    for bit in (0..64).rev() {
        y = (y * y) >> 63;
        if y >= 1u128 << 64 {
            y >>= 1;
            frac |= 1u64 << bit;
        }
    }
    (U256::from(int_part) << Q64) | U256::from(frac)
}

/// `2^(frac / 2^64)` in Q64.64, a value in `[1, 2)`.
fn exp2_frac(frac: u64) -> U256 {
    let mut acc = q64_one();
    for (i, factor) in exp2_table().iter().enumerate() {
        if frac & (1u64 << (Q64 - 1 - i)) != 0 {
            acc = (acc * *factor) >> Q64;
        }
    }
    acc
}

/// `2^-x` for `x` in Q64.64, result with [`WEIGHT_BITS`] fractional bits.
fn exp2_neg(x: U256) -> U256 {
    let whole = x >> Q64;
    let frac = x.as_limbs()[0];
    // 2^-x = 2^(m - x) / 2^m with m = ceil(x)
    let (m, rest) = if frac == 0 {
        (whole, 0)
    } else {
        (whole + U256::from(1u8), frac.wrapping_neg())
    };
    match usize::try_from(m) {
        Ok(m) if m <= WEIGHT_BITS + 1 => (exp2_frac(rest) << (WEIGHT_BITS - Q64)) >> m,
        _ => U256::ZERO,
    }
}

/// `(k / 2^scale_bits) ^ exponent` with [`WEIGHT_BITS`] fractional bits.
///
/// `k` must lie in `[1, 2^scale_bits)`, so the result is in `[0, 1)`.
pub fn rank_weight(k: u64, scale_bits: u32, exponent: CurveExponent) -> Result<U256> {
    if k == 0 {
        return Err(AggregatorError::InvalidInput("weight base must be >= 1".to_string()));
    }
    if scale_bits > 64 || (scale_bits < 64 && k >> scale_bits != 0) {
        return Err(AggregatorError::InvalidInput(format!(
            "weight base {} does not fit in {} bits",
            k, scale_bits
        )));
    }

    let base = U256::from(k) << (WEIGHT_BITS - scale_bits as usize);
    let mut weight = weight_one();
    for _ in 0..exponent.integer_part() {
        weight = (weight * base) >> WEIGHT_BITS;
    }

    if !exponent.is_integral() {
        let distance = (U256::from(scale_bits) << Q64) - log2_q64(k);
        let x = distance * U256::from(exponent.fractional_micros()) / U256::from(CurveExponent::SCALE);
        weight = (weight * exp2_neg(x)) >> WEIGHT_BITS;
    }
    Ok(weight)
}

/// Rank `players` by stars (descending, stable) and split the emission.
///
/// `total_emission` is in whole tokens and is scaled by `10^token_decimals`.
/// Each reward is floored; the remainder stays unallocated.
pub fn calculate(
    players: &[EpochPlayerRecord],
    total_emission: u64,
    exponent: CurveExponent,
    token_decimals: u8,
) -> Result<Vec<RewardAllocation>> {
    if players.is_empty() {
        return Ok(Vec::new());
    }

    let mut seen = HashSet::with_capacity(players.len());
    if let Some(dup) = players.iter().find(|p| !seen.insert(p.address)) {
        return Err(AggregatorError::InvalidInput(format!("duplicate player {}", dup.address)));
    }

    let n = u32::try_from(players.len())
        .map_err(|_| AggregatorError::InvalidInput(format!("{} players", players.len())))?;

    let emission = emission_base_units(total_emission, token_decimals);
    if emission.bit_len() > MAX_EMISSION_BITS {
        return Err(AggregatorError::InvalidInput(format!(
            "emission of {} base units is too large",
            emission
        )));
    }

    let mut ranked: Vec<&EpochPlayerRecord> = players.iter().collect();
    ranked.sort_by(|a, b| b.stars_in_epoch.cmp(&a.stars_in_epoch));

    // 2^scale_bits is the smallest power of two above n
    let scale_bits = 32 - n.leading_zeros();
    let weights = (1..=n)
        .map(|rank| rank_weight(u64::from(n - rank + 1), scale_bits, exponent))
        .collect::<Result<Vec<_>>>()?;
    // At most n * 2^120; rank 1 is at least 2^(120 - 16)
    let total_weight = weights.iter().fold(U256::ZERO, |acc, w| acc + *w);

    debug!(
        "Curve: {} players, exponent {}, emission {} base units",
        n, exponent, emission
    );

    ranked
        .into_iter()
        .zip(weights)
        .zip(1..=n)
        .map(|((player, weight), rank)| {
            let reward_amount = mul_div(weight, emission, total_weight)?;
            let percentile_bps = u64::from(n - rank + 1) * PERCENTILE_SCALE / u64::from(n);
            Ok(RewardAllocation {
                address: player.address,
                stars_in_epoch: player.stars_in_epoch,
                rank,
                weight,
                reward_amount,
                percentile_bps: percentile_bps as u32,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::Address;

    fn exp(value: f64) -> CurveExponent {
        CurveExponent::from_f64(value).unwrap()
    }

    fn player(b: u8, stars: u64) -> EpochPlayerRecord {
        EpochPlayerRecord::new(Address::repeat_byte(b), U256::from(stars))
    }

    fn q64_to_f64(value: U256) -> f64 {
        let limbs = value.as_limbs();
        limbs[0] as f64 / 2f64.powi(64) + limbs[1] as f64 + limbs[2] as f64 * 2f64.powi(64)
    }

    fn whole_tokens(amount: U256, decimals: u8) -> u64 {
        (amount / U256::from(10u64).pow(U256::from(decimals))).to::<u64>()
    }

    #[test]
    fn test_isqrt() {
        assert_eq!(isqrt(U256::from(0u8)), U256::ZERO);
        assert_eq!(isqrt(U256::from(1u8)), U256::from(1u8));
        assert_eq!(isqrt(U256::from(15u8)), U256::from(3u8));
        assert_eq!(isqrt(U256::from(16u8)), U256::from(4u8));
        assert_eq!(isqrt(U256::from(1u8) << 200usize), U256::from(1u8) << 100usize);
    }

    #[test]
    fn test_exp2_table_first_entry_is_sqrt2() {
        let c1 = q64_to_f64(exp2_table()[0]);
        assert!((c1 - std::f64::consts::SQRT_2).abs() < 1e-15);
        for pair in exp2_table().windows(2) {
            assert!(pair[0] >= pair[1]);
        }
    }

    #[test]
    fn test_log2_exact_powers_of_two() {
        assert_eq!(log2_q64(1), U256::ZERO);
        assert_eq!(log2_q64(8), U256::from(3u8) << 64usize);
        assert_eq!(log2_q64(1 << 40), U256::from(40u8) << 64usize);
        assert!((q64_to_f64(log2_q64(3)) - 3f64.log2()).abs() < 1e-15);
    }

    fn weight_to_f64(value: U256) -> f64 {
        let raw = value
            .as_limbs()
            .iter()
            .rev()
            .fold(0.0, |acc, limb| acc * 2f64.powi(64) + *limb as f64);
        raw / 2f64.powi(WEIGHT_BITS as i32)
    }

    #[test]
    fn test_rank_weight_exact_cases() {
        assert_eq!(rank_weight(7, 3, CurveExponent::LINEAR).unwrap(), U256::from(7u8) << 117usize);
        assert_eq!(rank_weight(4, 3, exp(2.0)).unwrap(), weight_one() >> 2usize);
        assert_eq!(rank_weight(3, 2, exp(2.0)).unwrap(), U256::from(9u8) << 116usize);
        // (4/8)^0.5 = 2^-0.5
        assert_eq!(rank_weight(4, 3, exp(0.5)).unwrap(), exp2_table()[0] << 55usize);
    }

    #[test]
    fn test_rank_weight_fractional_accuracy() {
        for (k, e) in [(2u64, 1.5), (3, 1.5), (10, 0.25), (1000, 2.75), (12345, 1.1)] {
            let scale_bits = 64 - k.leading_zeros();
            let got = weight_to_f64(rank_weight(k, scale_bits, exp(e)).unwrap());
            let want = (k as f64 / 2f64.powi(scale_bits as i32)).powf(e);
            assert!(
                ((got - want) / want).abs() < 1e-12,
                "{}^{}: got {}, want {}",
                k,
                e,
                got,
                want
            );
        }
    }

    #[test]
    fn test_rank_weight_rejects_bad_base() {
        assert!(matches!(rank_weight(0, 3, exp(1.0)), Err(AggregatorError::InvalidInput(_))));
        assert!(matches!(rank_weight(8, 3, exp(1.0)), Err(AggregatorError::InvalidInput(_))));
        assert!(matches!(rank_weight(1, 65, exp(1.0)), Err(AggregatorError::InvalidInput(_))));
        assert!(rank_weight(u64::MAX, 64, exp(16.0)).is_ok());
    }

    fn field(n: u32) -> Vec<EpochPlayerRecord> {
        (0..n)
            .map(|i| {
                EpochPlayerRecord::new(
                    Address::left_padding_from(&(i + 1).to_be_bytes()),
                    U256::from(1_000_000 - u64::from(i)),
                )
            })
            .collect()
    }

    #[test]
    fn test_steepest_exponent_with_large_field() {
        let players = field(1000);
        let allocations = calculate(&players, 10_000, exp(16.0), 18).unwrap();
        assert_eq!(allocations.len(), 1000);

        let emission = emission_base_units(10_000, 18);
        let total = allocations.iter().fold(U256::ZERO, |acc, a| acc + a.reward_amount);
        assert!(total <= emission);
        assert!(emission - total < U256::from(1000u64));
        for pair in allocations.windows(2) {
            assert!(pair[0].reward_amount >= pair[1].reward_amount);
        }
        // (1000/999)^16
        let ratio = weight_to_f64(allocations[0].weight) / weight_to_f64(allocations[1].weight);
        assert!((ratio - (1000f64 / 999f64).powi(16)).abs() < 1e-9);
    }

    #[test]
    fn test_whole_exponent_range_computes() {
        let micros = [
            1,
            500_000,
            1_000_000,
            1_500_000,
            3_000_000,
            6_000_000,
            10_000_000,
            15_999_999,
            chopshop_core::MAX_CURVE_EXPONENT_MICROS,
        ];
        for n in [1u32, 2, 3, 60, 1000] {
            let players = field(n);
            for m in micros {
                let exponent = CurveExponent::from_micros(m).unwrap();
                let allocations = calculate(&players, 10_000, exponent, 18)
                    .unwrap_or_else(|e| panic!("{} players ^ {}: {}", n, exponent, e));
                let total = allocations.iter().fold(U256::ZERO, |acc, a| acc + a.reward_amount);
                assert!(total <= emission_base_units(10_000, 18));
                assert!(!allocations[0].reward_amount.is_zero());
            }
        }
    }

    #[test]
    fn test_three_player_scenario() {
        let players = vec![player(0xA, 100), player(0xB, 50), player(0xC, 25)];
        let allocations = calculate(&players, 10_000, exp(1.5), 18).unwrap();

        assert_eq!(allocations.len(), 3);
        assert_eq!(allocations[0].address, Address::repeat_byte(0xA));
        assert_eq!(allocations[0].rank, 1);
        assert_eq!(allocations[2].rank, 3);

        // 3^1.5 : 2^1.5 : 1 over a sum of ~9.0246
        assert_eq!(whole_tokens(allocations[0].reward_amount, 18), 5757);
        assert_eq!(whole_tokens(allocations[1].reward_amount, 18), 3134);
        assert_eq!(whole_tokens(allocations[2].reward_amount, 18), 1108);

        let total = allocations.iter().fold(U256::ZERO, |acc, a| acc + a.reward_amount);
        assert!(total <= emission_base_units(10_000, 18));
    }

    #[test]
    fn test_linear_curve_is_exact() {
        let players = vec![player(1, 30), player(2, 20), player(3, 10)];
        let allocations = calculate(&players, 6, CurveExponent::LINEAR, 0).unwrap();
        let rewards: Vec<U256> = allocations.iter().map(|a| a.reward_amount).collect();
        assert_eq!(rewards, vec![U256::from(3u8), U256::from(2u8), U256::from(1u8)]);
    }

    #[test]
    fn test_single_player_gets_everything() {
        let allocations = calculate(&[player(1, 5)], 10_000, exp(1.5), 18).unwrap();
        assert_eq!(allocations[0].reward_amount, emission_base_units(10_000, 18));
        assert_eq!(allocations[0].percentile_bps, 10_000);
    }

    #[test]
    fn test_ties_rank_by_input_order() {
        let players = vec![player(1, 10), player(2, 10), player(3, 10), player(4, 10)];
        let allocations = calculate(&players, 10_000, exp(1.5), 18).unwrap();

        let order: Vec<Address> = allocations.iter().map(|a| a.address).collect();
        assert_eq!(order, players.iter().map(|p| p.address).collect::<Vec<_>>());
        for pair in allocations.windows(2) {
            assert!(pair[0].reward_amount > pair[1].reward_amount);
        }
    }

    #[test]
    fn test_sorted_by_stars_descending() {
        let players = vec![player(1, 5), player(2, 500), player(3, 50)];
        let allocations = calculate(&players, 100, exp(1.5), 18).unwrap();
        let order: Vec<u8> = allocations.iter().map(|a| a.address.as_slice()[0]).collect();
        assert_eq!(order, vec![2, 3, 1]);
    }

    #[test]
    fn test_percentile_bps() {
        let players: Vec<_> = (1..=4).map(|i| player(i, 100 - i as u64)).collect();
        let allocations = calculate(&players, 100, CurveExponent::LINEAR, 18).unwrap();
        let bps: Vec<u32> = allocations.iter().map(|a| a.percentile_bps).collect();
        assert_eq!(bps, vec![10_000, 7_500, 5_000, 2_500]);
    }

    #[test]
    fn test_higher_exponent_concentrates_on_rank_one() {
        let players: Vec<_> = (1..=10).map(|i| player(i, 1000 - i as u64)).collect();
        let linear = calculate(&players, 10_000, CurveExponent::LINEAR, 18).unwrap();
        let steep = calculate(&players, 10_000, exp(3.0), 18).unwrap();
        assert!(steep[0].reward_amount > linear[0].reward_amount);
        assert!(steep[9].reward_amount < linear[9].reward_amount);
    }

    #[test]
    fn test_deterministic_and_bounded() {
        let players: Vec<_> = (1..=200u8).map(|i| player(i, (i as u64 * 7919) % 1000)).collect();
        let a = calculate(&players, 123_456, exp(1.37), 18).unwrap();
        let b = calculate(&players, 123_456, exp(1.37), 18).unwrap();
        assert_eq!(a, b);

        let total = a.iter().fold(U256::ZERO, |acc, x| acc + x.reward_amount);
        let emission = emission_base_units(123_456, 18);
        assert!(total <= emission);
        // floor loses strictly less than one base unit per player
        assert!(emission - total < U256::from(players.len()));
    }

    #[test]
    fn test_empty_and_duplicate_input() {
        assert!(calculate(&[], 10_000, exp(1.5), 18).unwrap().is_empty());

        let err = calculate(&[player(1, 5), player(1, 6)], 10_000, exp(1.5), 18).unwrap_err();
        assert!(matches!(err, AggregatorError::InvalidInput(_)));
    }

    #[test]
    fn test_oversized_emission_rejected() {
        let err = calculate(&[player(1, 5)], u64::MAX, exp(1.5), 18).unwrap_err();
        assert!(matches!(err, AggregatorError::InvalidInput(_)));
    }
}
