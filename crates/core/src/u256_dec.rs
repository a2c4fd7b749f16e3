//! Serde helper rendering `U256` as a base-10 string.
//!
//! Token amounts exceed the JSON-safe integer range, and the artifact
//! should read the same way a block explorer shows balances.
//!
//! ```ignore
//! #[serde(with = "chopshop_core::u256_dec")]
//! pub amount: U256,
//! ```

use alloy_primitives::U256;
use serde::{Deserialize, Deserializer, Serializer};

pub fn serialize<S: Serializer>(value: &U256, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&value.to_string())
}

pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<U256, D::Error> {
    let s = String::deserialize(deserializer)?;
    parse(&s).map_err(serde::de::Error::custom)
}

/// Parse a decimal (or `0x`-prefixed hex) string into a `U256`.
pub fn parse(s: &str) -> Result<U256, String> {
    let s = s.trim();
    let parsed = match s.strip_prefix("0x") {
        Some(hex) => U256::from_str_radix(hex, 16),
        None => U256::from_str_radix(s, 10),
    };
    parsed.map_err(|e| format!("invalid uint256 {:?}: {}", s, e))
}
