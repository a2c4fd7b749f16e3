//! Voucher nonce generation.
//!
//! The ledger keeps the only authoritative used-nonce set, so nonces must be
//! unique across restarts and across concurrently running issuers. Each
//! nonce packs a strictly increasing nanosecond timestamp into the high 128
//! bits and 128 random bits into the low half.

use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use alloy_primitives::U256;

/// Pack a timestamp and random entropy into a voucher nonce.
pub fn compose_nonce(timestamp_nanos: u128, entropy: u128) -> U256 {
    (U256::from(timestamp_nanos) << 128usize) | U256::from(entropy)
}

/// Timestamp half of a nonce produced by [`compose_nonce`].
pub fn nonce_timestamp_nanos(nonce: U256) -> u128 {
    (nonce >> 128usize).to::<u128>()
}

/// Collision-resistant nonce generator.
///
/// Within one process the timestamp half never repeats even if the wall clock
/// stalls or steps backwards; across processes the random half separates
/// issuers that happen to share a timestamp.
#[derive(Debug, Default)]
pub struct NonceSource {
    last_nanos: Mutex<u128>,
}

impl NonceSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_nonce(&self) -> U256 {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        let nanos = {
            let mut last = self.last_nanos.lock().expect("nonce lock poisoned");
            let next = now.max(last.saturating_add(1));
            *last = next;
            next
        };
        compose_nonce(nanos, rand::random::<u128>())
    }
}
