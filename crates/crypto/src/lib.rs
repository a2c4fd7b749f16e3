//! ChopShop Cryptography
//!
//! Voucher signing for on-chain star claims. The message layout and the
//! personal-sign wrapping match the ledger's verifier byte for byte.

mod nonce;
mod voucher;

pub use nonce::*;
pub use voucher::*;

pub use alloy_signer_local::PrivateKeySigner;
