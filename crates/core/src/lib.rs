//! ChopShop Core Types
//!
//! This crate defines the data model shared by the voucher signer, the epoch
//! reward pipeline and the ledger surfaces.

mod error;
mod exponent;
mod types;

pub mod u256_dec;

pub use error::*;
pub use exponent::*;
pub use types::*;

pub use alloy_primitives::{Address, Bytes, B256, U256};
