//! ChopShop Merkle
//!
//! Binary Merkle tree over `(address, amount)` allocation leaves.
//!
//! The tree is built in sorted-pairs mode: each parent is
//! `keccak256(min(a, b) || max(a, b))`, so a proof is a flat list of sibling
//! hashes with no left/right flags. This is the convention the on-chain
//! distributor verifies against; `verify` here is its off-chain twin.

pub mod merkle;

pub use merkle::{allocation_leaf, hash_pair, verify, verify_allocation, MerkleProof, MerkleTree};
