use alloy_primitives::{keccak256, Address, B256, U256};

/// Sibling hashes from leaf to root.
pub type MerkleProof = Vec<B256>;

/// Leaf for one allocation: `keccak256(address(20) || amount(32, big-endian))`.
pub fn allocation_leaf(address: &Address, amount: U256) -> B256 {
    let mut buf = [0u8; 52];
    buf[..20].copy_from_slice(address.as_slice());
    buf[20..].copy_from_slice(&amount.to_be_bytes::<32>());
    keccak256(buf)
}

/// Parent of two nodes, order-independent: `keccak256(min || max)`.
pub fn hash_pair(a: &B256, b: &B256) -> B256 {
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    let mut buf = [0u8; 64];
    buf[..32].copy_from_slice(lo.as_slice());
    buf[32..].copy_from_slice(hi.as_slice());
    keccak256(buf)
}

/// Fold `proof` onto `leaf` and compare with `root`.
pub fn verify(root: &B256, leaf: &B256, proof: &[B256]) -> bool {
    let computed = proof.iter().fold(*leaf, |acc, sibling| hash_pair(&acc, sibling));
    computed == *root
}

/// [`verify`] for an `(address, amount)` allocation.
pub fn verify_allocation(root: &B256, address: &Address, amount: U256, proof: &[B256]) -> bool {
    verify(root, &allocation_leaf(address, amount), proof)
}

/// Binary Merkle tree in sorted-pairs mode.
///
/// Leaves keep their insertion order. An unpaired node at the end of a
/// level is promoted to the next level unchanged, so its proof simply has
/// no entry for that level. Every layer is kept so proofs are O(log n)
/// lookups.
#[derive(Debug, Clone)]
pub struct MerkleTree {
    layers: Vec<Vec<B256>>,
}

impl MerkleTree {
    pub fn from_leaves(leaves: Vec<B256>) -> Self {
        let mut layers = vec![leaves];
        loop {
            let current = &layers[layers.len() - 1];
            if current.len() <= 1 {
                break;
            }
            let next: Vec<B256> = current
                .chunks(2)
                .map(|pair| match pair {
                    [left, right] => hash_pair(left, right),
                    [single] => *single,
                    _ => unreachable!("chunks(2) yields one or two nodes"),
                })
                .collect();
            layers.push(next);
        }
        Self { layers }
    }

    /// Build from `(address, amount)` entries, one leaf per entry in order.
    pub fn from_allocations(entries: &[(Address, U256)]) -> Self {
        Self::from_leaves(
            entries
                .iter()
                .map(|(address, amount)| allocation_leaf(address, *amount))
                .collect(),
        )
    }

    /// Root hash; all zeros for an empty tree.
    pub fn root(&self) -> B256 {
        self.layers
            .last()
            .and_then(|top| top.first())
            .copied()
            .unwrap_or(B256::ZERO)
    }

    pub fn leaf_count(&self) -> usize {
        self.layers[0].len()
    }

    pub fn leaves(&self) -> &[B256] {
        &self.layers[0]
    }

    pub fn depth(&self) -> usize {
        self.layers.len() - 1
    }

    /// Proof for the leaf at `index`, or `None` if out of range.
    pub fn proof(&self, index: usize) -> Option<MerkleProof> {
        if index >= self.leaf_count() {
            return None;
        }
        let mut proof = Vec::with_capacity(self.depth());
        let mut idx = index;
        for layer in &self.layers[..self.layers.len() - 1] {
            let sibling = idx ^ 1;
            if sibling < layer.len() {
                proof.push(layer[sibling]);
            }
            idx /= 2;
        }
        Some(proof)
    }
}
