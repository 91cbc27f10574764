//! Keccak Merkle proofs, the OpenZeppelin `MerkleProof` flavour.
//!
//! Leaves are `keccak256(address)` over the 20 raw address bytes. Interior
//! nodes hash the two children in ascending byte order, which is what lets a
//! proof be a bare list of siblings with no left/right flags.
//!
//! [`MerkleTree`] is the producing side. The vault never needs it, but the
//! proof files have to come from somewhere, and tests need real proofs.

use alloy_primitives::{keccak256, Address, B256};

/// Leaf hash for an allow-listed address.
pub fn leaf_hash(address: Address) -> B256 {
    keccak256(address.as_slice())
}

/// Combines two nodes, smaller one first.
pub fn hash_pair(a: B256, b: B256) -> B256 {
    let mut buf = [0u8; 64];
    if a <= b {
        buf[..32].copy_from_slice(a.as_slice());
        buf[32..].copy_from_slice(b.as_slice());
    } else {
        buf[..32].copy_from_slice(b.as_slice());
        buf[32..].copy_from_slice(a.as_slice());
    }
    keccak256(buf)
}

/// Folds `proof` into `leaf`, returning the implied root.
pub fn process_proof(leaf: B256, proof: &[B256]) -> B256 {
    proof.iter().fold(leaf, |node, sibling| hash_pair(node, *sibling))
}

/// `true` if `proof` takes `address`'s leaf to `root`.
pub fn verify(address: Address, proof: &[B256], root: B256) -> bool {
    process_proof(leaf_hash(address), proof) == root
}

/// A complete tree over a fixed address set.
///
/// Levels are built bottom-up. An odd node at the end of a level is carried
/// up unchanged rather than paired with itself, so it contributes no sibling
/// to the proof at that level.
#[derive(Debug, Clone)]
pub struct MerkleTree {
    addresses: Vec<Address>,
    levels: Vec<Vec<B256>>,
}

impl MerkleTree {
    /// Builds the tree. Order of `addresses` fixes the leaf order.
    pub fn from_addresses(addresses: &[Address]) -> Self {
        let leaves: Vec<B256> = addresses.iter().map(|a| leaf_hash(*a)).collect();
        let mut levels = vec![leaves];

        while levels.last().map_or(false, |l| l.len() > 1) {
            let current = &levels[levels.len() - 1];
            let next: Vec<B256> = current
                .chunks(2)
                .map(|pair| match pair.get(1) {
                    Some(right) => hash_pair(pair[0], *right),
                    None => pair[0],
                })
                .collect();
            levels.push(next);
        }

        Self {
            addresses: addresses.to_vec(),
            levels,
        }
    }

    /// The root, or zero for an empty tree.
    pub fn root(&self) -> B256 {
        self.levels
            .last()
            .and_then(|l| l.first().copied())
            .unwrap_or(B256::ZERO)
    }

    /// Proof for `address`, or `None` if it is not a member.
    pub fn proof_for(&self, address: Address) -> Option<Vec<B256>> {
        let mut index = self.addresses.iter().position(|a| *a == address)?;
        let mut proof = Vec::new();
        for level in &self.levels[..self.levels.len().saturating_sub(1)] {
            let sibling = index ^ 1;
            if sibling < level.len() {
                proof.push(level[sibling]);
            }
            index /= 2;
        }
        Some(proof)
    }

    /// Member addresses in leaf order.
    pub fn addresses(&self) -> &[Address] {
        &self.addresses
    }
}
