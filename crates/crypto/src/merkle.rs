//! Binary Merkle tree over transaction hashes.
//!
//! Leaves are the stored hex transaction hashes verbatim (not re-hashed).
//! Each parent is `sha256(left ‖ right)` over the hex text of its children;
//! a level with an odd count duplicates its last element. The root of a
//! single-leaf tree is that leaf.

use sha2::{Digest, Sha256};

/// A binary Merkle tree built level-by-level from hex-string leaves.
#[derive(Debug, Clone)]
pub struct MerkleTree {
    levels: Vec<Vec<String>>,
}

fn pair_hash(left: &str, right: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(left.as_bytes());
    hasher.update(right.as_bytes());
    hex::encode(hasher.finalize())
}

impl MerkleTree {
    /// Builds the tree. Returns `None` for an empty leaf set, which has no
    /// defined root.
    pub fn build(leaves: Vec<String>) -> Option<Self> {
        if leaves.is_empty() {
            return None;
        }
        let mut levels = vec![leaves];
        while let Some(level) = levels.last() {
            if level.len() == 1 {
                break;
            }
            let mut next = Vec::with_capacity(level.len().div_ceil(2));
            let mut i = 0;
            while i < level.len() {
                let left = &level[i];
                // Canonical binary Merkle: odd count duplicates the last leaf.
                let right = level.get(i + 1).unwrap_or(left);
                next.push(pair_hash(left, right));
                i += 2;
            }
            levels.push(next);
        }
        Some(MerkleTree { levels })
    }

    /// The root hash at the top level.
    pub fn root(&self) -> &str {
        // build() guarantees a non-empty single-element top level.
        self.levels
            .last()
            .and_then(|l| l.first())
            .map(String::as_str)
            .unwrap_or_default()
    }

    /// Number of leaves the tree was built over.
    pub fn leaf_count(&self) -> usize {
        self.levels.first().map(Vec::len).unwrap_or(0)
    }
}

/// Convenience: the Merkle root over a sequence of hashes, or `None` when
/// the sequence is empty.
pub fn merkle_root(leaves: Vec<String>) -> Option<String> {
    MerkleTree::build(leaves).map(|t| t.root().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn h(s: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(s.as_bytes());
        hex::encode(hasher.finalize())
    }

    #[test]
    fn empty_has_no_root() {
        assert!(merkle_root(vec![]).is_none());
    }

    #[test]
    fn single_leaf_is_its_own_root() {
        let leaf = h("only");
        assert_eq!(merkle_root(vec![leaf.clone()]).unwrap(), leaf);
    }

    #[test]
    fn two_leaves_hash_together() {
        let (a, b) = (h("a"), h("b"));
        let root = merkle_root(vec![a.clone(), b.clone()]).unwrap();
        assert_eq!(root, pair_hash(&a, &b));
    }

    #[test]
    fn odd_count_duplicates_last() {
        let (a, b, c) = (h("a"), h("b"), h("c"));
        let root = merkle_root(vec![a.clone(), b.clone(), c.clone()]).unwrap();
        let left = pair_hash(&a, &b);
        let right = pair_hash(&c, &c);
        assert_eq!(root, pair_hash(&left, &right));
    }

    #[test]
    fn tamper_changes_root() {
        let leaves: Vec<String> = (0..8).map(|i| h(&format!("tx-{i}"))).collect();
        let root = merkle_root(leaves.clone()).unwrap();
        let mut tampered = leaves;
        tampered[3] = h("evil");
        assert_ne!(root, merkle_root(tampered).unwrap());
    }

    proptest! {
        #[test]
        fn root_is_deterministic(n in 1usize..64) {
            let leaves: Vec<String> = (0..n).map(|i| h(&format!("leaf-{i}"))).collect();
            prop_assert_eq!(merkle_root(leaves.clone()), merkle_root(leaves));
        }
    }
}
