//! xxHash-based structural hashing.
//!
//! Plan-cache keys are 128-bit xxh3 digests of a parameterized query tree.
//! Every tree node derives [`Hash`], so feeding a node into
//! [`StructuralHasher`] hashes its kind, its type and its children; values
//! that were turned into parameters contribute only their position and
//! type.

use std::hash::{Hash, Hasher};

use xxhash_rust::xxh3::Xxh3;

/// Fixed seed so digests are stable across processes.
const SEED: u64 = 0x517cc1b727220a95;

/// [`Hasher`] adapter over the streaming xxh3 digest.
pub struct StructuralHasher {
    inner: Xxh3,
}

impl StructuralHasher {
    pub fn new() -> Self {
        StructuralHasher {
            inner: Xxh3::with_seed(SEED),
        }
    }

    /// The full 128-bit digest of everything written so far.
    pub fn finish_128(&self) -> u128 {
        self.inner.digest128()
    }
}

impl Default for StructuralHasher {
    fn default() -> Self {
        Self::new()
    }
}

impl Hasher for StructuralHasher {
    fn finish(&self) -> u64 {
        self.inner.digest()
    }

    fn write(&mut self, bytes: &[u8]) {
        self.inner.update(bytes);
    }
}

/// 128-bit structural hash of any hashable tree.
pub fn structural_hash<T: Hash + ?Sized>(value: &T) -> u128 {
    let mut hasher = StructuralHasher::new();
    value.hash(&mut hasher);
    hasher.finish_128()
}

/// Render a digest for log output.
pub fn format_key(key: u128) -> String {
    format!("{key:032x}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_determinism() {
        assert_eq!(structural_hash("hello world"), structural_hash("hello world"));
    }

    #[test]
    fn test_hash_different_inputs() {
        assert_ne!(structural_hash("hello"), structural_hash("world"));
    }

    #[test]
    fn test_hash_respects_structure() {
        // Same bytes, different grouping.
        let a = (String::from("ab"), String::from("c"));
        let b = (String::from("a"), String::from("bc"));
        assert_ne!(structural_hash(&a), structural_hash(&b));
    }

    #[test]
    fn test_format_key_width() {
        assert_eq!(format_key(1).len(), 32);
    }
}
