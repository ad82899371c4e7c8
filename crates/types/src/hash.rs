//! Content hashing.

use sha2::{Digest, Sha256};

/// A 256-bit content hash.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, sbor::prelude::BasicSbor)]
pub struct Hash(pub [u8; 32]);

impl Hash {
    /// The all-zero hash, used as the genesis parent.
    pub const ZERO: Hash = Hash([0u8; 32]);

    /// Hash arbitrary bytes with SHA-256.
    pub fn of_bytes(bytes: &[u8]) -> Self {
        let digest = Sha256::digest(bytes);
        let mut out = [0u8; 32];
        out.copy_from_slice(&digest);
        Hash(out)
    }

    /// Chain two hashes: `H(left || right)`.
    pub fn combine(left: &Hash, right: &Hash) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(left.0);
        hasher.update(right.0);
        let digest = hasher.finalize();
        let mut out = [0u8; 32];
        out.copy_from_slice(&digest);
        Hash(out)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

/// Hash an SBOR-encodable value by hashing its canonical encoding.
pub fn hash_sbor<T: sbor::prelude::BasicEncode>(value: &T) -> Hash {
    let bytes = sbor::prelude::basic_encode(value)
        .expect("sbor encoding of consensus types is infallible");
    Hash::of_bytes(&bytes)
}

impl std::fmt::Debug for Hash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", &hex::encode(self.0)[..16])
    }
}

impl std::fmt::Display for Hash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hashing_is_deterministic() {
        assert_eq!(Hash::of_bytes(b"abc"), Hash::of_bytes(b"abc"));
        assert_ne!(Hash::of_bytes(b"abc"), Hash::of_bytes(b"abd"));
    }

    #[test]
    fn combine_is_order_sensitive() {
        let a = Hash::of_bytes(b"a");
        let b = Hash::of_bytes(b"b");
        assert_ne!(Hash::combine(&a, &b), Hash::combine(&b, &a));
    }
}
