//! View Digests
//!
//! Deterministic hashing of filtered player views.
//! Clients echo the digest of the last view they applied; a mismatch
//! against the server's current digest signals a desync.

use sha2::{Sha256, Digest};

/// Hash output type (256 bits / 32 bytes)
pub type ViewDigest = [u8; 32];

/// Deterministic hasher for player views.
///
/// Wraps SHA-256 with length-prefixed helpers so adjacent fields
/// cannot be confused. Order of updates is part of the digest.
pub struct ViewHasher {
    hasher: Sha256,
}

impl ViewHasher {
    /// Create a new hasher with domain separator.
    pub fn new(domain: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(domain);
        Self { hasher }
    }

    /// Create hasher for player views.
    pub fn for_player_view() -> Self {
        Self::new(b"CARD_SYNC_VIEW_V1")
    }

    /// Update with raw bytes.
    #[inline]
    pub fn update_bytes(&mut self, bytes: &[u8]) {
        self.hasher.update(bytes);
    }

    /// Update with a u8 value.
    #[inline]
    pub fn update_u8(&mut self, value: u8) {
        self.hasher.update([value]);
    }

    /// Update with a u32 value (little-endian).
    #[inline]
    pub fn update_u32(&mut self, value: u32) {
        self.hasher.update(value.to_le_bytes());
    }

    /// Update with a u64 value (little-endian).
    #[inline]
    pub fn update_u64(&mut self, value: u64) {
        self.hasher.update(value.to_le_bytes());
    }

    /// Update with a boolean.
    #[inline]
    pub fn update_bool(&mut self, value: bool) {
        self.update_u8(value as u8);
    }

    /// Update with a length-prefixed UTF-8 string.
    #[inline]
    pub fn update_str(&mut self, value: &str) {
        self.update_u64(value.len() as u64);
        self.hasher.update(value.as_bytes());
    }

    /// Update with an optional value; `None` and `Some` never collide.
    #[inline]
    pub fn update_option_u32(&mut self, value: Option<u32>) {
        match value {
            Some(v) => {
                self.update_u8(1);
                self.update_u32(v);
            }
            None => self.update_u8(0),
        }
    }

    /// Finalize and return the digest.
    pub fn finalize(self) -> ViewDigest {
        self.hasher.finalize().into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_view_hasher_determinism() {
        let make_hash = || {
            let mut hasher = ViewHasher::for_player_view();
            hasher.update_u64(7);
            hasher.update_str("Llanowar Elves");
            hasher.update_bool(true);
            hasher.update_option_u32(Some(3));
            hasher.finalize()
        };

        assert_eq!(make_hash(), make_hash());
    }

    #[test]
    fn test_hash_order_matters() {
        let hash1 = {
            let mut h = ViewHasher::new(b"test");
            h.update_u32(1);
            h.update_u32(2);
            h.finalize()
        };

        let hash2 = {
            let mut h = ViewHasher::new(b"test");
            h.update_u32(2);
            h.update_u32(1);
            h.finalize()
        };

        assert_ne!(hash1, hash2);
    }

    #[test]
    fn test_string_length_prefix() {
        let hash1 = {
            let mut h = ViewHasher::new(b"test");
            h.update_str("ab");
            h.update_str("c");
            h.finalize()
        };

        let hash2 = {
            let mut h = ViewHasher::new(b"test");
            h.update_str("a");
            h.update_str("bc");
            h.finalize()
        };

        assert_ne!(hash1, hash2);
    }

    #[test]
    fn test_domain_separation() {
        let mut a = ViewHasher::new(b"DOMAIN_A");
        let mut b = ViewHasher::new(b"DOMAIN_B");
        a.update_u32(1);
        b.update_u32(1);
        assert_ne!(a.finalize(), b.finalize());
    }
}
