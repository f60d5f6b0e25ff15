//! Rate-limit identity and fingerprinting.

use sha2::{Digest, Sha256};

/// Identity of one rate-limit budget: who is being limited, over which
/// window, with which ceiling.
///
/// Two requests with the same tuple consume the same budget; the
/// [`fingerprint`](RatelimitIdentifier::fingerprint) is the deterministic
/// hash the cluster shards on.
#[derive(Clone, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct RatelimitIdentifier {
    /// Grouping namespace (e.g. an API surface or workspace).
    pub namespace: String,
    /// The limited subject within the namespace (e.g. a key id).
    pub identifier: String,
    /// Window length in milliseconds.
    pub duration_ms: i64,
    /// Maximum cost admitted per sliding window.
    pub limit: i64,
}

impl RatelimitIdentifier {
    /// Creates an identifier.
    #[must_use]
    pub fn new(
        namespace: impl Into<String>,
        identifier: impl Into<String>,
        duration_ms: i64,
        limit: i64,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            identifier: identifier.into(),
            duration_ms,
            limit,
        }
    }

    /// Returns the deterministic 64-bit fingerprint of this tuple.
    ///
    /// Stable across platforms and process restarts; every node computes
    /// the same fingerprint for the same tuple, which is what makes ring
    /// routing consistent. Fields are length-delimited so distinct tuples
    /// cannot collide by concatenation.
    #[must_use]
    pub fn fingerprint(&self) -> u64 {
        let mut hasher = Sha256::new();
        hasher.update((self.namespace.len() as u64).to_be_bytes());
        hasher.update(self.namespace.as_bytes());
        hasher.update((self.identifier.len() as u64).to_be_bytes());
        hasher.update(self.identifier.as_bytes());
        hasher.update(self.duration_ms.to_be_bytes());
        hasher.update(self.limit.to_be_bytes());
        let digest = hasher.finalize();
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&digest[..8]);
        u64::from_be_bytes(bytes)
    }

    /// Returns the fingerprint as the hex routing key used on the ring.
    #[must_use]
    pub fn routing_key(&self) -> String {
        format!("{:016x}", self.fingerprint())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_is_deterministic() {
        let a = RatelimitIdentifier::new("api", "key_1", 1_000, 100);
        let b = RatelimitIdentifier::new("api", "key_1", 1_000, 100);
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn fingerprint_depends_on_every_field() {
        let base = RatelimitIdentifier::new("api", "key_1", 1_000, 100);
        let variants = [
            RatelimitIdentifier::new("web", "key_1", 1_000, 100),
            RatelimitIdentifier::new("api", "key_2", 1_000, 100),
            RatelimitIdentifier::new("api", "key_1", 2_000, 100),
            RatelimitIdentifier::new("api", "key_1", 1_000, 50),
        ];
        for variant in variants {
            assert_ne!(base.fingerprint(), variant.fingerprint(), "{variant:?}");
        }
    }

    #[test]
    fn concatenation_ambiguity_does_not_collide() {
        let a = RatelimitIdentifier::new("ab", "c", 1_000, 10);
        let b = RatelimitIdentifier::new("a", "bc", 1_000, 10);
        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn routing_key_is_fixed_width_hex() {
        let id = RatelimitIdentifier::new("api", "key_1", 1_000, 100);
        let key = id.routing_key();
        assert_eq!(key.len(), 16);
        assert!(key.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
