use std::fmt::{self, Write};
use std::sync::Arc;

use sha2::{Digest, Sha256};

/// Uniquely identifies one cached call: the target service, the method, and
/// the values of every argument that participates in caching.
///
/// Two calls with equal method identity and equal serialized arguments
/// produce the same key; anything else differs (up to SHA-256 collisions).
#[derive(Debug, Clone, Eq)]
pub struct CacheKey {
    metadata: Arc<str>,
    hash: [u8; 32],
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in &self.hash[..8] {
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}

impl PartialEq for CacheKey {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash
    }
}

impl std::hash::Hash for CacheKey {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.hash.hash(state);
    }
}

impl CacheKey {
    /// Creates a [`CacheKeyBuilder`] seeded with the method's identity.
    pub fn builder(service: &str, method: &str) -> CacheKeyBuilder {
        let mut metadata = String::new();
        writeln!(metadata, "service: {service}").unwrap();
        writeln!(metadata, "method: {method}").unwrap();
        CacheKeyBuilder { metadata }
    }

    /// Returns the human-readable metadata this key was derived from.
    ///
    /// Useful for diagnostics; equality and hashing only ever consider the
    /// digest.
    pub fn metadata(&self) -> &str {
        &self.metadata
    }

    #[cfg(test)]
    pub fn for_testing(key: impl Into<String>) -> Self {
        CacheKeyBuilder {
            metadata: key.into(),
        }
        .build()
    }
}

/// A builder for [`CacheKey`]s.
///
/// This builder implements the [`Write`](std::fmt::Write) trait, and the
/// intention of it is to accept human readable, but most importantly
/// **stable**, input. This input is then hashed to form the [`CacheKey`],
/// and kept alongside it to help debugging.
pub struct CacheKeyBuilder {
    metadata: String,
}

impl CacheKeyBuilder {
    /// Writes one argument's canonical serialization into the key.
    ///
    /// Arguments are JSON values; `serde_json` renders object keys in sorted
    /// order, so semantically equal arguments serialize identically.
    pub fn write_argument(
        &mut self,
        name: &str,
        value: &serde_json::Value,
    ) -> Result<(), super::CacheError> {
        let serialized = serde_json::to_string(value)?;
        writeln!(self.metadata, "arg {name}: {serialized}").unwrap();
        Ok(())
    }

    /// Finalize the [`CacheKey`].
    pub fn build(self) -> CacheKey {
        let hash = Sha256::digest(&self.metadata);
        let hash = <[u8; 32]>::try_from(hash.as_slice()).expect("sha256 outputs 32 bytes");

        CacheKey {
            metadata: self.metadata.into(),
            hash,
        }
    }
}

impl fmt::Write for CacheKeyBuilder {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.metadata.write_str(s)
    }
}
