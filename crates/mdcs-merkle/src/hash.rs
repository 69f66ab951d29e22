//! Content identifiers for event blocks.
//!
//! A CID is the SHA-256 digest of a block's canonical bytes. Two payloads with
//! identical bytes always yield the same CID.

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Errors produced when parsing the string form of a CID.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CidParseError {
    #[error("invalid CID length: expected 64 hex chars, found {0}")]
    InvalidLength(usize),

    #[error("invalid hex in CID: {0}")]
    InvalidHex(String),
}

/// A 32-byte SHA-256 content identifier.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Cid([u8; 32]);

impl Cid {
    /// Create a CID from raw digest bytes.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Cid(bytes)
    }

    /// Get the underlying digest bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Compute the CID of a byte payload.
    pub fn digest(data: &[u8]) -> Self {
        Hasher::hash(data)
    }

    /// Convert to the lowercase hex string form.
    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{:02x}", b)).collect()
    }

    /// Parse the hex string form.
    pub fn parse(s: &str) -> Result<Self, CidParseError> {
        if s.len() != 64 {
            return Err(CidParseError::InvalidLength(s.len()));
        }
        // Lowercase only, so every CID has exactly one string form.
        if !s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f')) {
            return Err(CidParseError::InvalidHex(s.to_string()));
        }
        let mut bytes = [0u8; 32];
        for (i, chunk) in s.as_bytes().chunks(2).enumerate() {
            let hex_str =
                std::str::from_utf8(chunk).map_err(|_| CidParseError::InvalidHex(s.to_string()))?;
            bytes[i] = u8::from_str_radix(hex_str, 16)
                .map_err(|_| CidParseError::InvalidHex(s.to_string()))?;
        }
        Ok(Cid(bytes))
    }

    /// Truncated display (first 8 chars).
    pub fn short(&self) -> String {
        self.to_hex()[..8].to_string()
    }
}

impl fmt::Debug for Cid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Cid({}...)", self.short())
    }
}

impl fmt::Display for Cid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl FromStr for Cid {
    type Err = CidParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Cid::parse(s)
    }
}

impl Serialize for Cid {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Cid {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Cid::parse(&s).map_err(de::Error::custom)
    }
}

/// Hasher utility for computing content identifiers.
pub struct Hasher {
    inner: Sha256,
}

impl Hasher {
    pub fn new() -> Self {
        Hasher {
            inner: Sha256::new(),
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        self.inner.update(data);
    }

    pub fn finalize(self) -> Cid {
        let result = self.inner.finalize();
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&result);
        Cid(bytes)
    }

    /// Hash data directly.
    pub fn hash(data: &[u8]) -> Cid {
        let mut hasher = Self::new();
        hasher.update(data);
        hasher.finalize()
    }
}

impl Default for Hasher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digest_deterministic() {
        assert_eq!(Cid::digest(b"hello world"), Cid::digest(b"hello world"));
        assert_ne!(Cid::digest(b"hello"), Cid::digest(b"world"));
    }

    #[test]
    fn test_string_roundtrip() {
        let cid = Cid::digest(b"test data");
        let parsed: Cid = cid.to_string().parse().unwrap();
        assert_eq!(cid, parsed);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert_eq!(Cid::parse("abc"), Err(CidParseError::InvalidLength(3)));
        let bad = "zz".repeat(32);
        assert!(matches!(Cid::parse(&bad), Err(CidParseError::InvalidHex(_))));

        let upper = Cid::digest(b"x").to_hex().to_uppercase();
        assert!(matches!(Cid::parse(&upper), Err(CidParseError::InvalidHex(_))));
    }

    #[test]
    fn test_serde_as_string() {
        let cid = Cid::digest(b"x");
        let json = serde_json::to_string(&cid).unwrap();
        assert_eq!(json, format!("\"{}\"", cid));
        let back: Cid = serde_json::from_str(&json).unwrap();
        assert_eq!(back, cid);
    }
}
