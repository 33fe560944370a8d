//! Object identifiers.

use crate::{GitError, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha1::{Digest, Sha1};
use std::fmt;

/// A 20-byte SHA-1 object identifier.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Oid([u8; 20]);

impl Oid {
    /// The all-zero OID used by the wire protocol for absent refs.
    pub const ZERO: Oid = Oid([0u8; 20]);

    /// Creates an Oid from raw bytes.
    pub fn from_bytes(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    /// Parses a 40-char lowercase hex string.
    pub fn from_hex(hex_str: &str) -> Result<Self> {
        if hex_str.len() != 40 {
            return Err(GitError::InvalidObject(format!(
                "invalid oid length: {}",
                hex_str.len()
            )));
        }
        let mut bytes = [0u8; 20];
        hex::decode_to_slice(hex_str, &mut bytes)
            .map_err(|e| GitError::InvalidObject(format!("invalid oid: {}", e)))?;
        Ok(Self(bytes))
    }

    /// Returns the raw bytes.
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// Returns the 40-char hex representation.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Returns true if this is the all-zero OID.
    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }

    /// Hashes object content with its git header: `SHA1("<type> <len>\0" || data)`.
    pub fn hash_object(kind: crate::ObjectKind, data: &[u8]) -> Self {
        let mut hasher = Sha1::new();
        hasher.update(format!("{} {}\0", kind.as_str(), data.len()).as_bytes());
        hasher.update(data);
        let digest = hasher.finalize();
        let mut bytes = [0u8; 20];
        bytes.copy_from_slice(&digest);
        Self(bytes)
    }
}

impl fmt::Debug for Oid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Oid({})", self.to_hex())
    }
}

impl fmt::Display for Oid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl Serialize for Oid {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Oid {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Oid::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_roundtrip() {
        let hex_str = "a94a8fe5ccb19ba61c4c0873d391e987982fbbd3";
        let oid = Oid::from_hex(hex_str).unwrap();
        assert_eq!(oid.to_hex(), hex_str);
    }

    #[test]
    fn zero_oid_is_forty_zeros() {
        assert_eq!(Oid::ZERO.to_hex(), "0".repeat(40));
        assert!(Oid::ZERO.is_zero());
        assert!(!Oid::from_bytes([1u8; 20]).is_zero());
    }

    #[test]
    fn rejects_bad_lengths_and_chars() {
        assert!(Oid::from_hex("abc").is_err());
        assert!(Oid::from_hex(&"a".repeat(41)).is_err());
        assert!(Oid::from_hex(&"z".repeat(40)).is_err());
    }

    #[test]
    fn serde_as_hex_string() {
        let oid = Oid::from_bytes([0xab; 20]);
        let json = serde_json::to_string(&oid).unwrap();
        assert_eq!(json, format!("\"{}\"", "ab".repeat(20)));
        let back: Oid = serde_json::from_str(&json).unwrap();
        assert_eq!(back, oid);
    }
}
