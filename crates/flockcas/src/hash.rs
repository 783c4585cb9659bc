//! ContentHash: BLAKE3 truncated to 128 bits (32 hex chars).
//!
//! 128 bits keeps CIDs short enough to pass around in headers and wire
//! messages while retaining collision resistance for content addressing.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// A content identifier - 128 bits of BLAKE3 as lowercase hex.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentHash(String);

#[derive(Debug, Error)]
pub enum HashError {
    #[error("invalid cid length: expected 32 hex chars, got {0}")]
    InvalidLength(usize),

    #[error("invalid hex character in cid")]
    InvalidHex,
}

impl ContentHash {
    /// Hash data and return its CID.
    pub fn from_data(data: &[u8]) -> Self {
        let hash = blake3::hash(data);
        Self(hex::encode(&hash.as_bytes()[..16]))
    }

    /// Parse an existing CID string, validating the format.
    pub fn from_str_checked(s: &str) -> Result<Self, HashError> {
        if s.len() != 32 {
            return Err(HashError::InvalidLength(s.len()));
        }
        if !s.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(HashError::InvalidHex);
        }
        Ok(Self(s.to_lowercase()))
    }

    /// First 2 chars, used for directory sharding.
    pub fn prefix(&self) -> &str {
        &self.0[0..2]
    }

    /// Remainder after the prefix, used as the object filename.
    pub fn remainder(&self) -> &str {
        &self.0[2..]
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ContentHash {
    type Err = HashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_str_checked(s)
    }
}

impl AsRef<str> for ContentHash {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn produces_32_hex_chars() {
        let hash = ContentHash::from_data(b"payload");
        assert_eq!(hash.as_str().len(), 32);
        assert!(hash.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn deterministic() {
        assert_eq!(
            ContentHash::from_data(b"same bytes"),
            ContentHash::from_data(b"same bytes")
        );
        assert_ne!(
            ContentHash::from_data(b"bytes a"),
            ContentHash::from_data(b"bytes b")
        );
    }

    #[test]
    fn prefix_and_remainder_reassemble() {
        let hash = ContentHash::from_data(b"shard me");
        assert_eq!(hash.prefix().len(), 2);
        assert_eq!(
            format!("{}{}", hash.prefix(), hash.remainder()),
            hash.as_str()
        );
    }

    #[test]
    fn parse_validates() {
        assert!("abcdef01234567890123456789abcdef"
            .parse::<ContentHash>()
            .is_ok());
        assert!(matches!(
            "short".parse::<ContentHash>(),
            Err(HashError::InvalidLength(5))
        ));
        assert!(matches!(
            "zzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzz".parse::<ContentHash>(),
            Err(HashError::InvalidHex)
        ));
    }
}
