//! # Version Token Codec
//!
//! Converts the server-assigned row version marker between its wire form
//! (base64 text) and its local form (fixed-width bytes).
//!
//! ## Token Forms
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Version Token Forms                               │
//! │                                                                         │
//! │  WIRE (JSON)            LOCAL (SQLite BLOB)         MEANING             │
//! │  ─────────────          ───────────────────         ───────             │
//! │  ""                     x''  (zero length)          no local copy       │
//! │  "AAAAAAAAB9E="         00 00 00 00 00 00 07 D1     rowversion 2001     │
//! │  "garbage!"             x''  (sentinel)             decode fallback     │
//! │                                                                         │
//! │  ORDERING: tokens compare as big-endian bytes, which is exactly how    │
//! │  SQLite compares BLOBs (memcmp). The sentinel sorts before everything. │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Failure Policy
//! [`VersionToken::decode`] never fails. Malformed, empty or absent input
//! yields [`VersionToken::EMPTY`], so a table that was never synced still
//! produces a valid "fetch everything" cursor.

use std::fmt;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::TokenError;

/// Width of a version token in bytes (server rowversion).
pub const TOKEN_LEN: usize = 8;

// =============================================================================
// Version Token
// =============================================================================

/// Opaque, totally ordered, server-assigned row version.
///
/// `None` inside is the sentinel ("no local copy"); it is the minimum value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VersionToken(Option<[u8; TOKEN_LEN]>);

impl VersionToken {
    /// The sentinel token: requests a full table fetch.
    pub const EMPTY: VersionToken = VersionToken(None);

    /// Creates a token from a big-endian integer.
    pub const fn from_u64(value: u64) -> Self {
        VersionToken(Some(value.to_be_bytes()))
    }

    /// Creates a token from its local byte form.
    ///
    /// Zero bytes is the sentinel; anything other than [`TOKEN_LEN`] bytes
    /// is rejected.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, TokenError> {
        if bytes.is_empty() {
            return Ok(Self::EMPTY);
        }

        let fixed: [u8; TOKEN_LEN] = bytes.try_into().map_err(|_| TokenError::InvalidLength {
            expected: TOKEN_LEN,
            actual: bytes.len(),
        })?;

        Ok(VersionToken(Some(fixed)))
    }

    /// Returns the local byte form (empty slice for the sentinel).
    pub fn as_bytes(&self) -> &[u8] {
        match &self.0 {
            Some(bytes) => bytes,
            None => &[],
        }
    }

    /// Returns true if this is the sentinel token.
    pub const fn is_empty(&self) -> bool {
        self.0.is_none()
    }

    /// Returns the token as a big-endian integer (0 for the sentinel).
    pub fn as_u64(&self) -> u64 {
        self.0.map(u64::from_be_bytes).unwrap_or(0)
    }

    /// Encodes the token as wire text. The sentinel encodes to `""`.
    pub fn encode(&self) -> String {
        match &self.0 {
            Some(bytes) => STANDARD.encode(bytes),
            None => String::new(),
        }
    }

    /// Strictly decodes wire text.
    ///
    /// ## Returns
    /// * `Ok(EMPTY)` for `""`
    /// * `Ok(token)` for base64 of exactly [`TOKEN_LEN`] bytes
    /// * `Err(TokenError)` for anything else
    pub fn try_decode(text: &str) -> Result<Self, TokenError> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(Self::EMPTY);
        }

        let bytes = STANDARD
            .decode(text)
            .map_err(|e| TokenError::InvalidBase64(e.to_string()))?;

        Self::from_bytes(&bytes)
    }

    /// Decodes wire text, falling back to the sentinel on any problem.
    ///
    /// ## Example
    /// ```rust
    /// use strata_core::token::VersionToken;
    ///
    /// assert_eq!(VersionToken::decode(None), VersionToken::EMPTY);
    /// assert_eq!(VersionToken::decode(Some("")), VersionToken::EMPTY);
    /// assert_eq!(VersionToken::decode(Some("not base64")), VersionToken::EMPTY);
    ///
    /// let token = VersionToken::from_u64(42);
    /// assert_eq!(VersionToken::decode(Some(&token.encode())), token);
    /// ```
    pub fn decode(text: Option<&str>) -> Self {
        text.and_then(|t| Self::try_decode(t).ok())
            .unwrap_or(Self::EMPTY)
    }
}

impl fmt::Display for VersionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            write!(f, "<empty>")
        } else {
            write!(f, "{}", self.encode())
        }
    }
}

/// Tokens serialize as their wire text.
impl Serialize for VersionToken {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.encode())
    }
}

/// Deserialization is lenient: null or malformed text becomes the sentinel.
impl<'de> Deserialize<'de> for VersionToken {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text: Option<String> = Option::deserialize(deserializer)?;
        Ok(VersionToken::decode(text.as_deref()))
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        for value in [1u64, 255, 2001, 0x0102_0304_0506_0708, u64::MAX] {
            let token = VersionToken::from_u64(value);
            assert_eq!(VersionToken::decode(Some(&token.encode())), token);
            assert_eq!(VersionToken::try_decode(&token.encode()), Ok(token));
        }

        // All-zero bytes are a real token, distinct from the sentinel
        let zero = VersionToken::from_bytes(&[0; TOKEN_LEN]).unwrap();
        assert!(!zero.is_empty());
        assert_eq!(VersionToken::decode(Some(&zero.encode())), zero);
    }

    #[test]
    fn test_empty_and_null_give_same_sentinel() {
        let from_empty = VersionToken::decode(Some(""));
        let from_null = VersionToken::decode(None);
        assert_eq!(from_empty, from_null);
        assert!(from_empty.is_empty());
        assert_eq!(from_empty.encode(), "");
    }

    #[test]
    fn test_malformed_falls_back() {
        assert_eq!(VersionToken::decode(Some("%%%")), VersionToken::EMPTY);
        // Valid base64 but wrong width
        assert_eq!(VersionToken::decode(Some("AQID")), VersionToken::EMPTY);

        assert!(matches!(
            VersionToken::try_decode("AQID"),
            Err(TokenError::InvalidLength { expected: 8, actual: 3 })
        ));
        assert!(matches!(
            VersionToken::try_decode("%%%"),
            Err(TokenError::InvalidBase64(_))
        ));
    }

    #[test]
    fn test_known_encoding() {
        let token = VersionToken::from_u64(2001);
        assert_eq!(token.encode(), "AAAAAAAAB9E=");
        assert_eq!(token.as_bytes(), &[0, 0, 0, 0, 0, 0, 0x07, 0xD1]);
    }

    #[test]
    fn test_ordering() {
        let a = VersionToken::from_u64(5);
        let b = VersionToken::from_u64(7);
        let c = VersionToken::from_u64(256);
        assert!(VersionToken::EMPTY < a);
        assert!(a < b);
        assert!(b < c);
        // Byte order agrees with integer order
        assert!(b.as_bytes() < c.as_bytes());
    }

    #[test]
    fn test_serde_is_wire_text() {
        let token = VersionToken::from_u64(2001);
        let json = serde_json::to_string(&token).unwrap();
        assert_eq!(json, "\"AAAAAAAAB9E=\"");

        let parsed: VersionToken = serde_json::from_str("null").unwrap();
        assert!(parsed.is_empty());

        let parsed: VersionToken = serde_json::from_str("\"###\"").unwrap();
        assert!(parsed.is_empty());
    }
}
