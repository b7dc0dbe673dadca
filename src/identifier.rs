//! Identifier model: transaction IDs and ArNS names addressed by `ar://`.

use data_encoding::{BASE32_NOPAD, BASE64URL_NOPAD};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{Result, WayfinderError};

/// A 43-character base64url transaction ID, stored decoded as 32 raw bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TxId([u8; 32]);

impl TxId {
    /// Decode a 43-character base64url string into a `TxId`.
    pub fn parse(s: &str) -> Result<Self> {
        if !TXID_RE.is_match(s) {
            return Err(WayfinderError::ParseError {
                input: s.to_string(),
                reason: "expected a 43-character base64url transaction id".into(),
            });
        }
        let bytes = BASE64URL_NOPAD.decode(s.as_bytes()).map_err(|e| WayfinderError::ParseError {
            input: s.to_string(),
            reason: format!("invalid base64url: {e}"),
        })?;
        let arr: [u8; 32] = bytes.as_slice().try_into().map_err(|_| WayfinderError::ParseError {
            input: s.to_string(),
            reason: "decoded transaction id is not 32 bytes".into(),
        })?;
        Ok(Self(arr))
    }

    /// Construct directly from already-decoded raw bytes.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// The raw 32-byte value.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Re-encode as the canonical 43-character base64url string.
    pub fn to_b64url(&self) -> String {
        BASE64URL_NOPAD.encode(&self.0)
    }

    /// The sandbox subdomain label: base32 of the 32 raw bytes, no padding, lowercase.
    ///
    /// This yields a 52-character DNS label used so that every transaction id
    /// gets a unique origin under a given gateway.
    pub fn sandbox_subdomain(&self) -> String {
        BASE32_NOPAD.encode(&self.0).to_lowercase()
    }
}

impl std::fmt::Display for TxId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_b64url())
    }
}

/// A human-readable ArNS label: `^[a-z0-9_-]{1,51}$`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArnsName(String);

impl ArnsName {
    /// Validate and construct an `ArnsName` from an already-lowercased label.
    pub fn parse(s: &str) -> Result<Self> {
        let lower = s.to_lowercase();
        if !ARNS_RE.is_match(&lower) {
            return Err(WayfinderError::ParseError {
                input: s.to_string(),
                reason: "expected a 1-51 character label matching ^[a-z0-9_-]+$".into(),
            });
        }
        Ok(Self(lower))
    }

    /// The label text.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ArnsName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// An `ar://` identifier: either a transaction id or an ArNS name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identifier {
    /// A 43-char base64url transaction id.
    TxId(TxId),
    /// A human-readable ArNS label.
    ArnsName(ArnsName),
}

impl std::fmt::Display for Identifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TxId(id) => id.fmt(f),
            Self::ArnsName(name) => name.fmt(f),
        }
    }
}

static TXID_RE_SRC: &str = r"^[A-Za-z0-9_-]{43}$";
static ARNS_RE_SRC: &str = r"^[a-z0-9_-]{1,51}$";

static TXID_RE: Lazy<Regex> = Lazy::new(|| Regex::new(TXID_RE_SRC).unwrap());
static ARNS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(ARNS_RE_SRC).unwrap());

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn txid_round_trips_through_b64url() {
        let raw = [7u8; 32];
        let b64 = BASE64URL_NOPAD.encode(&raw);
        let id = TxId::parse(&b64).expect("valid txid");
        assert_eq!(id.as_bytes(), &raw);
        assert_eq!(id.to_b64url(), b64);
    }

    #[test]
    fn txid_rejects_wrong_length() {
        assert!(TxId::parse("short").is_err());
    }

    #[test]
    fn sandbox_subdomain_is_lowercase_base32_without_padding() {
        let raw = [0u8; 32];
        let b64 = BASE64URL_NOPAD.encode(&raw);
        let id = TxId::parse(&b64).unwrap();
        let sub = id.sandbox_subdomain();
        assert!(sub.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
        assert!(!sub.contains('='));
    }

    #[test]
    fn arns_name_lowercases_input() {
        let name = ArnsName::parse("ArDrive").unwrap();
        assert_eq!(name.as_str(), "ardrive");
    }

    #[test]
    fn arns_name_rejects_invalid_chars() {
        assert!(ArnsName::parse("not a name!").is_err());
    }

    #[test]
    fn arns_name_rejects_too_long() {
        let too_long = "a".repeat(52);
        assert!(ArnsName::parse(&too_long).is_err());
    }
}
