//! Content addresses for stored blocks.
//!
//! An [`Address`] is the SHA-256 hash of a block's bytes. The core treats it
//! as an opaque, totally ordered identifier; it is rendered as a `base64_url`
//! string wherever it crosses a text boundary (logs, JSON, descriptors
//! displayed to users).

use fixed_hash::construct_fixed_hash;
use openssl::sha;
use serde::{de::Error as _, Deserialize, Deserializer, Serialize, Serializer};

construct_fixed_hash! {
    /// 32 byte content hash that addresses a stored block.
    pub struct Address(32);
}

impl Address {
    /// Computes the content address of `bytes` by SHA-256 hashing them.
    pub fn of(bytes: &[u8]) -> Self {
        Address(sha::sha256(bytes))
    }

    /// Encodes the address as a `base64_url` string.
    pub fn to_base64(&self) -> String {
        base64_url::encode(self.as_bytes())
    }

    /// Decodes an address from a `base64_url` encoded string.
    pub fn from_base64(encoded: &str) -> Result<Self, String> {
        let bytes = base64_url::decode(encoded).map_err(|e| e.to_string())?;
        if bytes.len() != 32 {
            return Err(format!("length mismatch 32 - {encoded}"));
        }
        Ok(Address::from_slice(&bytes))
    }
}

impl Serialize for Address {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.to_base64().as_str())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s: String = Deserialize::deserialize(deserializer)?;
        Address::from_base64(&s).map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_is_deterministic_in_bytes() {
        let a = Address::of(b"the same bytes");
        let b = Address::of(b"the same bytes");
        let c = Address::of(b"different bytes");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn base64_round_trip() {
        let addr = Address::of(b"some block");
        let encoded = addr.to_base64();
        let decoded = Address::from_base64(&encoded).unwrap();
        assert_eq!(addr, decoded);
    }

    #[test]
    fn base64_rejects_wrong_length() {
        let encoded = base64_url::encode(b"short");
        assert!(Address::from_base64(&encoded).is_err());
    }

    #[test]
    fn addresses_are_totally_ordered() {
        let mut addrs = vec![
            Address::of(b"c"),
            Address::of(b"a"),
            Address::of(b"b"),
        ];
        addrs.sort();
        assert!(addrs[0] < addrs[1] && addrs[1] < addrs[2]);
    }

    #[test]
    fn serde_uses_base64_url_strings() {
        let addr = Address::of(b"serialized");
        let json = serde_json::to_string(&addr).unwrap();
        assert_eq!(json, format!("\"{}\"", addr.to_base64()));
        let back: Address = serde_json::from_str(&json).unwrap();
        assert_eq!(addr, back);
    }
}
