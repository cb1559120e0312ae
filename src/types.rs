//! Core identifier types for the node
//!
//! Fixed-size byte newtypes shared by headers, transactions and the ledger.
//! All of them serialize as lowercase hex strings.

use crate::{Error, Result};
use blake2::{Blake2s256, Digest};
use num_bigint::BigUint;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

macro_rules! hex_bytes_type {
    ($name:ident, $len:expr, $what:expr) => {
        impl $name {
            /// Length in bytes
            pub const LEN: usize = $len;

            /// Create from a byte slice of exactly the right length
            pub fn from_slice(bytes: &[u8]) -> Result<Self> {
                let array: [u8; $len] = bytes.try_into().map_err(|_| {
                    Error::invalid_state(format!(
                        "{} must be {} bytes, got {}",
                        $what,
                        $len,
                        bytes.len()
                    ))
                })?;
                Ok(Self(array))
            }

            /// Get the raw bytes
            pub fn as_bytes(&self) -> &[u8; $len] {
                &self.0
            }

            /// Convert to hex string
            pub fn to_hex(&self) -> String {
                hex::encode(self.0)
            }
        }

        impl FromStr for $name {
            type Err = Error;

            fn from_str(s: &str) -> Result<Self> {
                let s = s.strip_prefix("0x").unwrap_or(s);
                let bytes = hex::decode(s)
                    .map_err(|e| Error::invalid_state(format!("Invalid {} hex: {}", $what, e)))?;
                Self::from_slice(&bytes)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.to_hex())
            }
        }

        impl Serialize for $name {
            fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
            where
                S: serde::Serializer,
            {
                serializer.serialize_str(&self.to_hex())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
            where
                D: serde::Deserializer<'de>,
            {
                let s = String::deserialize(deserializer)?;
                $name::from_str(&s).map_err(serde::de::Error::custom)
            }
        }
    };
}

/// 256-bit Blake2s digest
///
/// Ordering compares bytes lexicographically, which is the same as comparing
/// the digests as big-endian integers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Hash(pub [u8; 32]);

hex_bytes_type!(Hash, 32, "hash");

impl Hash {
    /// The all-zero hash, used as the genesis parent
    pub const ZERO: Hash = Hash([0u8; 32]);

    /// Hash arbitrary bytes with Blake2s-256
    pub fn digest(data: &[u8]) -> Self {
        let mut hasher = Blake2s256::new();
        hasher.update(data);
        Self(hasher.finalize().into())
    }

    /// Whether this is the zero hash
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }

    /// Interpret the digest as a big-endian unsigned integer
    pub fn to_biguint(&self) -> BigUint {
        BigUint::from_bytes_be(&self.0)
    }

    /// Short form for log output
    pub fn short(&self) -> String {
        hex::encode(&self.0[..6])
    }
}

/// 20-byte account address derived from a public key
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Address(pub [u8; 20]);

hex_bytes_type!(Address, 20, "address");

impl Address {
    /// Derive the address owned by a public key (last 20 bytes of its digest)
    pub fn from_public_key(key: &PublicKey) -> Self {
        let digest = Hash::digest(key.as_bytes());
        let mut bytes = [0u8; 20];
        bytes.copy_from_slice(&digest.0[12..]);
        Self(bytes)
    }
}

/// Ed25519 public key bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PublicKey(pub [u8; 32]);

hex_bytes_type!(PublicKey, 32, "public key");

impl PublicKey {
    /// Address controlled by this key
    pub fn address(&self) -> Address {
        Address::from_public_key(self)
    }
}

/// Ed25519 signature bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Signature(pub [u8; 64]);

hex_bytes_type!(Signature, 64, "signature");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_digest_deterministic() {
        let a = Hash::digest(b"interlink");
        let b = Hash::digest(b"interlink");
        assert_eq!(a, b);
        assert_ne!(a, Hash::digest(b"interlinK"));
        assert!(!a.is_zero());
        assert!(Hash::ZERO.is_zero());
    }

    #[test]
    fn test_hash_ordering_is_numeric() {
        let mut low = [0u8; 32];
        low[31] = 0xff;
        let mut high = [0u8; 32];
        high[0] = 0x01;

        assert!(Hash(low) < Hash(high));
        assert!(Hash(low).to_biguint() < Hash(high).to_biguint());
    }

    #[test]
    fn test_hex_roundtrip_and_errors() {
        let hash = Hash::digest(b"x");
        let parsed: Hash = hash.to_hex().parse().unwrap();
        assert_eq!(parsed, hash);

        let prefixed: Hash = format!("0x{}", hash).parse().unwrap();
        assert_eq!(prefixed, hash);

        assert!("abcd".parse::<Hash>().is_err());
        assert!("zz".parse::<Address>().is_err());
    }

    #[test]
    fn test_address_from_public_key() {
        let key = PublicKey([7u8; 32]);
        let address = key.address();
        assert_eq!(address, Address::from_public_key(&key));
        assert_eq!(&address.0[..], &Hash::digest(&[7u8; 32]).0[12..]);
    }

    #[test]
    fn test_serde_as_hex_string() {
        let address = Address([0xab; 20]);
        let json = serde_json::to_string(&address).unwrap();
        assert_eq!(json, format!("\"{}\"", "ab".repeat(20)));
        let back: Address = serde_json::from_str(&json).unwrap();
        assert_eq!(back, address);
    }
}
