//! Signing and key management
//!
//! Ed25519 keys identify ledger participants. Each participant of a
//! transaction signs the transaction hash with its own key.

use crate::types::{Address, PublicKey, Signature};
use crate::{Error, Result};
use ed25519_dalek::{Signer, SigningKey, Verifier, VerifyingKey};

/// Ed25519 key pair for a ledger participant
#[derive(Clone)]
pub struct Keypair {
    signing: SigningKey,
}

impl Keypair {
    /// Generate a new random key pair from the OS entropy source
    pub fn generate() -> Result<Self> {
        let mut secret = [0u8; 32];
        getrandom::fill(&mut secret)
            .map_err(|e| Error::crypto(format!("Failed to gather entropy: {}", e)))?;
        Ok(Self::from_secret(secret))
    }

    /// Build a key pair from a 32-byte secret
    pub fn from_secret(secret: [u8; 32]) -> Self {
        Self {
            signing: SigningKey::from_bytes(&secret),
        }
    }

    /// Parse a hex-encoded secret key
    pub fn from_secret_hex(hex_str: &str) -> Result<Self> {
        let bytes = hex::decode(hex_str)
            .map_err(|e| Error::crypto(format!("Invalid secret key hex: {}", e)))?;
        let secret: [u8; 32] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| Error::crypto("Secret key must be 32 bytes"))?;
        Ok(Self::from_secret(secret))
    }

    /// Hex-encoded secret key
    pub fn secret_hex(&self) -> String {
        hex::encode(self.signing.to_bytes())
    }

    /// Public half of the pair
    pub fn public_key(&self) -> PublicKey {
        PublicKey(self.signing.verifying_key().to_bytes())
    }

    /// Address owned by this key pair
    pub fn address(&self) -> Address {
        self.public_key().address()
    }

    /// Sign a message
    pub fn sign(&self, message: &[u8]) -> Signature {
        Signature(self.signing.sign(message).to_bytes())
    }
}

impl std::fmt::Debug for Keypair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Keypair")
            .field("public_key", &self.public_key())
            .finish_non_exhaustive()
    }
}

/// Verify a signature over `message` by `public_key`
pub fn verify(public_key: &PublicKey, message: &[u8], signature: &Signature) -> bool {
    let Ok(key) = VerifyingKey::from_bytes(public_key.as_bytes()) else {
        return false;
    };
    let signature = ed25519_dalek::Signature::from_bytes(signature.as_bytes());
    key.verify(message, &signature).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_and_verify() {
        let keypair = Keypair::generate().unwrap();
        let signature = keypair.sign(b"block");

        assert!(verify(&keypair.public_key(), b"block", &signature));
        assert!(!verify(&keypair.public_key(), b"other", &signature));
    }

    #[test]
    fn test_wrong_key_rejected() {
        let alice = Keypair::from_secret([1u8; 32]);
        let bob = Keypair::from_secret([2u8; 32]);
        let signature = alice.sign(b"payload");

        assert!(!verify(&bob.public_key(), b"payload", &signature));
    }

    #[test]
    fn test_secret_hex_roundtrip() {
        let keypair = Keypair::from_secret([9u8; 32]);
        let restored = Keypair::from_secret_hex(&keypair.secret_hex()).unwrap();
        assert_eq!(restored.public_key(), keypair.public_key());
        assert_eq!(restored.address(), keypair.address());

        assert!(Keypair::from_secret_hex("abcd").is_err());
    }
}
