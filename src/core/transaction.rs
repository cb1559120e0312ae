//! Multi-party transactions
//!
//! A transaction rewrites the state of every participant at once. For each
//! participant it carries the post-nonce, the post-balance and the hash of the
//! participant's previous transaction. Every participant signs the
//! transaction hash, which covers everything except the signatures.

use crate::crypto::{self, Keypair};
use crate::error::ValidationError;
use crate::types::{Address, Hash, PublicKey, Signature};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Post-state of one participant as proposed by a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParticipantState {
    /// Participant key
    pub public_key: PublicKey,
    /// Nonce after the transaction
    pub nonce: u64,
    /// Balance after the transaction
    pub value: u64,
    /// Hash of the participant's previous transaction
    pub prev_tx_hash: Hash,
}

/// Transaction binding one or more participants
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// Participant public keys
    pub participants: Vec<PublicKey>,
    /// Post-nonce per participant
    pub nonces: Vec<u64>,
    /// Post-balance per participant
    pub values: Vec<u64>,
    /// Previous transaction hash per participant
    pub prev_tx_hashes: Vec<Hash>,
    /// Opaque application data
    #[serde(with = "hex_payload")]
    pub payload: Vec<u8>,
    /// One signature slot per participant
    pub signatures: Vec<Option<Signature>>,
}

impl Transaction {
    /// Create an unsigned transaction from participant post-states
    pub fn new(states: &[ParticipantState], payload: Vec<u8>) -> Self {
        Self {
            participants: states.iter().map(|s| s.public_key).collect(),
            nonces: states.iter().map(|s| s.nonce).collect(),
            values: states.iter().map(|s| s.value).collect(),
            prev_tx_hashes: states.iter().map(|s| s.prev_tx_hash).collect(),
            payload,
            signatures: vec![None; states.len()],
        }
    }

    /// Transaction hash, excluding signatures
    pub fn hash(&self) -> Hash {
        let mut buf = Vec::with_capacity(8 + self.participants.len() * 80 + self.payload.len() + 8);
        buf.extend_from_slice(&(self.participants.len() as u64).to_le_bytes());
        for i in 0..self.participants.len() {
            buf.extend_from_slice(self.participants[i].as_bytes());
            buf.extend_from_slice(&self.nonces.get(i).copied().unwrap_or_default().to_le_bytes());
            buf.extend_from_slice(&self.values.get(i).copied().unwrap_or_default().to_le_bytes());
            let prev = self.prev_tx_hashes.get(i).copied().unwrap_or_default();
            buf.extend_from_slice(prev.as_bytes());
        }
        buf.extend_from_slice(&(self.payload.len() as u64).to_le_bytes());
        buf.extend_from_slice(&self.payload);
        Hash::digest(&buf)
    }

    /// Fill the signature slot belonging to `keypair`
    pub fn sign(&mut self, keypair: &Keypair) -> Result<()> {
        let public_key = keypair.public_key();
        let index = self
            .participants
            .iter()
            .position(|p| *p == public_key)
            .ok_or_else(|| Error::crypto(format!("{} is not a participant", public_key)))?;

        let signature = keypair.sign(self.hash().as_bytes());
        match self.signatures.get_mut(index) {
            Some(slot) => {
                *slot = Some(signature);
                Ok(())
            }
            None => Err(Error::crypto("Signature slots do not match participants")),
        }
    }

    /// Number of participants
    pub fn len(&self) -> usize {
        self.participants.len()
    }

    /// Whether the transaction binds no participants
    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }

    /// Addresses of all participants, in order
    pub fn addresses(&self) -> Vec<Address> {
        self.participants.iter().map(PublicKey::address).collect()
    }

    /// Sum of post-balances
    pub fn post_balance_sum(&self) -> u128 {
        self.values.iter().map(|v| u128::from(*v)).sum()
    }

    /// Check the shape: non-empty, parallel fields of equal length, no repeats
    pub fn check_well_formed(&self) -> std::result::Result<(), ValidationError> {
        let n = self.participants.len();
        if n == 0
            || self.nonces.len() != n
            || self.values.len() != n
            || self.prev_tx_hashes.len() != n
            || self.signatures.len() != n
        {
            return Err(ValidationError::MalformedTransaction);
        }

        let mut seen = HashSet::with_capacity(n);
        if !self.participants.iter().all(|p| seen.insert(*p)) {
            return Err(ValidationError::MalformedTransaction);
        }
        Ok(())
    }

    /// Every participant must have signed the transaction hash
    pub fn verify_signatures(&self) -> std::result::Result<(), ValidationError> {
        let message = self.hash();
        for (key, signature) in self.participants.iter().zip(&self.signatures) {
            match signature {
                Some(sig) if crypto::verify(key, message.as_bytes(), sig) => {}
                _ => return Err(ValidationError::InvalidSender),
            }
        }
        Ok(())
    }
}

/// Digest committing to an ordered list of transactions
pub fn tx_root(transactions: &[Transaction]) -> Hash {
    let mut buf = Vec::with_capacity(transactions.len() * 32);
    for tx in transactions {
        buf.extend_from_slice(tx.hash().as_bytes());
    }
    Hash::digest(&buf)
}

mod hex_payload {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        hex::decode(s).map_err(serde::de::Error::custom)
    }
}
