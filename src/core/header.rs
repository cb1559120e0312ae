//! Block header, interlink vector and the canonical header encoding

use crate::core::INTERLINK_LEVELS;
use crate::types::{Address, Hash};
use byteorder::{ByteOrder, LittleEndian};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Size of the canonical header encoding in bytes
pub const HEADER_ENCODED_LEN: usize = 32 + 8 + 8 + 8 + 20 + 32 + 32 + INTERLINK_LEVELS * 8 + 8;

/// Offset of the nonce inside the encoding (the last 8 bytes)
pub const NONCE_OFFSET: usize = HEADER_ENCODED_LEN - 8;

/// Per-level index of the most recent superblock ancestor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Interlink(pub [u64; INTERLINK_LEVELS]);

impl Interlink {
    /// The all-zero interlink carried by genesis
    pub const ZERO: Interlink = Interlink([0u64; INTERLINK_LEVELS]);

    /// Iterate over the levels in order
    pub fn iter(&self) -> impl Iterator<Item = &u64> {
        self.0.iter()
    }

    /// Distinct referenced block numbers in ascending order
    pub fn unique(&self) -> Vec<u64> {
        let mut numbers = self.0.to_vec();
        numbers.sort_unstable();
        numbers.dedup();
        numbers
    }

    /// Whether some level points at `number`
    pub fn references(&self, number: u64) -> bool {
        self.0.contains(&number)
    }
}

impl fmt::Display for Interlink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, number) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{}", number)?;
        }
        write!(f, "}}")
    }
}

/// Block header
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    /// Hash of the parent header
    pub parent_hash: Hash,
    /// Height of the block, genesis is 0
    pub number: u64,
    /// Unix timestamp in seconds
    pub time: u64,
    /// Proof-of-work nonce
    pub nonce: u64,
    /// Difficulty the miner targeted
    pub difficulty: u64,
    /// Beneficiary of the block
    pub coinbase: Address,
    /// Ledger commitment
    pub state_root: Hash,
    /// Digest of the block's transactions
    pub tx_root: Hash,
    /// Superblock index
    pub interlink: Interlink,
}

impl Header {
    /// The fixed genesis header
    pub fn genesis() -> Self {
        Self {
            parent_hash: Hash::ZERO,
            number: 0,
            time: 0,
            nonce: 0,
            difficulty: 0,
            coinbase: Address::default(),
            state_root: Hash::ZERO,
            tx_root: crate::core::tx_root(&[]),
            interlink: Interlink::ZERO,
        }
    }

    /// Canonical encoding hashed by [`Header::hash`]
    ///
    /// Field order is fixed and integers are little-endian. The nonce sits in
    /// the last 8 bytes so the miner can patch it in place.
    pub fn encode(&self) -> [u8; HEADER_ENCODED_LEN] {
        let mut buf = [0u8; HEADER_ENCODED_LEN];
        let mut offset = 0;

        buf[offset..offset + 32].copy_from_slice(self.parent_hash.as_bytes());
        offset += 32;
        LittleEndian::write_u64(&mut buf[offset..offset + 8], self.number);
        offset += 8;
        LittleEndian::write_u64(&mut buf[offset..offset + 8], self.time);
        offset += 8;
        LittleEndian::write_u64(&mut buf[offset..offset + 8], self.difficulty);
        offset += 8;
        buf[offset..offset + 20].copy_from_slice(self.coinbase.as_bytes());
        offset += 20;
        buf[offset..offset + 32].copy_from_slice(self.state_root.as_bytes());
        offset += 32;
        buf[offset..offset + 32].copy_from_slice(self.tx_root.as_bytes());
        offset += 32;
        LittleEndian::write_u64_into(&self.interlink.0, &mut buf[offset..offset + INTERLINK_LEVELS * 8]);
        offset += INTERLINK_LEVELS * 8;
        debug_assert_eq!(offset, NONCE_OFFSET);
        LittleEndian::write_u64(&mut buf[NONCE_OFFSET..], self.nonce);

        buf
    }

    /// Header hash, a pure function of every field
    pub fn hash(&self) -> Hash {
        Hash::digest(&self.encode())
    }

    /// Distinct block numbers referenced by the interlink, ascending
    pub fn unique_interlink(&self) -> Vec<u64> {
        self.interlink.unique()
    }
}

/// Patch `nonce` into an encoded header and hash it
#[inline]
pub fn hash_encoded_with_nonce(encoded: &mut [u8; HEADER_ENCODED_LEN], nonce: u64) -> Hash {
    LittleEndian::write_u64(&mut encoded[NONCE_OFFSET..], nonce);
    Hash::digest(encoded)
}
