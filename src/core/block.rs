//! Sealed blocks

use crate::core::{derive_interlink, tx_root, Header, Interlink, LevelTargets, Transaction};
use crate::error::ValidationError;
use crate::types::Hash;
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};

/// A header plus the transactions it commits to
///
/// The block hash is the header hash. It is computed on first use and cached
/// in a single-assignment cell, so concurrent readers never observe two
/// different values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Block {
    header: Header,
    transactions: Vec<Transaction>,
    #[serde(skip)]
    hash: OnceCell<Hash>,
}

impl Block {
    /// Assemble a block
    pub fn new(header: Header, transactions: Vec<Transaction>) -> Self {
        Self {
            header,
            transactions,
            hash: OnceCell::new(),
        }
    }

    /// The genesis block
    pub fn genesis() -> Self {
        Self::new(Header::genesis(), Vec::new())
    }

    /// Block header
    pub fn header(&self) -> &Header {
        &self.header
    }

    /// Block transactions
    pub fn transactions(&self) -> &[Transaction] {
        &self.transactions
    }

    /// Block height
    pub fn number(&self) -> u64 {
        self.header.number
    }

    /// Block hash, memoized
    pub fn hash(&self) -> Hash {
        *self.hash.get_or_init(|| self.header.hash())
    }

    /// Interlink a child of this block must carry
    pub fn child_interlink(&self, levels: &LevelTargets) -> Interlink {
        derive_interlink(&self.header, &self.hash(), levels)
    }

    /// Highest superblock level this block reaches
    pub fn level(&self, levels: &LevelTargets) -> Option<usize> {
        levels.level_of(&self.hash())
    }

    /// Check that the transactions match the header's tx root
    pub fn validate_body(&self) -> Result<(), ValidationError> {
        if tx_root(&self.transactions) != self.header.tx_root {
            return Err(ValidationError::WrongTxRoot);
        }
        Ok(())
    }

    /// Split into header and transactions
    pub fn into_parts(self) -> (Header, Vec<Transaction>) {
        (self.header, self.transactions)
    }
}

impl PartialEq for Block {
    fn eq(&self, other: &Self) -> bool {
        self.header == other.header && self.transactions == other.transactions
    }
}

impl Eq for Block {}
