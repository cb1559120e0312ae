//! Proof-of-work engine

use super::Engine;
use crate::core::{Block, Header, LevelTargets};
use crate::error::ValidationError;

/// Proof of work over the header hash with interlinked superblock levels
#[derive(Debug, Clone)]
pub struct ProofOfWork {
    levels: LevelTargets,
}

impl ProofOfWork {
    /// Create the engine for a target table
    pub fn new(levels: LevelTargets) -> Self {
        Self { levels }
    }
}

impl Engine for ProofOfWork {
    fn name(&self) -> &'static str {
        "proof-of-work"
    }

    fn verify_header(&self, header: &Header, parent: &Block) -> Result<(), ValidationError> {
        if parent.number().checked_add(1) != Some(header.number) {
            return Err(ValidationError::WrongBlockNumber);
        }

        if header.parent_hash != parent.hash() {
            return Err(ValidationError::WrongParentHash);
        }

        self.verify_seal(header)?;

        if header.interlink != parent.child_interlink(&self.levels) {
            return Err(ValidationError::WrongInterlink);
        }

        Ok(())
    }

    fn verify_seal(&self, header: &Header) -> Result<(), ValidationError> {
        if !self.levels.base().is_met_by(&header.hash()) {
            return Err(ValidationError::TooHighHash);
        }
        Ok(())
    }

    fn levels(&self) -> &LevelTargets {
        &self.levels
    }
}
