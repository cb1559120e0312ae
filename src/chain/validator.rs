//! Block validation against the chain head

use crate::consensus::Engine;
use crate::core::Block;
use crate::error::ValidationError;
use std::sync::Arc;

/// Validates candidate blocks using the node's consensus engine
#[derive(Debug, Clone)]
pub struct BlockValidator {
    engine: Arc<dyn Engine>,
}

impl BlockValidator {
    /// Create a validator for `engine`
    pub fn new(engine: Arc<dyn Engine>) -> Self {
        Self { engine }
    }

    /// The consensus engine in use
    pub fn engine(&self) -> &Arc<dyn Engine> {
        &self.engine
    }

    /// Number, parent hash, seal and interlink checks
    pub fn validate_header(&self, block: &Block, parent: &Block) -> Result<(), ValidationError> {
        self.engine.verify_header(block.header(), parent)
    }

    /// Transaction digest check
    pub fn validate_body(&self, block: &Block) -> Result<(), ValidationError> {
        block.validate_body()
    }

    /// Full check of `block` as the next block after `head`
    pub fn validate_block(&self, block: &Block, head: &Block) -> Result<(), ValidationError> {
        if block.hash() == head.hash() {
            return Err(ValidationError::KnownBlock);
        }
        self.validate_header(block, head)?;
        self.validate_body(block)
    }

    /// Check a sparse superblock chain received from a peer
    ///
    /// `blocks` must start at our genesis and be in ascending order. Every
    /// later block needs a valid seal and body. Each block must be referenced
    /// by the interlink of the block after it, and must qualify for every
    /// level that reference sits at.
    pub fn verify_superchain(&self, blocks: &[Block], genesis: &Block) -> Result<(), ValidationError> {
        match blocks.first() {
            Some(first) if first.hash() == genesis.hash() => {}
            _ => return Err(ValidationError::WrongParentHash),
        }

        for block in &blocks[1..] {
            self.engine.verify_seal(block.header())?;
            self.validate_body(block)?;
        }

        let levels = self.engine.levels();
        for pair in blocks.windows(2) {
            let (earlier, later) = (&pair[0], &pair[1]);
            if earlier.number() >= later.number() {
                return Err(ValidationError::WrongBlockNumber);
            }
            if !later.header().interlink.references(earlier.number()) {
                return Err(ValidationError::WrongInterlink);
            }
            if earlier.number() == 0 {
                continue;
            }
            let earlier_hash = earlier.hash();
            let claimed = later
                .header()
                .interlink
                .iter()
                .enumerate()
                .filter(|(_, number)| **number == earlier.number());
            for (level, _) in claimed {
                if !levels.qualifies(&earlier_hash, level) {
                    return Err(ValidationError::WrongInterlink);
                }
            }
        }

        Ok(())
    }
}
