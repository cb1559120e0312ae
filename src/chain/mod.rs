//! Chain store
//!
//! Append-only sequence of accepted blocks plus the head pointer. Insertion is
//! serialized behind a write lock: the head is read, the candidate validated
//! against it, the ledger updated and the head advanced as one step. Readers
//! share the same lock.

pub mod validator;

pub use validator::BlockValidator;

use crate::core::Block;
use crate::error::ValidationError;
use crate::ledger::{Ledger, StateEntry};
use crate::types::Hash;
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info};

/// Number and hash of the current head
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeadInfo {
    /// Head block number
    pub number: u64,
    /// Head block hash
    pub hash: Hash,
}

impl HeadInfo {
    fn of(block: &Block) -> Self {
        Self {
            number: block.number(),
            hash: block.hash(),
        }
    }
}

#[derive(Debug)]
struct ChainState {
    /// `blocks[0]` has number `base`, zero unless started from a checkpoint
    blocks: Vec<Arc<Block>>,
    base: u64,
}

impl ChainState {
    fn head(&self) -> &Arc<Block> {
        // Never empty: construction always pushes the first block.
        &self.blocks[self.blocks.len() - 1]
    }
}

/// Shared chain store
#[derive(Debug)]
pub struct ChainStore {
    state: RwLock<ChainState>,
    validator: BlockValidator,
    ledger: Arc<Ledger>,
    head_tx: watch::Sender<HeadInfo>,
}

impl ChainStore {
    /// Create a chain holding only the genesis block
    pub fn new(validator: BlockValidator, ledger: Arc<Ledger>) -> Self {
        Self::from_checkpoint(Block::genesis(), validator, ledger)
    }

    /// Create a chain rooted at an already validated block
    ///
    /// Light clients that verified a superblock chain start here instead of
    /// replaying every block since genesis.
    pub fn from_checkpoint(first: Block, validator: BlockValidator, ledger: Arc<Ledger>) -> Self {
        let (head_tx, _) = watch::channel(HeadInfo::of(&first));
        Self {
            state: RwLock::new(ChainState {
                base: first.number(),
                blocks: vec![Arc::new(first)],
            }),
            validator,
            ledger,
            head_tx,
        }
    }

    /// Validate `block` against the head and append it
    ///
    /// On any error the chain and ledger are left untouched.
    pub fn insert(&self, block: Block) -> Result<Arc<Block>, ValidationError> {
        let mut state = self.state.write();

        if let Err(e) = self.validator.validate_block(&block, state.head()) {
            debug!(number = block.number(), hash = %block.hash().short(), error = %e, "Rejected block");
            return Err(e);
        }
        self.ledger.apply_block(block.transactions())?;

        let block = Arc::new(block);
        state.blocks.push(Arc::clone(&block));
        drop(state);

        self.head_tx.send_replace(HeadInfo::of(&block));
        info!(
            number = block.number(),
            hash = %block.hash().short(),
            txs = block.transactions().len(),
            interlink = %block.header().interlink,
            "Inserted block"
        );
        Ok(block)
    }

    /// The current head
    pub fn current_block(&self) -> Arc<Block> {
        Arc::clone(self.state.read().head())
    }

    /// Block with the given number, if stored
    pub fn block_at(&self, number: u64) -> Option<Arc<Block>> {
        let state = self.state.read();
        let index = usize::try_from(number.checked_sub(state.base)?).ok()?;
        state.blocks.get(index).cloned()
    }

    /// The first block: genesis, or the checkpoint for checkpointed chains
    pub fn genesis(&self) -> Arc<Block> {
        Arc::clone(&self.state.read().blocks[0])
    }

    /// Head block number
    pub fn height(&self) -> u64 {
        self.state.read().head().number()
    }

    /// Number of stored blocks
    pub fn len(&self) -> usize {
        self.state.read().blocks.len()
    }

    /// Whether the chain holds only its first block
    pub fn is_empty(&self) -> bool {
        self.len() <= 1
    }

    /// Blocks after `number`, up to the head
    pub fn blocks_after(&self, number: u64) -> Vec<Arc<Block>> {
        let state = self.state.read();
        let start = number.saturating_add(1).saturating_sub(state.base);
        let start = usize::try_from(start).unwrap_or(usize::MAX);
        state.blocks.iter().skip(start).cloned().collect()
    }

    /// Blocks referenced by the head's interlink, ascending
    pub fn interlink_blocks(&self) -> Vec<Arc<Block>> {
        let head = self.current_block();
        head.header()
            .unique_interlink()
            .into_iter()
            .filter_map(|number| self.block_at(number))
            .collect()
    }

    /// Ledger entries and blocks taken at the same head
    ///
    /// With `superchain_only` the blocks are a superblock path from genesis to
    /// the head: starting at the head, each step moves to the oldest stored
    /// block the current block's interlink references. Otherwise every stored
    /// block is returned.
    pub fn sync_view(&self, superchain_only: bool) -> (Vec<StateEntry>, Vec<Arc<Block>>) {
        // Insert applies the ledger under the write lock, so holding the read
        // lock keeps both halves at one head.
        let state = self.state.read();
        let entries = self.ledger.snapshot();

        if !superchain_only {
            return (entries, state.blocks.clone());
        }

        let stored = |number: u64| {
            let index = usize::try_from(number.checked_sub(state.base)?).ok()?;
            state.blocks.get(index).cloned()
        };

        let mut path = vec![Arc::clone(state.head())];
        loop {
            let current = &path[path.len() - 1];
            let next = current
                .header()
                .unique_interlink()
                .into_iter()
                .filter(|number| *number < current.number())
                .find_map(|number| stored(number));
            match next {
                Some(block) => path.push(block),
                None => break,
            }
        }
        path.reverse();
        (entries, path)
    }

    /// Watch head changes
    pub fn subscribe(&self) -> watch::Receiver<HeadInfo> {
        self.head_tx.subscribe()
    }

    /// Validator used by `insert`
    pub fn validator(&self) -> &BlockValidator {
        &self.validator
    }

    /// Ledger updated by `insert`
    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }
}
