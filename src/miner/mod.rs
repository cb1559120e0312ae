//! Block production
//!
//! The miner drains the pool, builds a candidate on top of the current head,
//! searches for a nonce on a blocking worker and submits the sealed block to
//! the chain store. A search is abandoned when the caller cancels it or when
//! the head moves past the candidate's parent.

pub mod search;

pub use search::{search_nonce, Solution, DEFAULT_CHECK_INTERVAL};

use crate::chain::ChainStore;
use crate::core::{tx_root, Block, Header, LevelTargets, Transaction};
use crate::error::ValidationError;
use crate::mempool::TxPool;
use crate::types::Address;
use crate::{Error, Result};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

/// Lifecycle of a candidate block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateState {
    /// Collecting transactions and assembling the header
    Building,
    /// Proof of work satisfied
    Sealed,
    /// Handed to the chain store
    Submitted,
    /// Became the new head
    Accepted,
    /// Refused by the chain store
    Rejected,
}

impl fmt::Display for CandidateState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CandidateState::Building => "building",
            CandidateState::Sealed => "sealed",
            CandidateState::Submitted => "submitted",
            CandidateState::Accepted => "accepted",
            CandidateState::Rejected => "rejected",
        };
        f.write_str(name)
    }
}

/// Result of one mining round
#[derive(Debug, Clone)]
pub enum MiningOutcome {
    /// Block became the new head
    Accepted(Arc<Block>),
    /// Sealed block refused by the chain store
    Rejected(ValidationError),
    /// No block: search cancelled, preempted or aborted
    Cancelled,
}

/// Counters shared by all mining rounds
#[derive(Debug)]
pub struct MiningStats {
    hashes: AtomicU64,
    accepted: AtomicU64,
    rejected: AtomicU64,
    started: Instant,
}

/// Point-in-time copy of [`MiningStats`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MiningStatsSnapshot {
    /// Hashes computed
    pub total_hashes: u64,
    /// Blocks accepted
    pub blocks_accepted: u64,
    /// Blocks rejected
    pub blocks_rejected: u64,
    /// Average hashes per second since start
    pub average_hash_rate: f64,
}

impl MiningStats {
    fn new() -> Self {
        Self {
            hashes: AtomicU64::new(0),
            accepted: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            started: Instant::now(),
        }
    }

    /// Current values
    pub fn snapshot(&self) -> MiningStatsSnapshot {
        let total_hashes = self.hashes.load(Ordering::Relaxed);
        let elapsed = self.started.elapsed().as_secs_f64();
        MiningStatsSnapshot {
            total_hashes,
            blocks_accepted: self.accepted.load(Ordering::Relaxed),
            blocks_rejected: self.rejected.load(Ordering::Relaxed),
            average_hash_rate: if elapsed > 0.0 {
                total_hashes as f64 / elapsed
            } else {
                0.0
            },
        }
    }
}

/// Single mining worker
#[derive(Debug)]
pub struct Miner {
    chain: Arc<ChainStore>,
    pool: Arc<TxPool>,
    levels: LevelTargets,
    coinbase: Address,
    check_interval: u64,
    stats: Arc<MiningStats>,
}

impl Miner {
    /// Create a miner crediting `coinbase`
    pub fn new(chain: Arc<ChainStore>, pool: Arc<TxPool>, levels: LevelTargets, coinbase: Address) -> Self {
        Self {
            chain,
            pool,
            levels,
            coinbase,
            check_interval: DEFAULT_CHECK_INTERVAL,
            stats: Arc::new(MiningStats::new()),
        }
    }

    /// Override how many nonces are tried between cancellation checks
    pub fn with_check_interval(mut self, check_interval: u64) -> Self {
        self.check_interval = check_interval.max(1);
        self
    }

    /// Mining counters
    pub fn stats(&self) -> &Arc<MiningStats> {
        &self.stats
    }

    /// Take every queued transaction, or `None` if the pool is inconsistent
    fn drain_pool(&self) -> Option<Vec<Transaction>> {
        let expected = self.pool.len();
        let mut batch = Vec::with_capacity(expected);

        loop {
            match self.pool.dequeue() {
                Ok(Some(tx)) => batch.push(tx),
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "Transaction pool desynchronized, aborting candidate");
                    return None;
                }
            }
        }

        // Producers may add while we drain, never remove.
        if batch.len() < expected {
            warn!(expected, drained = batch.len(), "Transaction pool lost entries, aborting candidate");
            return None;
        }
        Some(batch)
    }

    /// Build and seal a block on top of the current head
    ///
    /// Returns `None` if the pool is inconsistent, if `cancellation` fires,
    /// or if another block becomes head during the search.
    pub async fn mine(&self, target_difficulty: u64, cancellation: &CancellationToken) -> Result<Option<Block>> {
        let mut state = CandidateState::Building;
        let Some(transactions) = self.drain_pool() else {
            return Ok(None);
        };

        // Subscribe before reading the head so no advance goes unnoticed.
        let mut heads = self.chain.subscribe();
        heads.borrow_and_update();
        let parent = self.chain.current_block();

        let header = Header {
            parent_hash: parent.hash(),
            number: parent.number() + 1,
            time: chrono::Utc::now().timestamp().max(0) as u64,
            nonce: 0,
            difficulty: target_difficulty,
            coinbase: self.coinbase,
            state_root: self.chain.ledger().state_root(),
            tx_root: tx_root(&transactions),
            interlink: parent.child_interlink(&self.levels),
        };
        let number = header.number;
        debug!(number, txs = transactions.len(), %state, "Built candidate");

        let search_token = cancellation.child_token();
        let watcher = {
            let token = search_token.clone();
            let parent_number = parent.number();
            tokio::spawn(async move {
                loop {
                    if heads.borrow_and_update().number > parent_number {
                        debug!(number = parent_number + 1, "Head advanced, preempting search");
                        token.cancel();
                        return;
                    }
                    tokio::select! {
                        _ = token.cancelled() => return,
                        changed = heads.changed() => {
                            if changed.is_err() {
                                return;
                            }
                        }
                    }
                }
            })
        };

        let started = Instant::now();
        let solution = {
            let header = header.clone();
            let target = self.levels.base();
            let check_interval = self.check_interval;
            let token = search_token.clone();
            let stats = Arc::clone(&self.stats);
            tokio::task::spawn_blocking(move || {
                search_nonce(&header, &target, 0, check_interval, &token, &stats.hashes)
            })
            .await
            .map_err(|e| Error::invalid_state(format!("Mining task failed: {}", e)))?
        };

        search_token.cancel();
        watcher_finished(watcher.await, number);

        let Some(solution) = solution else {
            if cancellation.is_cancelled() {
                debug!(number, "Mining cancelled");
            } else {
                info!(number, "Candidate went stale");
            }
            return Ok(None);
        };

        state = CandidateState::Sealed;
        let mut header = header;
        header.nonce = solution.nonce;
        let block = Block::new(header, transactions);
        info!(
            number,
            nonce = solution.nonce,
            hash = %solution.hash.short(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            %state,
            "Sealed block"
        );
        Ok(Some(block))
    }

    /// Hand a sealed block to the chain store
    pub fn submit(&self, block: Block) -> MiningOutcome {
        let number = block.number();
        debug!(number, state = %CandidateState::Submitted, "Submitting block");

        let outcome = match self.chain.insert(block) {
            Ok(block) => {
                self.stats.accepted.fetch_add(1, Ordering::Relaxed);
                debug!(number, state = %CandidateState::Accepted, "Block accepted");
                MiningOutcome::Accepted(block)
            }
            Err(e) => {
                self.stats.rejected.fetch_add(1, Ordering::Relaxed);
                warn!(number, error = %e, state = %CandidateState::Rejected, "Block rejected");
                MiningOutcome::Rejected(e)
            }
        };
        self.pool.reconcile();
        outcome
    }

    /// One full round: mine, then submit
    pub async fn mine_and_submit(
        &self,
        target_difficulty: u64,
        cancellation: &CancellationToken,
    ) -> Result<MiningOutcome> {
        let span = info_span!("miner", number = self.chain.height() + 1);
        self.round(target_difficulty, cancellation).instrument(span).await
    }

    async fn round(&self, target_difficulty: u64, cancellation: &CancellationToken) -> Result<MiningOutcome> {
        match self.mine(target_difficulty, cancellation).await? {
            Some(block) => Ok(self.submit(block)),
            None => {
                self.pool.reconcile();
                Ok(MiningOutcome::Cancelled)
            }
        }
    }
}

/// Log a head watcher that panicked or was aborted, returning whether it
/// finished cleanly
fn watcher_finished(result: std::result::Result<(), JoinError>, number: u64) -> bool {
    match result {
        Ok(()) => true,
        Err(e) => {
            warn!(number, error = %e, panicked = e.is_panic(), "Head watcher failed");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::BlockValidator;
    use crate::consensus::ProofOfWork;
    use crate::core::Target;
    use crate::ledger::Ledger;

    fn setup(difficulty: u32) -> (Arc<ChainStore>, Arc<TxPool>, Miner) {
        let levels = LevelTargets::from_difficulty_bits(difficulty, 1).unwrap();
        let ledger = Arc::new(Ledger::new());
        let engine = Arc::new(ProofOfWork::new(levels.clone()));
        let chain = Arc::new(ChainStore::new(BlockValidator::new(engine), Arc::clone(&ledger)));
        let pool = Arc::new(TxPool::new(ledger));
        let miner = Miner::new(Arc::clone(&chain), Arc::clone(&pool), levels, Address([1u8; 20]))
            .with_check_interval(256);
        (chain, pool, miner)
    }

    #[tokio::test]
    async fn test_failed_watcher_is_reported() {
        let clean = tokio::spawn(async {});
        assert!(watcher_finished(clean.await, 1));

        let panicked = tokio::spawn(async { panic!("watcher") });
        assert!(!watcher_finished(panicked.await, 1));
    }

    #[tokio::test]
    async fn test_mined_block_is_accepted() {
        let (chain, _pool, miner) = setup(4);
        let token = CancellationToken::new();

        for expected in 1..=3 {
            match miner.mine_and_submit(4, &token).await.unwrap() {
                MiningOutcome::Accepted(block) => {
                    assert_eq!(block.number(), expected);
                    assert!(Target::from_difficulty_bits(4).is_met_by(&block.hash()));
                    assert_eq!(block.header().coinbase, Address([1u8; 20]));
                }
                other => panic!("unexpected outcome {:?}", other),
            }
        }
        assert_eq!(chain.height(), 3);
        assert_eq!(miner.stats().snapshot().blocks_accepted, 3);
    }

    #[tokio::test]
    async fn test_cancellation_returns_none() {
        // Far beyond what the test can solve.
        let (chain, _pool, miner) = setup(64);
        let token = CancellationToken::new();

        let cancel = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            cancel.cancel();
        });

        let block = miner.mine(64, &token).await.unwrap();
        assert!(block.is_none());
        assert_eq!(chain.height(), 0);
    }

    #[tokio::test]
    async fn test_stale_candidate_is_preempted() {
        // The chain accepts almost any hash while the miner searches a target
        // it cannot hit, so only a head change can end the search.
        let easy = LevelTargets::new(Target::MAX, 1).unwrap();
        let ledger = Arc::new(Ledger::new());
        let engine = Arc::new(ProofOfWork::new(easy.clone()));
        let chain = Arc::new(ChainStore::new(BlockValidator::new(engine), Arc::clone(&ledger)));
        let pool = Arc::new(TxPool::new(ledger));
        let hard = LevelTargets::from_difficulty_bits(64, 1).unwrap();
        let miner = Miner::new(Arc::clone(&chain), pool, hard, Address([2u8; 20])).with_check_interval(256);

        let token = CancellationToken::new();
        let mining = tokio::spawn(async move { miner.mine(64, &token).await });
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        let genesis = chain.current_block();
        let competitor = Block::new(
            Header {
                parent_hash: genesis.hash(),
                number: 1,
                time: 7,
                tx_root: tx_root(&[]),
                interlink: genesis.child_interlink(&easy),
                ..Header::genesis()
            },
            Vec::new(),
        );
        chain.insert(competitor).unwrap();

        let result = tokio::time::timeout(std::time::Duration::from_secs(10), mining)
            .await
            .expect("search should stop once the head moves")
            .unwrap()
            .unwrap();
        assert!(result.is_none());
        assert_eq!(chain.height(), 1);
    }
}
