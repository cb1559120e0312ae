//! Node aggregate
//!
//! One [`Node`] owns the ledger, chain store, pool, miner and block store of a
//! single node instance. Workers get the node by reference, so several nodes
//! can live in one process.

use crate::chain::{BlockValidator, ChainStore};
use crate::config::Config;
use crate::consensus::build_engine;
use crate::core::{Block, ParticipantState, Transaction};
use crate::crypto::Keypair;
use crate::error::ValidationError;
use crate::ledger::Ledger;
use crate::mempool::TxPool;
use crate::miner::{Miner, MiningOutcome};
use crate::network::{self, PeerServer, SyncMode, WireStream};
use crate::storage::{BlockStore, KvBlockStore, MemoryStore, RetryPolicy};
use crate::types::Hash;
use crate::utils::format_hash_rate;
use crate::{Error, Result};
use rand::seq::IndexedRandom;
use rand::Rng;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

/// Largest amount moved by one demo transfer
const DEMO_MAX_TRANSFER: u64 = 100;

/// Deterministic demo key pairs, identical on every node
pub fn demo_accounts(count: usize) -> Vec<Keypair> {
    (0..count)
        .map(|i| Keypair::from_secret(Hash::digest(format!("interlink-demo-{}", i).as_bytes()).0))
        .collect()
}

/// A single node instance
#[derive(Debug)]
pub struct Node {
    config: Arc<Config>,
    ledger: Arc<Ledger>,
    chain: Arc<ChainStore>,
    pool: Arc<TxPool>,
    miner: Arc<Miner>,
    store: Arc<dyn BlockStore>,
    retry: RetryPolicy,
    shutdown: CancellationToken,
    demo_accounts: Vec<Keypair>,
}

impl Node {
    /// Node with a fresh genesis chain and in-memory block storage
    pub fn new(config: Config) -> Result<Self> {
        Self::with_store(config, Arc::new(KvBlockStore::new(MemoryStore::new())))
    }

    /// Node with a fresh genesis chain persisting into `store`
    pub fn with_store(config: Config, store: Arc<dyn BlockStore>) -> Result<Self> {
        let accounts = demo_accounts(config.mining.participant_count);
        let balance = config.mining.initial_balance;
        let ledger = Arc::new(Ledger::with_allocations(
            accounts.iter().map(|k| (k.address(), balance)),
        ));
        let chain = ChainStore::new(Self::validator(&config)?, ledger);
        Self::assemble(config, chain, store, accounts)
    }

    /// Node around an already built chain, e.g. one checkpointed from a peer
    pub fn from_chain(config: Config, chain: ChainStore, store: Arc<dyn BlockStore>) -> Result<Self> {
        let accounts = demo_accounts(config.mining.participant_count);
        Self::assemble(config, chain, store, accounts)
    }

    fn validator(config: &Config) -> Result<BlockValidator> {
        Ok(BlockValidator::new(build_engine(config.chain.engine, config.levels()?)))
    }

    fn assemble(
        config: Config,
        chain: ChainStore,
        store: Arc<dyn BlockStore>,
        demo_accounts: Vec<Keypair>,
    ) -> Result<Self> {
        let coinbase = match &config.node.coinbase_secret {
            Some(secret) => Keypair::from_secret_hex(secret)?,
            None => Keypair::generate()?,
        };

        let chain = Arc::new(chain);
        let ledger = Arc::clone(chain.ledger());
        let pool = Arc::new(TxPool::new(Arc::clone(&ledger)));
        let miner = Miner::new(
            Arc::clone(&chain),
            Arc::clone(&pool),
            config.levels()?,
            coinbase.address(),
        )
        .with_check_interval(config.mining.check_interval);

        info!(
            mode = %config.node.mode,
            engine = chain.validator().engine().name(),
            difficulty = config.chain.difficulty,
            level_shift = config.chain.level_shift,
            coinbase = %coinbase.address(),
            head = chain.height(),
            "Node assembled"
        );

        Ok(Self {
            retry: config.retry_policy(),
            config: Arc::new(config),
            ledger,
            chain,
            pool,
            miner: Arc::new(miner),
            store,
            shutdown: CancellationToken::new(),
            demo_accounts,
        })
    }

    /// Sync from the configured peer according to the configured mode
    ///
    /// Light nodes replay every block, IoT nodes checkpoint from the peer's
    /// superchain. The connection is returned so the node can keep following
    /// the peer's broadcasts.
    pub async fn sync_from_peer(
        config: Config,
        store: Arc<dyn BlockStore>,
    ) -> Result<(Self, WireStream<TcpStream>)> {
        let mode = config
            .node
            .mode
            .sync_mode()
            .ok_or_else(|| Error::config("Full nodes do not sync from a peer"))?;
        let peer = config.peer_addr()?;

        let mut stream = network::connect(peer).await?;
        let snapshot = network::request_snapshot(&mut stream, mode).await?;

        let node = match mode {
            SyncMode::Light => {
                let node = Self::with_store(config, store)?;
                node.replay(snapshot.blocks).await?;
                node
            }
            SyncMode::Iot => {
                let chain = network::checkpoint_chain(snapshot, Self::validator(&config)?)?;
                let node = Self::from_chain(config, chain, store)?;
                node.persist(&node.chain.current_block()).await?;
                node
            }
        };

        info!(peer = %peer, %mode, head = node.chain.height(), "Synced from peer");
        Ok((node, stream))
    }

    /// Node configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Account ledger
    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }

    /// Chain store
    pub fn chain(&self) -> &Arc<ChainStore> {
        &self.chain
    }

    /// Transaction pool
    pub fn pool(&self) -> &Arc<TxPool> {
        &self.pool
    }

    /// Block producer
    pub fn miner(&self) -> &Arc<Miner> {
        &self.miner
    }

    /// Funded demo accounts
    pub fn demo_accounts(&self) -> &[Keypair] {
        &self.demo_accounts
    }

    /// Token cancelled when the node stops
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Stop every worker of this node
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Insert a block from outside the miner, persist it and reconcile the pool
    pub async fn accept_block(&self, block: Block) -> Result<Arc<Block>> {
        let block = self.chain.insert(block)?;
        self.persist(&block).await?;
        self.pool.reconcile();
        Ok(block)
    }

    /// Write a block through the retry policy
    ///
    /// A failure past the retry budget shuts the node down.
    async fn persist(&self, block: &Block) -> Result<()> {
        let store = &self.store;
        let result = self
            .retry
            .execute("store_block", move || store.store_block(block))
            .await;

        if let Err(e) = result {
            if e.is_fatal() {
                error!(number = block.number(), error = %e, "Storage failed, shutting down");
                self.shutdown.cancel();
            }
            return Err(e);
        }
        Ok(())
    }

    /// Insert peer blocks in order, skipping ones already held
    async fn replay(&self, blocks: Vec<Block>) -> Result<()> {
        let genesis = self.chain.genesis();
        for block in blocks {
            if block.number() == 0 {
                if block.hash() != genesis.hash() {
                    return Err(Error::protocol("Peer has a different genesis block"));
                }
                continue;
            }
            if block.number() <= self.chain.height() {
                continue;
            }
            self.accept_block(block).await?;
        }
        Ok(())
    }

    /// Reload persisted blocks above the current head
    ///
    /// Every block goes through the normal insert path. Returns how many
    /// blocks were restored.
    pub async fn restore(&self) -> Result<u64> {
        let store = &self.store;
        let Some(last) = self
            .retry
            .execute("last_block_number", move || store.last_block_number())
            .await?
        else {
            return Ok(0);
        };

        let mut restored = 0;
        for number in self.chain.height() + 1..=last {
            let block = self
                .retry
                .execute("load_block", move || store.load_block_by_number(number))
                .await?
                .ok_or_else(|| Error::invalid_state(format!("Block {} missing from storage", number)))?;
            self.chain.insert(block)?;
            restored += 1;
        }

        if restored > 0 {
            info!(restored, head = self.chain.height(), "Restored chain from storage");
        }
        Ok(restored)
    }

    /// Queue up to `count` signed transfers between demo accounts
    ///
    /// Each transfer moves a random amount from its first participant to its
    /// second and bumps the nonce of every participant. Returns how many the
    /// pool accepted.
    pub fn seed_demo_transactions(&self, count: usize) -> usize {
        if self.demo_accounts.len() < 2 {
            return 0;
        }
        let max_participants = self
            .config
            .mining
            .participant_count
            .clamp(2, self.demo_accounts.len());

        let mut rng = rand::rng();
        let mut added = 0;
        for _ in 0..count {
            let size = rng.random_range(2..=max_participants);
            let chosen: Vec<&Keypair> = self.demo_accounts.choose_multiple(&mut rng, size).collect();
            let states: Vec<_> = chosen
                .iter()
                .map(|k| self.pool.pending_state(&k.address()))
                .collect();

            let amount = rng.random_range(0..=states[0].balance.min(DEMO_MAX_TRANSFER));
            let Some(received) = states[1].balance.checked_add(amount) else {
                continue;
            };

            let participants: Vec<ParticipantState> = chosen
                .iter()
                .zip(&states)
                .enumerate()
                .map(|(i, (key, state))| ParticipantState {
                    public_key: key.public_key(),
                    nonce: state.nonce + 1,
                    value: match i {
                        0 => state.balance - amount,
                        1 => received,
                        _ => state.balance,
                    },
                    prev_tx_hash: state.last_tx,
                })
                .collect();

            let mut tx = Transaction::new(&participants, Vec::new());
            if chosen.iter().any(|key| tx.sign(key).is_err()) {
                continue;
            }

            match self.pool.add(tx) {
                Ok(hash) => {
                    debug!(tx = %hash.short(), participants = size, amount, "Queued demo transaction");
                    added += 1;
                }
                Err(e) => debug!(error = %e, "Demo transaction refused"),
            }
        }
        added
    }

    /// Mine and persist one block
    pub async fn mine_once(&self) -> Result<MiningOutcome> {
        let outcome = self
            .miner
            .mine_and_submit(u64::from(self.config.chain.difficulty), &self.shutdown)
            .await?;
        if let MiningOutcome::Accepted(block) = &outcome {
            self.persist(block).await?;
        }
        Ok(outcome)
    }

    async fn mining_round(&self) -> Result<MiningOutcome> {
        let demo = self.config.mining.demo_transactions;
        if demo > 0 {
            self.seed_demo_transactions(demo);
        }
        self.mine_once().await
    }

    /// Mine `count` blocks back to back, stopping early on shutdown
    pub async fn premine(&self, count: u64) -> Result<u64> {
        let mut mined = 0;
        while mined < count && !self.shutdown.is_cancelled() {
            match self.mining_round().await? {
                MiningOutcome::Accepted(_) => mined += 1,
                MiningOutcome::Rejected(e) => warn!(error = %e, "Premined block rejected"),
                MiningOutcome::Cancelled => {}
            }
        }
        if mined > 0 {
            info!(mined, head = self.chain.height(), "Premined blocks");
        }
        Ok(mined)
    }

    /// Mine one block per mining interval until shutdown
    pub async fn run_miner(&self) -> Result<()> {
        let span = info_span!("node", mode = %self.config.node.mode);
        self.mining_loop().instrument(span).await
    }

    async fn mining_loop(&self) -> Result<()> {
        let mut ticker = interval(self.config.mining_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => return Ok(()),
                _ = ticker.tick() => {}
            }

            match self.mining_round().await {
                Ok(MiningOutcome::Accepted(block)) => {
                    let stats = self.miner.stats().snapshot();
                    info!(
                        number = block.number(),
                        txs = block.transactions().len(),
                        level = ?block.level(self.chain.validator().engine().levels()),
                        hash_rate = %format_hash_rate(stats.average_hash_rate),
                        "Mined block"
                    );
                }
                Ok(MiningOutcome::Rejected(e)) => warn!(error = %e, "Mined block rejected"),
                Ok(MiningOutcome::Cancelled) => debug!("Mining round cancelled"),
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => warn!(error = %e, category = e.category(), "Mining round failed"),
            }
        }
    }

    /// Bind the configured listen address
    pub async fn bind(&self) -> Result<TcpListener> {
        Ok(TcpListener::bind(self.config.bind_addr()?).await?)
    }

    /// Serve peers on `listener` until shutdown
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        let server = Arc::new(PeerServer::new(
            Arc::clone(&self.chain),
            self.config.broadcast_interval(),
        ));
        server.run(listener, self.shutdown.clone()).await
    }

    /// Insert blocks broadcast by the peer until shutdown or disconnect
    pub async fn follow<T>(&self, stream: WireStream<T>) -> Result<()>
    where
        T: AsyncRead + AsyncWrite + Unpin,
    {
        let span = info_span!("node", mode = %self.config.node.mode);
        self.follow_peer(stream).instrument(span).await
    }

    async fn follow_peer<T>(&self, mut stream: WireStream<T>) -> Result<()>
    where
        T: AsyncRead + AsyncWrite + Unpin,
    {
        loop {
            let received = tokio::select! {
                _ = self.shutdown.cancelled() => return Ok(()),
                received = network::recv_block(&mut stream) => received?,
            };
            let Some(block) = received else {
                return Err(Error::network("Peer closed the connection"));
            };

            let number = block.number();
            match self.accept_block(block).await {
                Ok(block) => info!(number, hash = %block.hash().short(), "Followed block"),
                Err(Error::Validation(ValidationError::KnownBlock)) => debug!(number, "Already have block"),
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => warn!(number, error = %e, "Dropped peer block"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn test_config() -> Config {
        let mut config = Config::default();
        config.chain.difficulty = 4;
        config.mining.participant_count = 4;
        config.mining.demo_transactions = 0;
        config.mining.check_interval = 256;
        config.storage.retry_attempts = 2;
        config.storage.retry_base_delay_ms = 1;
        config.storage.retry_max_delay_ms = 2;
        config
    }

    #[test]
    fn test_demo_accounts_are_deterministic() {
        let a = demo_accounts(3);
        let b = demo_accounts(3);
        assert_eq!(a.len(), 3);
        for (x, y) in a.iter().zip(&b) {
            assert_eq!(x.address(), y.address());
        }
        assert_ne!(a[0].address(), a[1].address());
    }

    #[tokio::test]
    async fn test_seeded_transactions_are_mined() {
        let node = Node::new(test_config()).unwrap();
        let total = node.ledger().total_balance();

        let queued = node.seed_demo_transactions(6);
        assert!(queued > 0);
        assert_eq!(node.pool().len(), queued);

        let block = assert_matches!(node.mine_once().await.unwrap(), MiningOutcome::Accepted(b) => b);
        assert_eq!(block.transactions().len(), queued);
        assert!(node.pool().is_empty());
        assert_eq!(node.ledger().total_balance(), total);
    }

    #[tokio::test]
    async fn test_restore_replays_persisted_blocks() {
        let store: Arc<dyn BlockStore> = Arc::new(KvBlockStore::new(MemoryStore::new()));
        let mut config = test_config();
        config.mining.demo_transactions = 2;

        let first = Node::with_store(config.clone(), Arc::clone(&store)).unwrap();
        assert_eq!(first.premine(3).await.unwrap(), 3);

        let second = Node::with_store(config, store).unwrap();
        assert_eq!(second.restore().await.unwrap(), 3);
        assert_eq!(second.chain().current_block().hash(), first.chain().current_block().hash());
        assert_eq!(second.ledger().state_root(), first.ledger().state_root());
        assert_eq!(second.restore().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_storage_exhaustion_shuts_node_down() {
        let kv = Arc::new(KvBlockStore::new(MemoryStore::new()));
        kv.backend().fail_next_writes(usize::MAX);
        let node = Node::with_store(test_config(), kv.clone()).unwrap();

        let err = node.mine_once().await.unwrap_err();
        assert!(err.is_fatal());
        assert!(node.shutdown_token().is_cancelled());
        assert!(kv.backend().is_empty());
    }

    #[tokio::test]
    async fn test_accept_block_rejects_known_head() {
        let node = Node::new(test_config()).unwrap();
        let block = assert_matches!(node.mine_once().await.unwrap(), MiningOutcome::Accepted(b) => b);

        let err = node.accept_block((*block).clone()).await.unwrap_err();
        assert_matches!(err, Error::Validation(ValidationError::KnownBlock));
        assert_eq!(node.chain().height(), 1);
    }
}
