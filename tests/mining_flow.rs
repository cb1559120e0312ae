//! Integration tests for the complete mining flow

use assert_matches::assert_matches;
use interlink_node::{
    chain::{BlockValidator, ChainStore},
    config::Config,
    consensus::ProofOfWork,
    core::{LevelTargets, ParticipantState, Transaction},
    crypto::Keypair,
    ledger::Ledger,
    mempool::TxPool,
    miner::{Miner, MiningOutcome},
    storage::{BlockStore, KvBlockStore, MemoryStore, RetryPolicy},
    types::Address,
    Error, Node, ValidationError,
};
use std::sync::Arc;
use std::time::Duration;
use tokio_test::assert_ok;
use tokio_util::sync::CancellationToken;

struct Setup {
    alice: Keypair,
    bob: Keypair,
    chain: Arc<ChainStore>,
    pool: Arc<TxPool>,
    miner: Miner,
}

fn setup(difficulty: u32) -> Setup {
    let alice = Keypair::from_secret([1u8; 32]);
    let bob = Keypair::from_secret([2u8; 32]);
    let ledger = Arc::new(Ledger::with_allocations([
        (alice.address(), 1_000),
        (bob.address(), 1_000),
    ]));

    let levels = LevelTargets::from_difficulty_bits(difficulty, 1).unwrap();
    let validator = BlockValidator::new(Arc::new(ProofOfWork::new(levels.clone())));
    let chain = Arc::new(ChainStore::new(validator, Arc::clone(&ledger)));
    let pool = Arc::new(TxPool::new(ledger));
    let miner = Miner::new(Arc::clone(&chain), Arc::clone(&pool), levels, Address([9u8; 20]))
        .with_check_interval(512);

    Setup {
        alice,
        bob,
        chain,
        pool,
        miner,
    }
}

/// Signed transfer of `amount` from `from` to `to`, built on pending state
fn transfer(pool: &TxPool, from: &Keypair, to: &Keypair, amount: u64) -> Transaction {
    let sender = pool.pending_state(&from.address());
    let receiver = pool.pending_state(&to.address());
    let mut tx = Transaction::new(
        &[
            ParticipantState {
                public_key: from.public_key(),
                nonce: sender.nonce + 1,
                value: sender.balance - amount,
                prev_tx_hash: sender.last_tx,
            },
            ParticipantState {
                public_key: to.public_key(),
                nonce: receiver.nonce + 1,
                value: receiver.balance + amount,
                prev_tx_hash: receiver.last_tx,
            },
        ],
        b"transfer".to_vec(),
    );
    tx.sign(from).unwrap();
    tx.sign(to).unwrap();
    tx
}

#[tokio::test]
async fn test_chained_transfers_are_mined_in_order() {
    let s = setup(4);
    let first = transfer(&s.pool, &s.alice, &s.bob, 100);
    let first_hash = assert_ok!(s.pool.add(first));
    let second = transfer(&s.pool, &s.bob, &s.alice, 30);
    let second_hash = assert_ok!(s.pool.add(second));
    assert_eq!(s.pool.len(), 2);

    let outcome = s.miner.mine_and_submit(4, &CancellationToken::new()).await.unwrap();
    let block = assert_matches!(outcome, MiningOutcome::Accepted(block) => block);

    let hashes: Vec<_> = block.transactions().iter().map(|tx| tx.hash()).collect();
    assert_eq!(hashes, vec![first_hash, second_hash]);
    assert!(s.pool.is_empty());

    let ledger = s.chain.ledger();
    let alice = ledger.state(&s.alice.address());
    let bob = ledger.state(&s.bob.address());
    assert_eq!((alice.nonce, alice.balance), (2, 930));
    assert_eq!((bob.nonce, bob.balance), (2, 1_070));
    assert_eq!(bob.last_tx, second_hash);
}

#[tokio::test]
async fn test_pool_rejects_replayed_nonce() {
    let s = setup(4);
    let tx = transfer(&s.pool, &s.alice, &s.bob, 10);
    assert_ok!(s.pool.add(tx.clone()));
    assert_matches!(s.pool.add(tx), Err(ValidationError::IncorrectNonce));
    assert_eq!(s.pool.len(), 1);
}

#[tokio::test]
async fn test_empty_pool_still_mines() {
    let s = setup(4);
    for expected in 1..=3 {
        let outcome = s.miner.mine_and_submit(4, &CancellationToken::new()).await.unwrap();
        let block = assert_matches!(outcome, MiningOutcome::Accepted(block) => block);
        assert_eq!(block.number(), expected);
        assert!(block.transactions().is_empty());
    }

    let stats = s.miner.stats().snapshot();
    assert_eq!(stats.blocks_accepted, 3);
    assert_eq!(stats.blocks_rejected, 0);
    assert!(stats.total_hashes >= 3);
}

#[tokio::test]
async fn test_cancelled_search_discards_candidate() {
    let s = setup(64);
    let tx = transfer(&s.pool, &s.alice, &s.bob, 10);
    assert_ok!(s.pool.add(tx));

    let token = CancellationToken::new();
    let canceller = {
        let token = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            token.cancel();
        })
    };

    let outcome = tokio::time::timeout(Duration::from_secs(10), s.miner.mine_and_submit(64, &token))
        .await
        .expect("search should stop once cancelled")
        .unwrap();
    canceller.await.unwrap();

    assert_matches!(outcome, MiningOutcome::Cancelled);
    assert_eq!(s.chain.height(), 0);
    // Drained transactions are dropped and the overlay falls back to the ledger.
    assert!(s.pool.is_empty());
    assert_eq!(s.pool.pending_state(&s.alice.address()).balance, 1_000);
}

#[tokio::test]
async fn test_storage_retry_recovers_from_transient_failure() {
    let mut config = Config::default();
    config.chain.difficulty = 4;
    config.mining.participant_count = 3;
    config.mining.demo_transactions = 2;
    config.storage.retry_attempts = 3;
    config.storage.retry_base_delay_ms = 1;
    config.storage.retry_max_delay_ms = 4;

    let store = Arc::new(KvBlockStore::new(MemoryStore::new()));
    store.backend().fail_next_writes(1);
    let node = Node::with_store(config, store.clone()).unwrap();

    assert_eq!(node.premine(2).await.unwrap(), 2);
    assert!(!node.shutdown_token().is_cancelled());
    assert_eq!(store.stored_numbers().unwrap(), vec![1, 2]);
    assert_eq!(store.last_block_number().await.unwrap(), Some(2));

    let header = store.load_header_by_number(2).await.unwrap().unwrap();
    assert_eq!(header.hash(), node.chain().current_block().hash());
}

#[tokio::test]
async fn test_storage_retry_escalates_when_exhausted() {
    let store = KvBlockStore::new(MemoryStore::new());
    store.backend().fail_next_writes(10);
    let policy = RetryPolicy::new(3, Duration::from_millis(1), Duration::from_millis(2));

    let genesis = interlink_node::core::Block::genesis();
    let err = policy
        .execute("store_block", || store.store_block(&genesis))
        .await
        .unwrap_err();

    assert!(err.is_fatal());
    assert_matches!(err, Error::StorageFatal { attempts: 3, .. });
    assert_eq!(store.last_block_number().await.unwrap(), None);
}
