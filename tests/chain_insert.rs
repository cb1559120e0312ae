//! Integration tests for validation and chain insertion

use assert_matches::assert_matches;
use interlink_node::{
    chain::{BlockValidator, ChainStore},
    consensus::ProofOfWork,
    core::{next_interlink, tx_root, Block, Header, Interlink, LevelTargets, ParticipantState, Transaction},
    crypto::Keypair,
    ledger::Ledger,
    miner::search_nonce,
    types::Hash,
    ValidationError,
};
use proptest::prelude::*;
use std::sync::atomic::AtomicU64;
use std::sync::{Arc, Barrier};
use std::thread;
use tokio_util::sync::CancellationToken;

fn levels() -> LevelTargets {
    LevelTargets::from_difficulty_bits(4, 1).unwrap()
}

fn new_chain() -> ChainStore {
    chain_with(Ledger::new())
}

fn chain_with(ledger: Ledger) -> ChainStore {
    let validator = BlockValidator::new(Arc::new(ProofOfWork::new(levels())));
    ChainStore::new(validator, Arc::new(ledger))
}

/// Unsealed child of `parent` with the correct interlink
fn child_header(parent: &Block, time: u64) -> Header {
    Header {
        parent_hash: parent.hash(),
        number: parent.number() + 1,
        time,
        difficulty: 4,
        tx_root: tx_root(&[]),
        interlink: next_interlink(parent.header(), &levels()),
        ..Header::genesis()
    }
}

/// Search a nonce meeting the base target, keeping the header as given
fn seal(header: Header) -> Block {
    search(header, Vec::new())
}

/// Commit to `transactions`, then seal
fn seal_with(mut header: Header, transactions: Vec<Transaction>) -> Block {
    header.tx_root = tx_root(&transactions);
    search(header, transactions)
}

fn search(mut header: Header, transactions: Vec<Transaction>) -> Block {
    let counter = AtomicU64::new(0);
    let solution = search_nonce(&header, &levels().base(), 0, 1024, &CancellationToken::new(), &counter)
        .expect("easy target has a solution");
    header.nonce = solution.nonce;
    Block::new(header, transactions)
}

/// Two-party transfer signed by both sides
fn transfer(from: &Keypair, to: &Keypair, post: [(u64, u64); 2], prev: [Hash; 2]) -> Transaction {
    let mut tx = Transaction::new(
        &[
            ParticipantState {
                public_key: from.public_key(),
                nonce: post[0].0,
                value: post[0].1,
                prev_tx_hash: prev[0],
            },
            ParticipantState {
                public_key: to.public_key(),
                nonce: post[1].0,
                value: post[1].1,
                prev_tx_hash: prev[1],
            },
        ],
        Vec::new(),
    );
    tx.sign(from).unwrap();
    tx.sign(to).unwrap();
    tx
}

/// Pick a nonce whose hash reaches exactly `level`
fn seal_at_level(mut header: Header, level: usize) -> Block {
    let levels = levels();
    header.nonce = (0..)
        .find(|nonce| {
            let mut candidate = header.clone();
            candidate.nonce = *nonce;
            levels.level_of(&candidate.hash()) == Some(level)
        })
        .unwrap();
    Block::new(header, Vec::new())
}

/// Pick a nonce whose hash misses the base target
fn seal_too_high(mut header: Header) -> Block {
    let base = levels().base();
    header.nonce = (0..)
        .find(|nonce| {
            let mut candidate = header.clone();
            candidate.nonce = *nonce;
            !base.is_met_by(&candidate.hash())
        })
        .unwrap();
    Block::new(header, Vec::new())
}

#[test]
fn test_insert_scenario() {
    let chain = new_chain();
    let genesis = chain.current_block();

    let b1 = seal_at_level(child_header(&genesis, 1), 7);
    let b1 = chain.insert(b1).unwrap();
    assert_eq!(chain.height(), 1);

    // Parent hash left unset.
    let b2 = seal(Header {
        parent_hash: Hash::ZERO,
        ..child_header(&b1, 2)
    });
    assert_matches!(chain.insert(b2), Err(ValidationError::WrongParentHash));

    let b3 = seal_too_high(child_header(&b1, 3));
    assert_matches!(chain.insert(b3), Err(ValidationError::TooHighHash));

    let b4 = seal(Header {
        interlink: Interlink::ZERO,
        ..child_header(&b1, 4)
    });
    assert_matches!(chain.insert(b4), Err(ValidationError::WrongInterlink));

    let b5 = seal_at_level(child_header(&b1, 5), 3);
    assert_eq!(b5.header().interlink, Interlink([1, 1, 1, 1, 1, 1, 1, 1, 0, 0]));
    let b5 = chain.insert(b5).unwrap();

    let b6 = seal(child_header(&b5, 6));
    assert_eq!(b6.header().interlink, Interlink([2, 2, 2, 2, 1, 1, 1, 1, 0, 0]));
    let b6 = chain.insert(b6).unwrap();

    assert_eq!(chain.height(), 3);
    assert_eq!(chain.current_block().hash(), b6.hash());
    assert_eq!(chain.block_at(2).unwrap().hash(), b5.hash());
}

#[test]
fn test_rejections_leave_chain_untouched() {
    let chain = new_chain();
    let head = chain.current_block();

    let wrong_number = seal(Header {
        number: 5,
        ..child_header(&head, 1)
    });
    assert_matches!(chain.insert(wrong_number), Err(ValidationError::WrongBlockNumber));

    let mut header = child_header(&head, 1);
    header.tx_root = Hash::digest(b"not the transactions");
    assert_matches!(chain.insert(seal(header)), Err(ValidationError::WrongTxRoot));

    assert_eq!(chain.height(), 0);
    assert_eq!(chain.current_block().hash(), head.hash());
}

#[test]
fn test_ledger_violations_leave_chain_untouched() {
    let alice = Keypair::from_secret([1u8; 32]);
    let bob = Keypair::from_secret([2u8; 32]);
    let chain = chain_with(Ledger::with_allocations([
        (alice.address(), 1_000),
        (bob.address(), 1_000),
    ]));
    let ledger = Arc::clone(chain.ledger());
    let root = ledger.state_root();

    // Post-balances sum to more than the pre-balances.
    let inflating = transfer(&alice, &bob, [(1, 900), (1, 1_200)], [Hash::ZERO; 2]);
    let block = seal_with(child_header(&chain.current_block(), 1), vec![inflating]);
    assert_matches!(chain.insert(block), Err(ValidationError::IncorrectBalance));
    assert_eq!(chain.height(), 0);
    assert_eq!(ledger.state_root(), root);

    let valid = transfer(&alice, &bob, [(1, 900), (1, 1_100)], [Hash::ZERO; 2]);
    let block = seal_with(child_header(&chain.current_block(), 2), vec![valid.clone()]);
    chain.insert(block).unwrap();
    let root = ledger.state_root();

    // The same transaction again reuses nonces already spent.
    let block = seal_with(child_header(&chain.current_block(), 3), vec![valid]);
    assert_matches!(chain.insert(block), Err(ValidationError::IncorrectNonce));
    assert_eq!(chain.height(), 1);
    assert_eq!(ledger.state_root(), root);
    assert_eq!(ledger.state(&alice.address()).balance, 900);
}

#[test]
fn test_concurrent_inserts_are_serialized() {
    const RACERS: u64 = 8;
    let chain = new_chain();
    let genesis = chain.current_block();
    let candidates: Vec<Block> = (0..RACERS).map(|t| seal(child_header(&genesis, 100 + t))).collect();
    let barrier = Barrier::new(RACERS as usize);

    let results: Vec<_> = thread::scope(|scope| {
        let handles: Vec<_> = candidates
            .into_iter()
            .map(|block| {
                let (chain, barrier) = (&chain, &barrier);
                scope.spawn(move || {
                    barrier.wait();
                    chain.insert(block).map(|b| b.hash())
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let winners: Vec<_> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
    assert_eq!(winners.len(), 1);
    for result in &results {
        if let Err(e) = result {
            assert_eq!(*e, ValidationError::WrongBlockNumber);
        }
    }
    assert_eq!(chain.height(), 1);
    assert_eq!(chain.len(), 2);
    assert_eq!(chain.current_block().hash(), *winners[0]);
}

#[test]
fn test_reinsert_is_known_block() {
    let chain = new_chain();
    let block = seal(child_header(&chain.current_block(), 1));

    chain.insert(block.clone()).unwrap();
    assert_matches!(chain.insert(block), Err(ValidationError::KnownBlock));
    assert_eq!(chain.len(), 2);
}

#[test]
fn test_linear_chain_properties() {
    let chain = new_chain();
    for t in 1..=12 {
        let block = seal(child_header(&chain.current_block(), t));
        chain.insert(block).unwrap();
    }

    let levels = levels();
    let blocks = chain.blocks_after(0);
    assert_eq!(blocks.len(), 12);

    let mut parent = chain.genesis();
    for block in blocks {
        assert_eq!(block.number(), parent.number() + 1);
        assert_eq!(block.header().parent_hash, parent.hash());
        assert!(levels.base().is_met_by(&block.hash()));
        assert_eq!(block.header().interlink, next_interlink(parent.header(), &levels));
        for entry in block.header().interlink.iter() {
            assert!(*entry < block.number());
        }
        parent = block;
    }

    // Every referenced superblock is stored and qualifies for its level.
    let head = chain.current_block();
    for (level, number) in head.header().interlink.iter().enumerate() {
        if *number == 0 {
            continue;
        }
        let block = chain.block_at(*number).unwrap();
        assert!(levels.qualifies(&block.hash(), level));
    }
    assert_eq!(
        chain.interlink_blocks().len(),
        head.header().unique_interlink().len()
    );
}

#[test]
fn test_superchain_view_verifies() {
    let chain = new_chain();
    for t in 1..=8 {
        let block = seal(child_header(&chain.current_block(), t));
        chain.insert(block).unwrap();
    }

    let (_, blocks) = chain.sync_view(true);
    let blocks: Vec<Block> = blocks.iter().map(|b| (**b).clone()).collect();
    assert_eq!(blocks.last().unwrap().number(), 8);
    assert_eq!(chain.validator().verify_superchain(&blocks, &Block::genesis()), Ok(()));
}

proptest! {
    #[test]
    fn prop_header_hash_is_deterministic(
        number in any::<u64>(),
        time in any::<u64>(),
        nonce in any::<u64>(),
        interlink in any::<[u64; 10]>(),
    ) {
        let header = Header {
            number,
            time,
            nonce,
            interlink: Interlink(interlink),
            ..Header::genesis()
        };
        prop_assert_eq!(header.hash(), header.clone().hash());

        let mut other = header.clone();
        other.nonce = nonce.wrapping_add(1);
        prop_assert_ne!(header.hash(), other.hash());
    }
}
