//! # Interlink Node
//!
//! A proof-of-work ledger node whose block headers carry an interlink: for
//! each superblock level, the number of the most recent ancestor whose hash
//! met that level's harder target. Light clients can trust a head from the
//! superblocks alone.
//!
//! ## Architecture
//!
//! - [`core`]: headers, blocks, transactions, targets and interlink derivation
//! - [`consensus`]: the pluggable [`consensus::Engine`] and its proof-of-work variant
//! - [`chain`]: block validation and the serialized chain store
//! - [`ledger`] and [`mempool`]: account state and the FIFO transaction pool
//! - [`miner`]: cancellable nonce search and block submission
//! - [`storage`]: block persistence with bounded retry
//! - [`network`]: length-prefixed peer sync for light and IoT nodes
//! - [`node`]: the aggregate tying one node instance together

#![warn(missing_docs, rust_2018_idioms, unused_lifetimes)]
#![forbid(unsafe_code)]

pub mod chain;
pub mod config;
pub mod consensus;
pub mod core;
pub mod crypto;
pub mod error;
pub mod ledger;
pub mod mempool;
pub mod miner;
pub mod network;
pub mod node;
pub mod storage;
pub mod types;
pub mod utils;

pub use crate::error::{Error, Result, ValidationError};
pub use chain::{BlockValidator, ChainStore};
pub use config::Config;
pub use core::{Block, Header, Interlink, LevelTargets, Target, Transaction};
pub use node::Node;
pub use types::{Address, Hash, PublicKey, Signature};

/// Application name
pub const APP_NAME: &str = "interlink-node";

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Re-export commonly used types
pub mod prelude {
    pub use crate::{
        chain::{BlockValidator, ChainStore},
        config::{Config, NodeMode},
        consensus::{Engine, EngineKind, ProofOfWork},
        core::{Block, Header, Interlink, LevelTargets, Target, Transaction},
        error::{Error, Result, ValidationError},
        ledger::Ledger,
        mempool::TxPool,
        miner::{Miner, MiningOutcome},
        node::Node,
    };
}
