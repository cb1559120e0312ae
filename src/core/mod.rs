//! Core chain data types
//!
//! Headers, blocks and transactions, the target table and the interlink
//! rule that ties them together.

pub mod block;
pub mod header;
pub mod interlink;
pub mod target;
pub mod transaction;

/// Number of interlink levels carried by every header
pub const INTERLINK_LEVELS: usize = 10;

pub use block::Block;
pub use header::{hash_encoded_with_nonce, Header, Interlink, HEADER_ENCODED_LEN, NONCE_OFFSET};
pub use interlink::{derive_interlink, next_interlink};
pub use target::{LevelTargets, Target};
pub use transaction::{tx_root, ParticipantState, Transaction};
