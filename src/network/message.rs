//! Peer sync messages

use crate::core::{Header, Transaction};
use crate::ledger::StateEntry;
use serde::{Deserialize, Serialize};
use std::fmt;

/// What a requesting peer wants to download
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncMode {
    /// Every block since genesis
    Light,
    /// Only the superblocks the head's interlink references, then the head
    Iot,
}

impl fmt::Display for SyncMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncMode::Light => write!(f, "light"),
            SyncMode::Iot => write!(f, "iot"),
        }
    }
}

/// One frame on the wire
///
/// Blocks travel as a `Header`, a `TxCount` and that many `Transaction`
/// frames.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum WireMessage {
    /// First frame from the requester
    Hello { mode: SyncMode },
    /// Number of `StateEntry` frames that follow
    StateCount { count: u64 },
    /// One ledger entry
    StateEntry(StateEntry),
    /// Number of blocks that follow
    ChainCount { count: u64 },
    /// Block header
    Header(Header),
    /// Number of `Transaction` frames completing the block
    TxCount { count: u64 },
    /// Block transaction
    Transaction(Transaction),
}

impl WireMessage {
    /// Short name for logs and protocol errors
    pub fn kind(&self) -> &'static str {
        match self {
            WireMessage::Hello { .. } => "hello",
            WireMessage::StateCount { .. } => "state_count",
            WireMessage::StateEntry(_) => "state_entry",
            WireMessage::ChainCount { .. } => "chain_count",
            WireMessage::Header(_) => "header",
            WireMessage::TxCount { .. } => "tx_count",
            WireMessage::Transaction(_) => "transaction",
        }
    }
}
