//! Requesting side of peer sync

use super::codec::{self, WireStream};
use super::message::{SyncMode, WireMessage};
use crate::chain::{BlockValidator, ChainStore};
use crate::core::Block;
use crate::ledger::{Ledger, StateEntry};
use crate::{Error, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

/// Connection attempts before giving up on a peer
const CONNECT_ATTEMPTS: u32 = 5;

/// Ledger and blocks received from a peer
#[derive(Debug, Clone)]
pub struct Snapshot {
    /// Ledger entries at the served head
    pub entries: Vec<StateEntry>,
    /// Blocks in ascending order, ending with the served head
    pub blocks: Vec<Block>,
}

/// Connect to `addr`, retrying with doubling delays
pub async fn connect(addr: SocketAddr) -> Result<WireStream<TcpStream>> {
    let mut delay = Duration::from_millis(100);
    let mut attempt = 1;
    loop {
        match TcpStream::connect(addr).await {
            Ok(stream) => {
                stream.set_nodelay(true)?;
                debug!(peer = %addr, attempt, "Connected");
                return Ok(codec::framed(stream));
            }
            Err(e) if attempt >= CONNECT_ATTEMPTS => {
                return Err(Error::network(format!("Could not reach {}: {}", addr, e)));
            }
            Err(e) => {
                warn!(peer = %addr, attempt, error = %e, ?delay, "Connect failed, retrying");
                tokio::time::sleep(delay).await;
                delay *= 2;
                attempt += 1;
            }
        }
    }
}

/// Say hello and read the ledger entries and blocks the peer sends back
pub async fn request_snapshot<T>(stream: &mut WireStream<T>, mode: SyncMode) -> Result<Snapshot>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    codec::send(stream, &WireMessage::Hello { mode }).await?;

    let state_count = match codec::expect(stream).await? {
        WireMessage::StateCount { count } => count,
        other => return Err(codec::unexpected("state_count", &other)),
    };
    let mut entries = Vec::with_capacity(state_count.min(4096) as usize);
    for _ in 0..state_count {
        match codec::expect(stream).await? {
            WireMessage::StateEntry(entry) => entries.push(entry),
            other => return Err(codec::unexpected("state_entry", &other)),
        }
    }

    let chain_count = match codec::expect(stream).await? {
        WireMessage::ChainCount { count } => count,
        other => return Err(codec::unexpected("chain_count", &other)),
    };
    let mut blocks = Vec::with_capacity(chain_count.min(4096) as usize);
    for _ in 0..chain_count {
        let block = codec::recv_block(stream)
            .await?
            .ok_or_else(|| Error::network("Peer closed the connection mid-chain"))?;
        blocks.push(block);
    }

    info!(%mode, entries = entries.len(), blocks = blocks.len(), "Received snapshot");
    Ok(Snapshot { entries, blocks })
}

/// Build a checkpointed chain from a superblock snapshot
///
/// The blocks must form a valid superchain starting at our genesis. The
/// ledger is taken from the snapshot and the chain starts at the last block.
pub fn checkpoint_chain(snapshot: Snapshot, validator: BlockValidator) -> Result<ChainStore> {
    let Snapshot { entries, mut blocks } = snapshot;
    if blocks.is_empty() {
        return Err(Error::protocol("Superblock snapshot carried no blocks"));
    }

    validator.verify_superchain(&blocks, &Block::genesis())?;

    let ledger = Arc::new(Ledger::new());
    ledger.import(entries)?;

    let checkpoint = blocks
        .pop()
        .ok_or_else(|| Error::protocol("Superblock snapshot carried no blocks"))?;
    info!(
        number = checkpoint.number(),
        hash = %checkpoint.hash().short(),
        superblocks = blocks.len(),
        "Checkpointed from superchain"
    );
    Ok(ChainStore::from_checkpoint(checkpoint, validator, ledger))
}
