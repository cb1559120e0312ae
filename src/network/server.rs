//! Serving peers
//!
//! A requesting peer says hello with its sync mode, receives the ledger and
//! the blocks for that mode, then gets every new block once per broadcast
//! tick until it disconnects or the node shuts down.

use super::codec::{self, WireStream};
use super::message::{SyncMode, WireMessage};
use crate::chain::ChainStore;
use crate::{Error, Result};
use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{interval, timeout, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

/// How long a new connection may take to say hello
const HELLO_TIMEOUT: Duration = Duration::from_secs(10);

/// Registry entry for a connected peer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerInfo {
    /// Mode the peer asked for
    pub mode: SyncMode,
    /// Highest block number sent so far
    pub sent_up_to: u64,
}

/// Accepts sync requests and broadcasts new blocks
#[derive(Debug)]
pub struct PeerServer {
    chain: Arc<ChainStore>,
    peers: DashMap<SocketAddr, PeerInfo>,
    broadcast_interval: Duration,
}

impl PeerServer {
    /// Serve `chain`, pushing new blocks every `broadcast_interval`
    pub fn new(chain: Arc<ChainStore>, broadcast_interval: Duration) -> Self {
        Self {
            chain,
            peers: DashMap::new(),
            broadcast_interval,
        }
    }

    /// Number of connected peers
    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    /// Accept connections until `shutdown` fires
    pub async fn run(self: Arc<Self>, listener: TcpListener, shutdown: CancellationToken) -> Result<()> {
        let local = listener.local_addr()?;
        info!(address = %local, "Accepting peers");

        loop {
            let (stream, addr) = tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Peer server stopping");
                    return Ok(());
                }
                accepted = listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        warn!(error = %e, "Failed to accept connection");
                        continue;
                    }
                },
            };

            let server = Arc::clone(&self);
            let shutdown = shutdown.clone();
            tokio::spawn(
                async move {
                    match server.handle_peer(stream, addr, shutdown).await {
                        Ok(()) => debug!("Peer session ended"),
                        Err(e) => warn!(error = %e, category = e.category(), "Peer session failed"),
                    }
                    if let Some((_, info)) = server.peers.remove(&addr) {
                        debug!(mode = %info.mode, sent_up_to = info.sent_up_to, "Peer removed");
                    }
                }
                .instrument(info_span!("peer", peer = %addr)),
            );
        }
    }

    async fn handle_peer(&self, stream: TcpStream, addr: SocketAddr, shutdown: CancellationToken) -> Result<()> {
        stream.set_nodelay(true)?;
        let mut stream = codec::framed(stream);

        let mode = match timeout(HELLO_TIMEOUT, codec::expect(&mut stream)).await {
            Ok(Ok(WireMessage::Hello { mode })) => mode,
            Ok(Ok(other)) => return Err(codec::unexpected("hello", &other)),
            Ok(Err(e)) => return Err(e),
            Err(_) => return Err(Error::network("Peer did not say hello in time")),
        };

        let sent_up_to = self.send_snapshot(&mut stream, mode).await?;
        self.peers.insert(addr, PeerInfo { mode, sent_up_to });
        info!(%mode, head = sent_up_to, peers = self.peer_count(), "Peer synced");

        self.broadcast(&mut stream, addr, sent_up_to, shutdown).await
    }

    /// Send ledger entries and the mode's blocks, returning the head sent
    async fn send_snapshot(&self, stream: &mut WireStream<TcpStream>, mode: SyncMode) -> Result<u64> {
        let (entries, blocks) = self.chain.sync_view(mode == SyncMode::Iot);

        codec::send(stream, &WireMessage::StateCount { count: entries.len() as u64 }).await?;
        for entry in entries {
            codec::send(stream, &WireMessage::StateEntry(entry)).await?;
        }

        codec::send(stream, &WireMessage::ChainCount { count: blocks.len() as u64 }).await?;
        for block in &blocks {
            codec::send_block(stream, block).await?;
        }

        // sync_view always ends with the head.
        Ok(blocks.last().map(|b| b.number()).unwrap_or_default())
    }

    async fn broadcast(
        &self,
        stream: &mut WireStream<TcpStream>,
        addr: SocketAddr,
        mut sent_up_to: u64,
        shutdown: CancellationToken,
    ) -> Result<()> {
        let mut ticker = interval(self.broadcast_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return Ok(()),
                incoming = codec::recv(stream) => match incoming? {
                    None => return Ok(()),
                    Some(message) => {
                        debug!(kind = message.kind(), "Ignoring message after sync");
                        continue;
                    }
                },
                _ = ticker.tick() => {}
            }

            for block in self.chain.blocks_after(sent_up_to) {
                codec::send_block(stream, &block).await?;
                sent_up_to = block.number();
                debug!(number = sent_up_to, "Broadcast block");
            }
            if let Some(mut peer) = self.peers.get_mut(&addr) {
                peer.sent_up_to = sent_up_to;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::BlockValidator;
    use crate::consensus::ProofOfWork;
    use crate::core::{LevelTargets, Target};
    use crate::ledger::Ledger;
    use crate::network::{connect, request_snapshot};

    async fn wait_for_peers(server: &PeerServer, count: usize) {
        timeout(Duration::from_secs(5), async {
            while server.peer_count() != count {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_registry_tracks_connected_peers() {
        let levels = LevelTargets::new(Target::MAX, 1).unwrap();
        let validator = BlockValidator::new(Arc::new(ProofOfWork::new(levels)));
        let chain = Arc::new(ChainStore::new(validator, Arc::new(Ledger::new())));
        let server = Arc::new(PeerServer::new(chain, Duration::from_millis(50)));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(Arc::clone(&server).run(listener, shutdown.clone()));

        let mut stream = connect(addr).await.unwrap();
        let snapshot = request_snapshot(&mut stream, SyncMode::Light).await.unwrap();
        assert_eq!(snapshot.blocks.len(), 1);
        wait_for_peers(&server, 1).await;

        drop(stream);
        wait_for_peers(&server, 0).await;

        shutdown.cancel();
        task.await.unwrap().unwrap();
    }
}
