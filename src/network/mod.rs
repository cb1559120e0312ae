//! Peer networking
//!
//! Full nodes serve their ledger and chain over TCP. Light peers download
//! every block, IoT peers only the superblocks needed to trust the head.

pub mod codec;
pub mod message;
pub mod server;
pub mod sync;

pub use codec::{framed, recv, recv_block, send, send_block, WireStream, MAX_FRAME_LEN};
pub use message::{SyncMode, WireMessage};
pub use server::{PeerInfo, PeerServer};
pub use sync::{checkpoint_chain, connect, request_snapshot, Snapshot};
