//! Length-prefixed JSON framing
//!
//! Every frame is a 4-byte little-endian length followed by one JSON encoded
//! [`WireMessage`].

use super::message::WireMessage;
use crate::core::Block;
use crate::{Error, Result};
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{Framed, LengthDelimitedCodec};

/// Largest accepted frame
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Framed peer connection
pub type WireStream<T> = Framed<T, LengthDelimitedCodec>;

/// Codec for the peer protocol
pub fn wire_codec() -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .length_field_length(4)
        .little_endian()
        .max_frame_length(MAX_FRAME_LEN)
        .new_codec()
}

/// Wrap an I/O stream in the peer protocol framing
pub fn framed<T: AsyncRead + AsyncWrite>(io: T) -> WireStream<T> {
    Framed::new(io, wire_codec())
}

/// Send one message
pub async fn send<T>(stream: &mut WireStream<T>, message: &WireMessage) -> Result<()>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    let payload = serde_json::to_vec(message)?;
    stream.send(Bytes::from(payload)).await?;
    Ok(())
}

/// Receive one message, `None` once the peer closed the connection
pub async fn recv<T>(stream: &mut WireStream<T>) -> Result<Option<WireMessage>>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    match stream.next().await {
        Some(frame) => {
            let frame = frame?;
            Ok(Some(serde_json::from_slice(&frame)?))
        }
        None => Ok(None),
    }
}

/// Receive a message that must be present
pub async fn expect<T>(stream: &mut WireStream<T>) -> Result<WireMessage>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    recv(stream)
        .await?
        .ok_or_else(|| Error::network("Peer closed the connection"))
}

/// Send a block as header, transaction count and transactions
pub async fn send_block<T>(stream: &mut WireStream<T>, block: &Block) -> Result<()>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    stream
        .feed(Bytes::from(serde_json::to_vec(&WireMessage::Header(block.header().clone()))?))
        .await?;
    stream
        .feed(Bytes::from(serde_json::to_vec(&WireMessage::TxCount {
            count: block.transactions().len() as u64,
        })?))
        .await?;
    for tx in block.transactions() {
        stream
            .feed(Bytes::from(serde_json::to_vec(&WireMessage::Transaction(tx.clone()))?))
            .await?;
    }
    SinkExt::<Bytes>::flush(stream).await?;
    Ok(())
}

/// Receive a block sent by [`send_block`], `None` on a clean close
pub async fn recv_block<T>(stream: &mut WireStream<T>) -> Result<Option<Block>>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    let header = match recv(stream).await? {
        Some(WireMessage::Header(header)) => header,
        Some(other) => return Err(unexpected("header", &other)),
        None => return Ok(None),
    };

    let count = match expect(stream).await? {
        WireMessage::TxCount { count } => count,
        other => return Err(unexpected("tx_count", &other)),
    };

    let mut transactions = Vec::with_capacity(count.min(1024) as usize);
    for _ in 0..count {
        match expect(stream).await? {
            WireMessage::Transaction(tx) => transactions.push(tx),
            other => return Err(unexpected("transaction", &other)),
        }
    }

    Ok(Some(Block::new(header, transactions)))
}

/// Protocol error for an out-of-sequence frame
pub fn unexpected(wanted: &str, got: &WireMessage) -> Error {
    Error::protocol(format!("Expected {} frame, got {}", wanted, got.kind()))
}
