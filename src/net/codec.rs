//! Wire format.
//!
//! Every logical unit travels as one frame:
//!
//! ```text
//! MAGIC (4) + LENGTH (4, LE) + CHECKSUM (4) + PAYLOAD (postcard)
//! ```
//!
//! The payload is a tagged [`Message`] envelope decoded exactly once —
//! there is no trial decoding and no data-dependent delimiter byte
//! anywhere in the stream. Checksum is the first four bytes of the
//! sha3-256 of the payload.

use serde::{Deserialize, Serialize};
use sha3::{Digest, Sha3_256};
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::types::{Block, GenesisBlock, SignedTransaction};

pub const PROTOCOL_MAGIC: [u8; 4] = *b"AURM";

/// Hard cap on a single frame payload.
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialize(#[from] postcard::Error),
    #[error("invalid magic bytes")]
    InvalidMagic,
    #[error("invalid checksum")]
    InvalidChecksum,
    #[error("frame too large: {0} bytes (max: {MAX_FRAME_SIZE})")]
    FrameTooLarge(usize),
}

/// The tagged gossip envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Message {
    /// Full list of peer URIs known to the sender; sent once to every
    /// freshly accepted connection.
    PeerList(Vec<String>),
    /// A peer announcing its own URI; flooded with dedup.
    Presence(String),
    Tx(SignedTransaction),
    Genesis(GenesisBlock),
    Block(Block),
}

fn checksum(data: &[u8]) -> [u8; 4] {
    let digest = Sha3_256::digest(data);
    [digest[0], digest[1], digest[2], digest[3]]
}

/// Encode a message into a self-contained frame.
pub fn encode(msg: &Message) -> Result<Vec<u8>, CodecError> {
    let payload = postcard::to_allocvec(msg)?;
    if payload.len() > MAX_FRAME_SIZE {
        return Err(CodecError::FrameTooLarge(payload.len()));
    }
    let mut frame = Vec::with_capacity(12 + payload.len());
    frame.extend_from_slice(&PROTOCOL_MAGIC);
    frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    frame.extend_from_slice(&checksum(&payload));
    frame.extend_from_slice(&payload);
    Ok(frame)
}

/// Write one frame to the stream.
pub async fn write_message<W: AsyncWriteExt + Unpin>(
    writer: &mut W,
    msg: &Message,
) -> Result<(), CodecError> {
    let frame = encode(msg)?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one frame from the stream. Size is checked before the payload is
/// allocated.
pub async fn read_message<R: AsyncReadExt + Unpin>(reader: &mut R) -> Result<Message, CodecError> {
    let mut magic = [0u8; 4];
    reader.read_exact(&mut magic).await?;
    if magic != PROTOCOL_MAGIC {
        return Err(CodecError::InvalidMagic);
    }

    let mut len_bytes = [0u8; 4];
    reader.read_exact(&mut len_bytes).await?;
    let len = u32::from_le_bytes(len_bytes) as usize;
    if len > MAX_FRAME_SIZE {
        return Err(CodecError::FrameTooLarge(len));
    }

    let mut expected = [0u8; 4];
    reader.read_exact(&mut expected).await?;

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;

    if checksum(&payload) != expected {
        return Err(CodecError::InvalidChecksum);
    }

    Ok(postcard::from_bytes(&payload)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn frame_roundtrip() {
        let msg = Message::Presence("10.0.0.1:4000".into());
        let frame = encode(&msg).unwrap();

        let mut reader = frame.as_slice();
        let decoded = read_message(&mut reader).await.unwrap();
        assert_eq!(decoded, msg);
    }

    #[tokio::test]
    async fn corrupted_payload_rejected() {
        let msg = Message::PeerList(vec!["a:1".into(), "b:2".into()]);
        let mut frame = encode(&msg).unwrap();
        let last = frame.len() - 1;
        frame[last] ^= 0xff;

        let mut reader = frame.as_slice();
        assert!(matches!(
            read_message(&mut reader).await,
            Err(CodecError::InvalidChecksum)
        ));
    }

    #[tokio::test]
    async fn wrong_magic_rejected() {
        let mut frame = encode(&Message::Presence("x:1".into())).unwrap();
        frame[0] = b'Z';

        let mut reader = frame.as_slice();
        assert!(matches!(
            read_message(&mut reader).await,
            Err(CodecError::InvalidMagic)
        ));
    }

    #[tokio::test]
    async fn oversized_length_rejected_before_allocation() {
        let mut frame = Vec::new();
        frame.extend_from_slice(&PROTOCOL_MAGIC);
        frame.extend_from_slice(&(u32::MAX).to_le_bytes());
        frame.extend_from_slice(&[0u8; 4]);

        let mut reader = frame.as_slice();
        assert!(matches!(
            read_message(&mut reader).await,
            Err(CodecError::FrameTooLarge(_))
        ));
    }
}
