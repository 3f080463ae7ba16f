//! Frame envelope I/O over any async byte stream.
//!
//! `read_exact` already loops over short reads, so a frame split across any
//! number of socket reads (down to one byte at a time, or mid length prefix)
//! decodes exactly like one delivered whole. End-of-stream before a frame is
//! complete surfaces as `ConnectionBroken`, never as a hang.

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::wire::FRAME_HEADER_LEN;

/// Failure while moving a frame across a stream.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// Peer closed or reset the stream, or a read/write failed.
    #[error("connection broken: {0}")]
    ConnectionBroken(#[from] std::io::Error),

    /// Length prefix exceeds the configured cap. Nothing was allocated.
    #[error("frame length {len} exceeds maximum {max}")]
    Oversized { len: usize, max: usize },
}

/// Read one frame and return its payload (without the length prefix).
pub async fn read_frame<R>(reader: &mut R, max_len: usize) -> Result<BytesMut, FrameError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut header = [0u8; FRAME_HEADER_LEN];
    reader.read_exact(&mut header).await?;
    let len = u32::from_le_bytes(header) as usize;
    if len > max_len {
        return Err(FrameError::Oversized { len, max: max_len });
    }

    let mut payload = BytesMut::zeroed(len);
    reader.read_exact(&mut payload).await?;
    Ok(payload)
}

/// Write an already-encoded frame in full and flush it.
///
/// `write_all` retries short writes until every byte is accepted or the stream
/// reports an error.
pub async fn write_frame<W>(writer: &mut W, frame: &[u8]) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    writer.write_all(frame).await?;
    writer.flush().await?;
    Ok(())
}
