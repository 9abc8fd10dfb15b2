use crate::{ProtocolError, Result};
use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, warn};

/// Default maximum frame size (4MB, the server's own response limit)
pub const DEFAULT_MAX_FRAME_SIZE: u32 = 4 * 1024 * 1024;

/// Handles at or above this value mark a genuine response; callbacks use the lower range
pub const RESPONSE_HANDLE_MIN: u32 = 0x8000_0000;

/// Encodes a request frame: `[u32 LE payload_len + 4][u32 LE handle][payload]`
pub fn encode_frame(payload: &[u8], handle: u32) -> Result<Bytes> {
    let length = frame_length(payload.len())?;
    let mut buf = BytesMut::with_capacity(8 + payload.len());
    buf.put_u32_le(length);
    buf.put_u32_le(handle);
    buf.put_slice(payload);
    Ok(buf.freeze())
}

/// Length prefix for a payload: the payload plus its 4-byte handle
pub fn frame_length(payload_len: usize) -> Result<u32> {
    payload_len
        .checked_add(4)
        .and_then(|len| u32::try_from(len).ok())
        .ok_or_else(|| {
            ProtocolError::Framing(format!("payload of {} bytes does not fit a frame", payload_len))
        })
}

/// Reads a little-endian length prefix
pub fn decode_frame_header(header: [u8; 4]) -> u32 {
    u32::from_le_bytes(header)
}

/// Splits a received frame into its handle and envelope bytes
pub fn split_handle(frame: &[u8]) -> Result<(u32, &[u8])> {
    if frame.len() < 4 {
        return Err(ProtocolError::Framing(format!(
            "frame of {} bytes has no handle",
            frame.len()
        )));
    }
    let (head, rest) = frame.split_at(4);
    let handle = decode_frame_header([head[0], head[1], head[2], head[3]]);
    Ok((handle, rest))
}

/// Whether a handle belongs to a response rather than a server callback
pub fn is_response_handle(handle: u32) -> bool {
    handle >= RESPONSE_HANDLE_MIN
}

/// Reads one length-prefixed blob from an async reader
///
/// Used for the handshake banner as well as for response and callback frames,
/// which carry their handle inside the blob.
pub async fn read_frame<R>(reader: &mut R, max_frame_size: u32) -> Result<Bytes>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; 4];
    reader.read_exact(&mut header).await.map_err(short_read)?;
    let length = decode_frame_header(header);

    if length > max_frame_size {
        warn!("Received oversized frame: {} bytes (max: {})", length, max_frame_size);
        return Err(ProtocolError::FrameTooLarge(length, max_frame_size));
    }

    debug!("Reading frame of {} bytes", length);

    let mut payload = vec![0u8; length as usize];
    reader.read_exact(&mut payload).await.map_err(short_read)?;

    Ok(Bytes::from(payload))
}

/// Writes a request frame and flushes it
pub async fn write_frame<W>(writer: &mut W, handle: u32, payload: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    debug!("Writing frame of {} bytes, handle: {:#x}", payload.len(), handle);

    let frame = encode_frame(payload, handle)?;
    writer.write_all(&frame).await?;
    writer.flush().await?;

    Ok(())
}

fn short_read(e: std::io::Error) -> ProtocolError {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        ProtocolError::Framing("connection closed mid-frame".to_string())
    } else {
        ProtocolError::Io(e)
    }
}
