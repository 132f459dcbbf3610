//! # Frame Encoding and Decoding
//!
//! Byte-stream channels (the native worker's stdin/stdout) carry one
//! [`Message`] per frame. The JSON envelope and its binary buffers travel
//! side by side, so a multi-megabyte database image never passes through
//! base64.
//!
//! ## Frame Format
//!
//! ```text
//! ┌──────────────┬──────────────┬───────────────┬──────────────┬─────────┬─────
//! │ json_len u32 │ json (UTF-8) │ buf_count u32 │ buf_len u32  │ bytes   │ ...
//! └──────────────┴──────────────┴───────────────┴──────────────┴─────────┴─────
//!   little-endian                                 repeated buf_count times
//! ```
//!
//! A frame larger than [`MAX_FRAME_LEN`] is rejected on both ends. On read,
//! the limit is checked against each declared length before allocating.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{Error, Result};
use crate::rpc::Message;

/// Largest accepted frame: 1 GiB.
pub const MAX_FRAME_LEN: usize = 1 << 30;

// =============================================================================
// Encoding
// =============================================================================

/// Encodes a message into one frame.
pub fn encode_frame(message: &Message) -> Result<Vec<u8>> {
    let json = serde_json::to_vec(&message.body)?;
    let total = 8
        + json.len()
        + message.buffers.iter().map(|b| 4 + b.len()).sum::<usize>();
    if total > MAX_FRAME_LEN {
        return Err(oversized(total));
    }

    let mut frame = Vec::with_capacity(total);
    frame.extend_from_slice(&(json.len() as u32).to_le_bytes());
    frame.extend_from_slice(&json);
    frame.extend_from_slice(&(message.buffers.len() as u32).to_le_bytes());
    for buffer in &message.buffers {
        frame.extend_from_slice(&(buffer.len() as u32).to_le_bytes());
        frame.extend_from_slice(buffer);
    }
    Ok(frame)
}

/// Writes one frame and flushes.
pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, message: &Message) -> Result<()> {
    let frame = encode_frame(message)?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

// =============================================================================
// Decoding
// =============================================================================

/// Decodes a complete frame held in memory.
pub fn decode_frame(frame: &[u8]) -> Result<Message> {
    let mut cursor = frame;
    let json_len = take_len(&mut cursor)?;
    let json = take_bytes(&mut cursor, json_len)?;
    let body = serde_json::from_slice(json)?;

    let count = take_len(&mut cursor)?;
    let mut buffers = Vec::with_capacity(count.min(64));
    for _ in 0..count {
        let len = take_len(&mut cursor)?;
        buffers.push(take_bytes(&mut cursor, len)?.to_vec());
    }

    if !cursor.is_empty() {
        return Err(Error::MalformedEnvelope(format!(
            "{} trailing bytes after frame",
            cursor.len()
        )));
    }
    Ok(Message { body, buffers })
}

/// Reads one frame. Returns `None` on a clean end of stream between frames.
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Option<Message>> {
    let json_len = match reader.read_u32_le().await {
        Ok(len) => len as usize,
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let mut budget = MAX_FRAME_LEN.saturating_sub(8);
    charge(&mut budget, json_len)?;

    let mut json = vec![0u8; json_len];
    reader.read_exact(&mut json).await?;
    let body = serde_json::from_slice(&json)?;

    let count = reader.read_u32_le().await? as usize;
    let mut buffers = Vec::with_capacity(count.min(64));
    for _ in 0..count {
        let len = reader.read_u32_le().await? as usize;
        charge(&mut budget, 4 + len)?;
        let mut buffer = vec![0u8; len];
        reader.read_exact(&mut buffer).await?;
        buffers.push(buffer);
    }

    Ok(Some(Message { body, buffers }))
}

fn charge(budget: &mut usize, len: usize) -> Result<()> {
    *budget = budget.checked_sub(len).ok_or_else(|| oversized(len))?;
    Ok(())
}

fn oversized(len: usize) -> Error {
    Error::MalformedEnvelope(format!(
        "frame of {len} bytes exceeds the {MAX_FRAME_LEN} byte limit"
    ))
}

fn take_len(cursor: &mut &[u8]) -> Result<usize> {
    let bytes = take_bytes(cursor, 4)?;
    let len = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
    if len > MAX_FRAME_LEN {
        return Err(oversized(len));
    }
    Ok(len)
}

fn take_bytes<'a>(cursor: &mut &'a [u8], len: usize) -> Result<&'a [u8]> {
    if cursor.len() < len {
        return Err(Error::MalformedEnvelope("truncated frame".to_string()));
    }
    let (head, tail) = cursor.split_at(len);
    *cursor = tail;
    Ok(head)
}

// =============================================================================
// Tests
// =============================================================================
