//! Length-prefixed bincode framing shared by client and server.
//!
//! Every frame is a 4-byte big-endian length followed by that many bytes of
//! bincode (legacy configuration) payload.

use serde::{Serialize, de::DeserializeOwned};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::{ControlError, Result};

/// Largest request the server will read
pub const MAX_REQUEST_SIZE: u32 = 1_000_000;

/// Largest response the client will read
pub const MAX_RESPONSE_SIZE: u32 = 10_000_000;

/// Read one frame of at most `max_len` bytes and decode it.
///
/// # Errors
///
/// `ConnectionClosed` when the peer hangs up before a length prefix arrives,
/// `Protocol` for oversized frames, decode errors otherwise.
pub async fn read_frame<T, R>(reader: &mut R, max_len: u32) -> Result<T>
where
    T: DeserializeOwned,
    R: AsyncRead + Unpin + Send,
{
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            ControlError::ConnectionClosed
        } else {
            ControlError::Io(e)
        }
    })?;

    let len = u32::from_be_bytes(len_buf);
    if len > max_len {
        return Err(ControlError::Protocol(format!(
            "Frame too large: {len} bytes (max {max_len})"
        )));
    }

    let mut bytes = vec![0u8; len as usize];
    reader.read_exact(&mut bytes).await?;

    let (value, _) = bincode::serde::decode_from_slice(&bytes, bincode::config::legacy())?;
    Ok(value)
}

/// Encode `value` and write it as one frame.
///
/// # Errors
///
/// Encode or I/O failures.
pub async fn write_frame<T, W>(writer: &mut W, value: &T) -> Result<()>
where
    T: Serialize + Sync,
    W: AsyncWrite + Unpin + Send,
{
    let bytes = bincode::serde::encode_to_vec(value, bincode::config::legacy())?;
    let len = u32::try_from(bytes.len())
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;

    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(&bytes).await?;
    writer.flush().await?;
    Ok(())
}
