//! Length-prefixed framing shared by UDP datagrams and TCP streams.
//!
//! A frame is a 4-byte big-endian length followed by exactly that many
//! body bytes. The transport never looks inside the body.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::FrameError;
use crate::TransportError;

/// Size of the length prefix.
pub const FRAME_HEADER_LEN: usize = 4;

/// Prefix `body` with its length.
pub fn frame(body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(FRAME_HEADER_LEN + body.len());
    out.extend_from_slice(&(body.len() as u32).to_be_bytes());
    out.extend_from_slice(body);
    out
}

/// Split a complete frame into its body, checking the prefix.
pub fn unframe(frame: &[u8]) -> Result<&[u8], FrameError> {
    if frame.len() < FRAME_HEADER_LEN {
        return Err(FrameError::Truncated(FRAME_HEADER_LEN));
    }
    let (header, body) = frame.split_at(FRAME_HEADER_LEN);
    let declared = u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as usize;
    if declared != body.len() {
        return Err(FrameError::LengthMismatch {
            declared,
            actual: body.len(),
        });
    }
    Ok(body)
}

/// Write one already-framed message to a stream.
pub(crate) async fn write_framed<W: AsyncWrite + Unpin>(
    send: &mut W,
    frame: &[u8],
) -> Result<(), anyhow::Error> {
    send.write_all(frame).await?;
    send.flush().await?;
    Ok(())
}

/// Read the next frame (header included) from a stream.
///
/// Returns `Ok(None)` on a clean end of stream between frames.
pub(crate) async fn read_framed<R: AsyncRead + Unpin>(
    recv: &mut R,
    max_size: usize,
) -> Result<Option<Vec<u8>>, TransportError> {
    let mut len_buf = [0u8; FRAME_HEADER_LEN];
    match recv.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(TransportError::Receive(e.into())),
    }

    let len = u32::from_be_bytes(len_buf) as usize;
    if len + FRAME_HEADER_LEN > max_size {
        return Err(TransportError::MessageTooLarge {
            size: len + FRAME_HEADER_LEN,
            max: max_size,
        });
    }

    let mut buf = vec![0u8; FRAME_HEADER_LEN + len];
    buf[..FRAME_HEADER_LEN].copy_from_slice(&len_buf);
    recv.read_exact(&mut buf[FRAME_HEADER_LEN..])
        .await
        .map_err(|e| TransportError::Receive(e.into()))?;

    Ok(Some(buf))
}
