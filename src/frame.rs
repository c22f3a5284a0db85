//! # Frame Codec
//!
//! Length-prefix framing over a byte stream. Every TCP/IPC message on the
//! wire is `[4-byte big-endian length N][N payload bytes]`; the in-process
//! transport skips this module entirely and hands opaque slices across the
//! boundary (see `transport::inproc`).

use bytes::{Buf, BytesMut};

/// Maximum payload size of a single frame: 1 MiB.
pub const MAX_FRAME_LEN: usize = 1024 * 1024;

#[derive(Debug, thiserror::Error, PartialEq, Eq, Clone)]
pub enum FrameError {
    #[error("frame length is zero")]
    ZeroLength,
    #[error("frame length {len} exceeds maximum {MAX_FRAME_LEN}")]
    TooLarge { len: usize },
}

/// Outcome of attempting to pull one frame out of a buffer.
#[derive(Debug)]
pub enum Decoded<T> {
    /// A complete frame was extracted; `T` is the payload (borrowed or owned
    /// depending on which `decode_*` variant was called).
    Frame(T),
    /// The buffer does not yet hold a complete frame.
    NeedMore,
}

/// Validate a length prefix before any allocation proportional to it is made.
fn validate_len(len: usize) -> Result<(), FrameError> {
    if len == 0 {
        return Err(FrameError::ZeroLength);
    }
    if len > MAX_FRAME_LEN {
        return Err(FrameError::TooLarge { len });
    }
    Ok(())
}

/// Encode a payload into a length-prefixed frame, copying the payload once
/// into the returned buffer. Used by senders that own their payload bytes.
pub fn encode(payload: &[u8]) -> Result<BytesMut, FrameError> {
    validate_len(payload.len())?;
    let mut out = BytesMut::with_capacity(4 + payload.len());
    out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    out.extend_from_slice(payload);
    Ok(out)
}

/// Zero-copy peek: if `buf` holds a complete frame, return a borrowed slice
/// of the payload and the number of bytes the frame occupies (header +
/// payload), without copying or advancing the buffer's cursor. Callers that
/// want to keep the bytes beyond the peek must copy them out before calling
/// `advance`.
pub fn peek(buf: &[u8]) -> Result<Decoded<(&[u8], usize)>, FrameError> {
    if buf.len() < 4 {
        return Ok(Decoded::NeedMore);
    }
    let len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
    validate_len(len)?;
    let total = 4 + len;
    if buf.len() < total {
        return Ok(Decoded::NeedMore);
    }
    Ok(Decoded::Frame((&buf[4..total], total)))
}

/// Copying variant: extract one frame from `buf`, taking ownership of the
/// payload bytes and advancing `buf` past the consumed frame. This is the
/// variant the dispatcher uses, since it needs to hand the payload to a
/// handler that may outlive the read buffer's next refill.
pub fn decode(buf: &mut BytesMut) -> Result<Decoded<BytesMut>, FrameError> {
    match peek(buf)? {
        Decoded::NeedMore => Ok(Decoded::NeedMore),
        Decoded::Frame((_, total)) => {
            let mut frame = buf.split_to(total);
            frame.advance(4);
            Ok(Decoded::Frame(frame))
        }
    }
}
