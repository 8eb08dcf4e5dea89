//! Codec for encoding and decoding Strand frames.
//!
//! MessagePack bodies behind a 4-byte big-endian length prefix. Events are
//! small (a queue or booking snapshot), so the frame cap is 1 MiB.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

use crate::frames::Frame;

/// Maximum frame size.
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Length prefix size in bytes.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum WireError {
    /// Frame exceeds the maximum size.
    #[error("frame size {0} exceeds maximum {MAX_FRAME_SIZE}")]
    FrameTooLarge(usize),

    /// Not enough data to decode a frame.
    #[error("incomplete frame: need {0} more bytes")]
    Incomplete(usize),

    /// MessagePack encoding error.
    #[error("encoding error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    /// MessagePack decoding error.
    #[error("decoding error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
}

/// Encode a frame: length prefix followed by the MessagePack body.
///
/// # Errors
///
/// Returns an error if the frame is too large or encoding fails.
pub fn encode(frame: &Frame) -> Result<Bytes, WireError> {
    let body = rmp_serde::to_vec_named(frame)?;
    if body.len() > MAX_FRAME_SIZE {
        return Err(WireError::FrameTooLarge(body.len()));
    }

    let mut buf = BytesMut::with_capacity(LENGTH_PREFIX_SIZE + body.len());
    buf.put_u32(body.len() as u32);
    buf.extend_from_slice(&body);
    Ok(buf.freeze())
}

/// Decode one frame from a complete buffer.
///
/// # Errors
///
/// Returns an error if the data is incomplete, oversized, or invalid.
pub fn decode(data: &[u8]) -> Result<Frame, WireError> {
    if data.len() < LENGTH_PREFIX_SIZE {
        return Err(WireError::Incomplete(LENGTH_PREFIX_SIZE - data.len()));
    }

    let length = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;
    if length > MAX_FRAME_SIZE {
        return Err(WireError::FrameTooLarge(length));
    }

    let total = LENGTH_PREFIX_SIZE + length;
    if data.len() < total {
        return Err(WireError::Incomplete(total - data.len()));
    }

    Ok(rmp_serde::from_slice(&data[LENGTH_PREFIX_SIZE..total])?)
}

/// Try to decode a frame from a streaming buffer, consuming it on success.
///
/// Returns `Ok(Some(frame))` when a complete frame was decoded, `Ok(None)`
/// when more data is needed.
///
/// # Errors
///
/// Returns an error if the frame is oversized or invalid.
pub fn decode_from(buf: &mut BytesMut) -> Result<Option<Frame>, WireError> {
    if buf.len() < LENGTH_PREFIX_SIZE {
        return Ok(None);
    }

    let length = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
    if length > MAX_FRAME_SIZE {
        return Err(WireError::FrameTooLarge(length));
    }

    if buf.len() < LENGTH_PREFIX_SIZE + length {
        return Ok(None);
    }

    buf.advance(LENGTH_PREFIX_SIZE);
    let body = buf.split_to(length);
    Ok(Some(rmp_serde::from_slice(&body)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip_every_frame_shape() {
        let frames = vec![
            Frame::connect(1, Some("token".to_string())),
            Frame::connected("conn-1", 1, 30_000),
            Frame::subscribe(1, "salon:s1"),
            Frame::unsubscribe(2, "salon:s1"),
            Frame::event("salon:s1", "queue:entry_added", 7, br#"{"entry":{}}"#.to_vec()),
            Frame::ack(3),
            Frame::error(4, 1001, "bad topic"),
            Frame::ping(Some(123)),
            Frame::pong(None),
        ];

        for frame in frames {
            let encoded = encode(&frame).unwrap();
            let decoded = decode(&encoded).unwrap();
            assert_eq!(frame, decoded);
        }
    }

    #[test]
    fn test_streaming_decode_across_partial_reads() {
        let first = Frame::subscribe(1, "salon:s1");
        let second = Frame::ack(1);
        let mut wire = BytesMut::new();
        wire.extend_from_slice(&encode(&first).unwrap());
        wire.extend_from_slice(&encode(&second).unwrap());

        // Feed the buffer a few bytes at a time.
        let mut buf = BytesMut::new();
        let mut decoded = Vec::new();
        while !wire.is_empty() {
            let n = wire.len().min(3);
            buf.extend_from_slice(&wire.split_to(n));
            while let Some(frame) = decode_from(&mut buf).unwrap() {
                decoded.push(frame);
            }
        }

        assert_eq!(decoded, vec![first, second]);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_oversized_frame_rejected() {
        let frame = Frame::event(
            "salon:s1",
            "queue:positions_updated",
            1,
            vec![0u8; MAX_FRAME_SIZE + 1],
        );
        assert!(matches!(encode(&frame), Err(WireError::FrameTooLarge(_))));
    }

    #[test]
    fn test_decode_incomplete() {
        let encoded = encode(&Frame::ack(1)).unwrap();
        match decode(&encoded[..2]) {
            Err(WireError::Incomplete(_)) => {}
            other => panic!("expected Incomplete, got {other:?}"),
        }
    }
}
