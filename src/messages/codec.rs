//! # Wire framing.
//!
//! One frame is a 4-byte little-endian length followed by that many bytes of
//! JSON. Frames above [`MAX_FRAME_LEN`] are rejected.

use bytes::{Bytes, BytesMut};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio_util::codec::{Decoder, Encoder, LengthDelimitedCodec};

use crate::error::BusError;

/// Largest accepted payload.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Length-delimited codec configured for the bus wire format.
pub fn frame_codec() -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .length_field_length(4)
        .little_endian()
        .max_frame_length(MAX_FRAME_LEN)
        .new_codec()
}

/// Serializes a value into a payload, checking the size limit.
pub fn to_payload<T: Serialize>(value: &T) -> Result<Bytes, BusError> {
    let payload = serde_json::to_vec(value)?;
    if payload.len() > MAX_FRAME_LEN {
        return Err(BusError::FrameTooLarge {
            len: payload.len(),
            max: MAX_FRAME_LEN,
        });
    }
    Ok(Bytes::from(payload))
}

/// Encodes a value as a complete frame.
pub fn encode<T: Serialize>(value: &T) -> Result<BytesMut, BusError> {
    let payload = to_payload(value)?;
    let mut buf = BytesMut::with_capacity(payload.len() + 4);
    frame_codec().encode(payload, &mut buf)?;
    Ok(buf)
}

/// Decodes a value from a buffer holding a complete frame.
pub fn decode<T: DeserializeOwned>(frame: &[u8]) -> Result<T, BusError> {
    let mut buf = BytesMut::from(frame);
    let payload = frame_codec().decode(&mut buf)?.ok_or(BusError::Closed)?;
    Ok(serde_json::from_slice(&payload)?)
}
