//! Length-prefixed framing.
//!
//! Each frame is a 4-byte big-endian length followed by one JSON object.
//! A frame whose body does not parse is surfaced as [`Inbound::Malformed`]
//! so the receiver can answer with a parse error and keep reading; only
//! IO and length errors end the stream.

use bytes::{Bytes, BytesMut};
use serde::Serialize;
use tokio_util::codec::{Decoder, Encoder, LengthDelimitedCodec};

use crate::protocol::Message;

pub const MAX_FRAME_LENGTH: usize = 8 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Frame of {0} bytes exceeds the {MAX_FRAME_LENGTH} byte limit")]
    FrameTooLarge(usize),
}

/// One decoded frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Message(Message),
    Malformed(String),
}

#[derive(Debug)]
pub struct RpcCodec {
    frames: LengthDelimitedCodec,
}

impl RpcCodec {
    pub fn new() -> Self {
        Self {
            frames: LengthDelimitedCodec::builder()
                .max_frame_length(MAX_FRAME_LENGTH)
                .new_codec(),
        }
    }
}

impl Default for RpcCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for RpcCodec {
    type Item = Inbound;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Inbound>, CodecError> {
        let Some(frame) = self.frames.decode(src)? else {
            return Ok(None);
        };
        Ok(Some(match Message::from_slice(&frame) {
            Ok(message) => Inbound::Message(message),
            Err(e) => Inbound::Malformed(e.to_string()),
        }))
    }
}

impl<T: Serialize> Encoder<T> for RpcCodec {
    type Error = CodecError;

    fn encode(&mut self, item: T, dst: &mut BytesMut) -> Result<(), CodecError> {
        let body = serde_json::to_vec(&item)?;
        if body.len() > MAX_FRAME_LENGTH {
            return Err(CodecError::FrameTooLarge(body.len()));
        }
        self.frames.encode(Bytes::from(body), dst)?;
        Ok(())
    }
}
