//! LSP base-protocol framing: `Content-Length` headers followed by a JSON body.
//!
//! Decodes into the same [`Inbound`] items as the daemon codec, so an
//! [`RpcSession`](bugbuddy_rpc::RpcSession) can run on top of it unchanged.

use std::io;

use bugbuddy_protocol::{CodecError, Inbound, Message, MAX_FRAME_LENGTH};
use bytes::{BufMut, BytesMut};
use serde::Serialize;
use tokio_util::codec::{Decoder, Encoder};

const HEADER_END: &[u8] = b"\r\n\r\n";
const MAX_HEADER_LENGTH: usize = 8 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Header,
    Body(usize),
}

#[derive(Debug)]
pub struct LspCodec {
    state: State,
}

impl LspCodec {
    pub fn new() -> Self {
        Self {
            state: State::Header,
        }
    }
}

impl Default for LspCodec {
    fn default() -> Self {
        Self::new()
    }
}

fn invalid(message: impl Into<String>) -> CodecError {
    CodecError::Io(io::Error::new(io::ErrorKind::InvalidData, message.into()))
}

fn content_length(header: &[u8]) -> Result<usize, CodecError> {
    let header = std::str::from_utf8(header).map_err(|_| invalid("Header is not UTF-8"))?;
    let mut length = None;
    for line in header.split("\r\n") {
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| invalid(format!("Malformed header line: {}", line)))?;
        if name.trim().eq_ignore_ascii_case("content-length") {
            let parsed = value
                .trim()
                .parse::<usize>()
                .map_err(|_| invalid(format!("Bad Content-Length: {}", value.trim())))?;
            length = Some(parsed);
        }
    }
    length.ok_or_else(|| invalid("Missing Content-Length header"))
}

impl Decoder for LspCodec {
    type Item = Inbound;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Inbound>, CodecError> {
        loop {
            match self.state {
                State::Header => {
                    let Some(end) = src.windows(HEADER_END.len()).position(|w| w == HEADER_END)
                    else {
                        if src.len() > MAX_HEADER_LENGTH {
                            return Err(invalid("Header exceeds limit"));
                        }
                        return Ok(None);
                    };
                    let header = src.split_to(end + HEADER_END.len());
                    let length = content_length(&header[..end])?;
                    if length > MAX_FRAME_LENGTH {
                        return Err(CodecError::FrameTooLarge(length));
                    }
                    src.reserve(length);
                    self.state = State::Body(length);
                }
                State::Body(length) => {
                    if src.len() < length {
                        return Ok(None);
                    }
                    let body = src.split_to(length);
                    self.state = State::Header;
                    return Ok(Some(match Message::from_slice(&body) {
                        Ok(message) => Inbound::Message(message),
                        Err(e) => Inbound::Malformed(e.to_string()),
                    }));
                }
            }
        }
    }
}

impl<T: Serialize> Encoder<T> for LspCodec {
    type Error = CodecError;

    fn encode(&mut self, item: T, dst: &mut BytesMut) -> Result<(), CodecError> {
        let body = serde_json::to_vec(&item)?;
        if body.len() > MAX_FRAME_LENGTH {
            return Err(CodecError::FrameTooLarge(body.len()));
        }
        let header = format!("Content-Length: {}\r\n\r\n", body.len());
        dst.reserve(header.len() + body.len());
        dst.put_slice(header.as_bytes());
        dst.put_slice(&body);
        Ok(())
    }
}
