//! Wire protocol for the read API
//!
//! Provides length-prefixed framing and the postcard-encoded request and
//! response messages carried inside frames.

use bytes::{Buf, BufMut, BytesMut};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder};

/// Maximum frame size (1 MB)
const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Framing errors
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("Frame too large: {0} bytes (max {MAX_FRAME_SIZE})")]
    TooLarge(usize),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Unknown frame type: {0}")]
    UnknownType(u8),
    #[error("Serialization error: {0}")]
    Serialization(#[from] postcard::Error),
}

/// A framed message
#[derive(Clone, Debug)]
pub struct Frame {
    /// Frame type
    pub frame_type: FrameType,
    /// Payload bytes
    pub payload: Vec<u8>,
}

/// Frame types
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum FrameType {
    /// Ping for keepalive
    Ping = 0,
    /// Pong response
    Pong = 1,
    /// API request
    Request = 10,
    /// API response
    Response = 11,
}

impl TryFrom<u8> for FrameType {
    type Error = FrameError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Ping),
            1 => Ok(Self::Pong),
            10 => Ok(Self::Request),
            11 => Ok(Self::Response),
            _ => Err(FrameError::UnknownType(value)),
        }
    }
}

/// Codec for length-prefixed frames
///
/// Wire format:
/// - 4 bytes: length (big-endian, includes type byte)
/// - 1 byte: frame type
/// - N bytes: payload
#[derive(Debug, Default)]
pub struct FrameCodec;

impl FrameCodec {
    pub fn new() -> Self {
        Self
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        // Need at least 5 bytes (4 length + 1 type)
        if src.len() < 5 {
            return Ok(None);
        }

        let length = u32::from_be_bytes([src[0], src[1], src[2], src[3]]) as usize;

        if length > MAX_FRAME_SIZE {
            return Err(FrameError::TooLarge(length));
        }
        if length == 0 {
            return Err(FrameError::UnknownType(0xff));
        }

        if src.len() < 4 + length {
            src.reserve(4 + length - src.len());
            return Ok(None);
        }

        src.advance(4);
        let frame_type = FrameType::try_from(src[0])?;
        src.advance(1);

        let payload = src.split_to(length - 1).to_vec();

        Ok(Some(Frame { frame_type, payload }))
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = FrameError;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let length = 1 + item.payload.len();
        if length > MAX_FRAME_SIZE {
            return Err(FrameError::TooLarge(length));
        }

        dst.reserve(4 + length);
        dst.put_u32(length as u32);
        dst.put_u8(item.frame_type as u8);
        dst.put_slice(&item.payload);

        Ok(())
    }
}

impl Frame {
    pub fn new(frame_type: FrameType, payload: Vec<u8>) -> Self {
        Self { frame_type, payload }
    }

    pub fn ping() -> Self {
        Self::new(FrameType::Ping, vec![])
    }

    pub fn pong() -> Self {
        Self::new(FrameType::Pong, vec![])
    }
}

/// API request
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Request {
    ChecksumExists { hash: String },
    GetChecksum { start: u64, stop: u64 },
}

/// Error classes reported to clients
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Request was malformed; retrying it unchanged will fail again
    Validation,
    /// Server-side storage failure
    Storage,
    /// Frame or payload could not be understood
    Malformed,
}

/// API response
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Response {
    Exists(bool),
    /// Hex digest, or `None` when the range is not published
    Checksum(Option<String>),
    Error { kind: ErrorKind, message: String },
}

impl Request {
    pub fn to_frame(&self) -> Result<Frame, FrameError> {
        Ok(Frame::new(FrameType::Request, postcard::to_allocvec(self)?))
    }

    pub fn from_frame(frame: &Frame) -> Result<Self, FrameError> {
        Ok(postcard::from_bytes(&frame.payload)?)
    }
}

impl Response {
    pub fn to_frame(&self) -> Result<Frame, FrameError> {
        Ok(Frame::new(FrameType::Response, postcard::to_allocvec(self)?))
    }

    pub fn from_frame(frame: &Frame) -> Result<Self, FrameError> {
        Ok(postcard::from_bytes(&frame.payload)?)
    }

    pub fn error(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self::Error {
            kind,
            message: message.into(),
        }
    }
}
