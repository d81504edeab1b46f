//! Client for the checksum API

use crate::wire::{ErrorKind, Frame, FrameCodec, FrameError, FrameType, Request, Response};
use attest_core::types::{Digest, Epoch};
use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio_util::codec::Framed;

/// Client errors
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),
    #[error("Connection closed")]
    ConnectionClosed,
    #[error("Server rejected request ({kind:?}): {message}")]
    Remote { kind: ErrorKind, message: String },
    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),
    #[error("Invalid digest from server: {0}")]
    InvalidDigest(#[from] attest_core::Error),
}

/// One connection to an attestd checksum API
pub struct AttestClient {
    framed: Framed<TcpStream, FrameCodec>,
}

impl AttestClient {
    pub async fn connect(addr: impl ToSocketAddrs) -> Result<Self, ClientError> {
        let stream = TcpStream::connect(addr).await?;
        Ok(Self {
            framed: Framed::new(stream, FrameCodec::new()),
        })
    }

    async fn roundtrip(&mut self, frame: Frame) -> Result<Frame, ClientError> {
        self.framed.send(frame).await?;
        match self.framed.next().await {
            Some(frame) => Ok(frame?),
            None => Err(ClientError::ConnectionClosed),
        }
    }

    async fn call(&mut self, request: Request) -> Result<Response, ClientError> {
        let frame = self.roundtrip(request.to_frame()?).await?;
        if frame.frame_type != FrameType::Response {
            return Err(ClientError::UnexpectedResponse(format!(
                "frame type {:?}",
                frame.frame_type
            )));
        }
        match Response::from_frame(&frame)? {
            Response::Error { kind, message } => Err(ClientError::Remote { kind, message }),
            response => Ok(response),
        }
    }

    /// Keepalive check
    pub async fn ping(&mut self) -> Result<(), ClientError> {
        let frame = self.roundtrip(Frame::ping()).await?;
        match frame.frame_type {
            FrameType::Pong => Ok(()),
            other => Err(ClientError::UnexpectedResponse(format!("frame type {:?}", other))),
        }
    }

    pub async fn checksum_exists(&mut self, hash: &str) -> Result<bool, ClientError> {
        match self
            .call(Request::ChecksumExists {
                hash: hash.to_string(),
            })
            .await?
        {
            Response::Exists(exists) => Ok(exists),
            other => Err(ClientError::UnexpectedResponse(format!("{:?}", other))),
        }
    }

    pub async fn get_checksum(
        &mut self,
        start: Epoch,
        stop: Epoch,
    ) -> Result<Option<Digest>, ClientError> {
        match self.call(Request::GetChecksum { start, stop }).await? {
            Response::Checksum(Some(hex)) => Ok(Some(hex.parse()?)),
            Response::Checksum(None) => Ok(None),
            other => Err(ClientError::UnexpectedResponse(format!("{:?}", other))),
        }
    }
}
