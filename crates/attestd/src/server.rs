//! TCP transport for the read API

use crate::api::{ApiError, ReadApi};
use crate::wire::{ErrorKind, Frame, FrameCodec, FrameError, FrameType, Request, Response};
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Instrument, Span};

/// Server errors
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),
}

/// Answer one request against the API
pub fn dispatch(api: &ReadApi, request: Request) -> Response {
    let result = match request {
        Request::ChecksumExists { hash } => api.checksum_exists(&hash).map(Response::Exists),
        Request::GetChecksum { start, stop } => api
            .get_checksum(start, stop)
            .map(|digest| Response::Checksum(digest.map(|d| d.to_hex()))),
    };

    match result {
        Ok(response) => response,
        Err(ApiError::Validation(e)) => Response::error(ErrorKind::Validation, e.to_string()),
        Err(ApiError::Storage(e)) => {
            error!("Storage error while serving request: {}", e);
            Response::error(ErrorKind::Storage, e.to_string())
        }
    }
}

/// Accept loop serving a [`ReadApi`]
pub struct Server {
    api: Arc<ReadApi>,
    span: Span,
}

impl Server {
    pub fn new(api: Arc<ReadApi>, span: Span) -> Self {
        Self { api, span }
    }

    /// Serve connections from `listener` until `shutdown` fires
    pub async fn run(&self, listener: TcpListener, shutdown: CancellationToken) -> Result<(), ServerError> {
        let local = listener.local_addr()?;
        info!(parent: &self.span, "Serving checksum API on {}", local);

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            debug!(parent: &self.span, "Accepted connection from {}", addr);
                            let api = self.api.clone();
                            let shutdown = shutdown.clone();
                            let span = self.span.clone();
                            tokio::spawn(async move {
                                if let Err(e) = handle_connection(api, stream, addr, shutdown).await {
                                    warn!("Connection error from {}: {}", addr, e);
                                }
                            }.instrument(span));
                        }
                        Err(e) => {
                            error!(parent: &self.span, "Accept error: {}", e);
                        }
                    }
                }
                _ = shutdown.cancelled() => {
                    info!(parent: &self.span, "Checksum API shutting down");
                    break;
                }
            }
        }

        Ok(())
    }
}

async fn handle_connection(
    api: Arc<ReadApi>,
    stream: TcpStream,
    addr: SocketAddr,
    shutdown: CancellationToken,
) -> Result<(), ServerError> {
    let mut framed = Framed::new(stream, FrameCodec::new());

    loop {
        let frame = tokio::select! {
            next = framed.next() => match next {
                Some(frame) => frame?,
                None => break,
            },
            _ = shutdown.cancelled() => break,
        };

        let reply = match frame.frame_type {
            FrameType::Ping => Frame::pong(),
            FrameType::Request => {
                let response = match Request::from_frame(&frame) {
                    Ok(request) => {
                        debug!("Request from {}: {:?}", addr, request);
                        dispatch(&api, request)
                    }
                    Err(e) => Response::error(ErrorKind::Malformed, e.to_string()),
                };
                response.to_frame()?
            }
            other => Response::error(
                ErrorKind::Malformed,
                format!("unexpected frame type {:?}", other),
            )
            .to_frame()?,
        };
        framed.send(reply).await?;
    }

    debug!("Connection from {} closed", addr);
    Ok(())
}
