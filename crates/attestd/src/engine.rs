//! Chunked checksum engine
//!
//! The engine walks the message log one chunk at a time:
//!
//! ```text
//! Idle -> WaitingForData -> Computing -> Publishing -> WaitingForData ...
//!                  \______________________________________/
//!                         Stopped (between iterations)
//! ```
//!
//! A chunk is only hashed once the source log reports it fully populated, and
//! the cursor only moves after the digest has been published. Cancellation is
//! observed at the top of each iteration and while backing off, never while a
//! digest is being computed or published.

use crate::archive::ChecksumArchive;
use crate::source_log::SourceLog;
use crate::storage::StorageError;
use attest_core::types::*;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, Instrument, Span};

/// Default wait before re-checking an unpopulated chunk
pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_secs(30);

/// Engine errors
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Source log error: {0}")]
    Source(#[source] StorageError),
    #[error("Checksum archive error: {0}")]
    Archive(#[source] StorageError),
    #[error("Checksum task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Engine lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EngineState {
    Idle = 0,
    WaitingForData = 1,
    Computing = 2,
    Publishing = 3,
    Stopped = 4,
}

impl EngineState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::WaitingForData,
            2 => Self::Computing,
            3 => Self::Publishing,
            4 => Self::Stopped,
            _ => Self::Idle,
        }
    }
}

/// Progress shared between the engine task and observers
#[derive(Debug)]
pub struct EngineStatus {
    cursor: AtomicU64,
    state: AtomicU8,
    published: AtomicU64,
}

impl EngineStatus {
    fn new(cursor: Epoch) -> Self {
        Self {
            cursor: AtomicU64::new(cursor),
            state: AtomicU8::new(EngineState::Idle as u8),
            published: AtomicU64::new(0),
        }
    }

    /// Next unchecksummed start epoch
    pub fn cursor(&self) -> Epoch {
        self.cursor.load(Ordering::Acquire)
    }

    pub fn state(&self) -> EngineState {
        EngineState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Chunks published since the engine started
    pub fn published(&self) -> u64 {
        self.published.load(Ordering::Acquire)
    }

    fn set_state(&self, state: EngineState) {
        self.state.store(state as u8, Ordering::Release);
    }
}

/// The checksumming state machine
pub struct ChecksumEngine {
    source: Arc<dyn SourceLog>,
    archive: Arc<dyn ChecksumArchive>,
    chunk_size: u64,
    backoff: Duration,
    status: Arc<EngineStatus>,
    span: Span,
}

impl ChecksumEngine {
    /// Create an engine resuming from the archive's next unpublished epoch.
    ///
    /// The chunk size is the archive's interval so every published range is
    /// one the read API accepts.
    pub fn new(
        source: Arc<dyn SourceLog>,
        archive: Arc<dyn ChecksumArchive>,
        backoff: Duration,
        span: Span,
    ) -> Result<Self, EngineError> {
        let cursor = archive.find_next_checksum().map_err(EngineError::Archive)?;
        let chunk_size = archive.interval().max(1);
        Ok(Self {
            source,
            archive,
            chunk_size,
            backoff,
            status: Arc::new(EngineStatus::new(cursor)),
            span,
        })
    }

    /// Shared progress handle
    pub fn status(&self) -> Arc<EngineStatus> {
        self.status.clone()
    }

    /// Run until cancelled or until a storage error occurs
    pub async fn run(self, cancel: CancellationToken) -> Result<(), EngineError> {
        let span = self.span.clone();
        let status = self.status.clone();
        let result = self.run_loop(cancel).instrument(span).await;
        status.set_state(EngineState::Stopped);
        result
    }

    /// Spawn the loop; a failure is delivered on the returned channel.
    ///
    /// The channel closes without a value when the loop stops on cancellation.
    pub fn spawn(self, cancel: CancellationToken) -> (JoinHandle<()>, mpsc::Receiver<EngineError>) {
        let (err_tx, err_rx) = mpsc::channel(1);
        let span = self.span.clone();
        let handle = tokio::spawn(async move {
            if let Err(e) = self.run(cancel).await {
                error!(parent: &span, "Checksum loop failed: {}", e);
                let _ = err_tx.send(e).await;
            }
            info!(parent: &span, "Checksum loop exited");
        });
        (handle, err_rx)
    }

    async fn run_loop(&self, cancel: CancellationToken) -> Result<(), EngineError> {
        let mut cursor = self.status.cursor();
        info!(cursor, chunk_size = self.chunk_size, "Starting checksum loop");

        loop {
            if cancel.is_cancelled() {
                return Ok(());
            }

            let range = EpochRange::chunk(cursor, self.chunk_size);

            self.status.set_state(EngineState::WaitingForData);
            let source = self.source.clone();
            let populated = tokio::task::spawn_blocking(move || {
                source.check_range_is_populated(range.start, range.stop)
            })
            .await?
            .map_err(EngineError::Source)?;
            if !populated {
                debug!(
                    start = range.start,
                    stop = range.stop,
                    "Chunk not yet populated, backing off"
                );
                tokio::select! {
                    _ = cancel.cancelled() => return Ok(()),
                    _ = tokio::time::sleep(self.backoff) => continue,
                }
            }

            self.status.set_state(EngineState::Computing);
            let source = self.source.clone();
            let digest = tokio::task::spawn_blocking(move || source.checksum(range.start, range.stop))
                .await?
                .map_err(EngineError::Source)?;

            self.status.set_state(EngineState::Publishing);
            let archive = self.archive.clone();
            tokio::task::spawn_blocking(move || {
                archive.publish_checksum(range.start, range.stop, digest)
            })
            .await?
            .map_err(EngineError::Archive)?;
            info!(
                start = range.start,
                stop = range.stop,
                digest = %digest,
                "Published checksum"
            );

            cursor = range.stop.saturating_add(1);
            self.status.cursor.store(cursor, Ordering::Release);
            self.status.published.fetch_add(1, Ordering::AcqRel);
        }
    }
}
