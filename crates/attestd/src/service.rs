//! Attestation service: composition root and lifecycle

use crate::api::ReadApi;
use crate::archive::{ChecksumArchive, SledArchive};
use crate::config::{Config, ConfigError};
use crate::engine::{ChecksumEngine, EngineError, EngineStatus};
use crate::server::{Server, ServerError};
use crate::source_log::{MsgIndexLog, SourceLog};
use crate::storage::StorageError;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Span};

/// Service errors
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),
    #[error("Server error: {0}")]
    Server(#[from] ServerError),
    #[error("cannot checksum without a source message index")]
    NoSourceLog,
    #[error("checksumming is already running")]
    AlreadyChecksumming,
    #[error("checksum task panicked: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Settings the service needs beyond its storage handles
#[derive(Debug, Clone)]
pub struct ServiceSettings {
    /// Wait before re-checking an unpopulated chunk
    pub retry_backoff: Duration,
    /// Scan the archive for gaps before checksumming
    pub check_for_gaps: bool,
    /// Whether the archive existed before this process opened it
    pub archive_existed: bool,
}

/// Top-level attestation service
pub struct Service {
    source: Option<Arc<dyn SourceLog>>,
    archive: Arc<dyn ChecksumArchive>,
    api: Arc<ReadApi>,
    settings: ServiceSettings,
    shutdown: CancellationToken,
    engine_task: Mutex<Option<JoinHandle<()>>>,
    engine_status: Mutex<Option<Arc<EngineStatus>>>,
    span: Span,
}

impl Service {
    /// Open storage described by `config` and build the service.
    ///
    /// The source message index is only opened when checksumming is enabled.
    pub fn from_config(config: &Config, span: Span) -> Result<Self, ServiceError> {
        config.validate()?;
        let checksum_dir = config
            .checksum_dir
            .as_ref()
            .ok_or(ConfigError::MissingChecksumDir)?;

        let source: Option<Arc<dyn SourceLog>> = if config.checksum_on {
            let dir = config
                .msg_index_dir
                .as_ref()
                .ok_or(ConfigError::MissingMsgIndexDir)?;
            Some(Arc::new(MsgIndexLog::open(dir)?))
        } else {
            None
        };

        let (archive, existed) = SledArchive::open(checksum_dir, config.effective_chunk_size())?;
        info!(
            parent: &span,
            path = %checksum_dir.display(),
            existed,
            interval = archive.interval(),
            "Opened checksum archive"
        );

        let settings = ServiceSettings {
            retry_backoff: config.retry_backoff(),
            check_for_gaps: config.check_for_gaps,
            archive_existed: existed,
        };
        Ok(Self::new(source, Arc::new(archive), settings, span))
    }

    /// Build from pre-opened storage handles
    pub fn new(
        source: Option<Arc<dyn SourceLog>>,
        archive: Arc<dyn ChecksumArchive>,
        settings: ServiceSettings,
        span: Span,
    ) -> Self {
        Self {
            source,
            api: Arc::new(ReadApi::new(archive.clone())),
            archive,
            settings,
            shutdown: CancellationToken::new(),
            engine_task: Mutex::new(None),
            engine_status: Mutex::new(None),
            span,
        }
    }

    /// The read API, for transports other than the built-in server
    pub fn api(&self) -> Arc<ReadApi> {
        self.api.clone()
    }

    /// Token that stops every loop this service started
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Progress of the checksum loop, once started
    pub fn engine_status(&self) -> Option<Arc<EngineStatus>> {
        self.engine_status.lock().clone()
    }

    /// Launch the checksum loop in the background.
    ///
    /// Returns immediately; a loop failure arrives on the returned channel.
    pub fn start_checksumming(&self) -> Result<mpsc::Receiver<EngineError>, ServiceError> {
        let source = self.source.clone().ok_or(ServiceError::NoSourceLog)?;
        let mut task = self.engine_task.lock();
        if task.is_some() {
            return Err(ServiceError::AlreadyChecksumming);
        }

        let engine = ChecksumEngine::new(
            source,
            self.archive.clone(),
            self.settings.retry_backoff,
            self.span.clone(),
        )?;
        let cursor = engine.status().cursor();

        if self.settings.check_for_gaps && self.settings.archive_existed && cursor > 0 {
            self.report_archive_gaps(cursor - 1)?;
        }

        *self.engine_status.lock() = Some(engine.status());
        let (handle, errors) = engine.spawn(self.shutdown.child_token());
        *task = Some(handle);
        info!(parent: &self.span, cursor, "Checksumming started");
        Ok(errors)
    }

    fn report_archive_gaps(&self, through: u64) -> Result<(), ServiceError> {
        let gaps = self.archive.find_gaps(Some(0), Some(through))?;
        if gaps.is_empty() {
            info!(parent: &self.span, through, "No gaps in checksum archive");
        }
        for gap in gaps {
            warn!(
                parent: &self.span,
                start = gap.start,
                stop = gap.stop,
                "Gap in checksum archive"
            );
        }
        Ok(())
    }

    /// Serve the read API on `listener` until the service shuts down
    pub async fn start_serving(&self, listener: TcpListener) -> Result<(), ServiceError> {
        let server = Server::new(self.api.clone(), self.span.clone());
        server.run(listener, self.shutdown.child_token()).await?;
        Ok(())
    }

    /// Stop the loops, then close the source log and the archive.
    ///
    /// Every step is attempted; the first error is returned.
    pub async fn close(&self) -> Result<(), ServiceError> {
        self.shutdown.cancel();
        let mut first: Option<ServiceError> = None;

        let task = self.engine_task.lock().take();
        if let Some(handle) = task {
            if let Err(e) = handle.await {
                warn!(parent: &self.span, "Checksum task did not exit cleanly: {}", e);
                first.get_or_insert(ServiceError::Join(e));
            }
        }

        if let Some(source) = &self.source {
            if let Err(e) = source.close() {
                warn!(parent: &self.span, "Failed to close source log: {}", e);
                first.get_or_insert(e.into());
            }
        }

        if let Err(e) = self.archive.close() {
            warn!(parent: &self.span, "Failed to close checksum archive: {}", e);
            first.get_or_insert(e.into());
        }

        info!(parent: &self.span, "Attestation service closed");
        match first {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
