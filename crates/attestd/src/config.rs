//! Configuration for attestd

use attest_core::types::DEFAULT_CHUNK_SIZE;
use clap::{ArgAction, Parser, ValueEnum};
use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Default API port
pub const DEFAULT_SERVER_PORT: u16 = 8087;

/// Configuration errors (fatal at startup)
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("a checksums database directory path must be provided")]
    MissingChecksumDir,
    #[error("if checksumming is enabled, a source msgindex directory path must be provided")]
    MissingMsgIndexDir,
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Pretty,
    Json,
}

/// attestd - msgindex chunk checksumming and checksum API
#[derive(Parser, Debug, Clone)]
#[command(name = "attestd")]
#[command(author, version, about = "Generate msgindex checksums and/or serve persisted checksums")]
pub struct Config {
    /// Directory holding the source message index
    #[arg(long, env = "MSG_INDEX_DB_DIRECTORY")]
    pub msg_index_dir: Option<PathBuf>,

    /// Directory holding (or to hold) the checksums database
    #[arg(long, env = "CHECKSUM_DB_DIRECTORY")]
    pub checksum_dir: Option<PathBuf>,

    /// Epoch range size to checksum over (0 selects the default)
    #[arg(long, env = "CHECKSUM_CHUNK_SIZE", default_value_t = DEFAULT_CHUNK_SIZE)]
    pub chunk_size: u64,

    /// Run the background checksummer
    #[arg(long, env = "SUPPORTS_CHECKSUMMING", default_value_t = true, action = ArgAction::Set)]
    pub checksum_on: bool,

    /// Serve the checksum API
    #[arg(long, env = "SUPPORTS_SERVER", default_value_t = false, action = ArgAction::Set)]
    pub server_on: bool,

    /// Port for the checksum API
    #[arg(long, env = "SERVER_PORT", default_value_t = DEFAULT_SERVER_PORT)]
    pub server_port: u16,

    /// Scan an existing archive for gaps before checksumming
    #[arg(long, env = "CHECK_FOR_GAPS")]
    pub check_for_gaps: bool,

    /// Seconds to wait before re-checking an unpopulated chunk
    #[arg(long, env = "RETRY_BACKOFF_SECS", default_value_t = 30)]
    pub retry_backoff_secs: u64,

    /// Log format
    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Pretty)]
    pub log_format: LogFormat,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,
}

impl Config {
    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.checksum_dir.is_none() {
            return Err(ConfigError::MissingChecksumDir);
        }
        if self.checksum_on && self.msg_index_dir.is_none() {
            return Err(ConfigError::MissingMsgIndexDir);
        }
        Ok(())
    }

    /// Chunk size with the zero fallback applied
    pub fn effective_chunk_size(&self) -> u64 {
        if self.chunk_size == 0 {
            DEFAULT_CHUNK_SIZE
        } else {
            self.chunk_size
        }
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_secs(self.retry_backoff_secs)
    }

    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::from((Ipv4Addr::UNSPECIFIED, self.server_port))
    }
}
