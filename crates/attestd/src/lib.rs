//! attestd - msgindex chunk checksumming daemon
//!
//! This daemon provides:
//! - A read-only view over the message index (population, gaps, digests)
//! - A persistent archive of published chunk checksums
//! - The checksum engine that walks the log chunk by chunk
//! - A TCP read API over the archive, plus a client for it

pub mod api;
pub mod archive;
pub mod client;
pub mod config;
pub mod engine;
pub mod server;
pub mod service;
pub mod source_log;
pub mod storage;
pub mod wire;

#[cfg(test)]
mod testing;

pub use api::ReadApi;
pub use archive::{ChecksumArchive, SledArchive};
pub use client::AttestClient;
pub use config::Config;
pub use engine::ChecksumEngine;
pub use server::Server;
pub use service::Service;
pub use source_log::{MsgIndexLog, SourceLog};
pub use storage::MessageIndex;
