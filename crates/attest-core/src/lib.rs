//! msgindex attestation core library
//!
//! This crate provides the types shared by the checksumming daemon and its
//! clients: epoch ranges, log records, chunk digests, and the gap scan used
//! over both the message index and the checksum archive.
//!
//! # Modules
//!
//! - [`types`]: Epochs, ranges, log records, digests
//! - [`canonical`]: Deterministic record encoding for hashing
//! - [`crypto`]: Chunk digest derivation
//! - [`gaps`]: Forward gap scan over sorted intervals
//! - [`error`]: Error types

pub mod canonical;
pub mod crypto;
pub mod error;
pub mod gaps;
pub mod types;

pub use error::{Error, Result};
pub use types::*;
