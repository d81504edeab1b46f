//! Error types for attestation core

use thiserror::Error;

/// Result type alias using our Error
pub type Result<T> = std::result::Result<T, Error>;

/// Attestation core error types
#[derive(Debug, Error)]
pub enum Error {
    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] postcard::Error),

    /// Range with start greater than stop
    #[error("invalid range: start epoch {start} is greater than stop epoch {stop}")]
    InvalidRange { start: u64, stop: u64 },

    /// Records fed to a chunk digest out of cid order
    #[error("records out of order: {next} after {previous}")]
    OutOfOrder { previous: String, next: String },

    /// Digest that is not 32 bytes of hex
    #[error("invalid digest: {0}")]
    InvalidDigest(String),
}
