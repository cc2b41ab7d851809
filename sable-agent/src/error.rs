//! Error handling for the Sable agent engine.
//!
//! Configuration and format errors carry enough detail to log verbatim.
//! Cryptographic failures deliberately do not: every tag mismatch, key-wrap
//! integrity failure or wrong-key attempt collapses into the bare
//! [`Error::DecryptionFailed`] so an attacker observing errors learns
//! nothing about why an envelope was rejected.

use thiserror::Error;

/// Type alias for Results with Sable agent errors
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for the Sable agent engine
#[derive(Error, Debug)]
pub enum Error {
    /// Message model errors
    #[error("Message error: {0}")]
    Message(#[from] sable_msg::error::Error),

    /// A key was not the exact length its algorithm requires
    #[error("Invalid key length: expected {expected} bytes, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    /// Decryption failed
    #[error("Decryption failed")]
    DecryptionFailed,

    /// Structurally malformed envelope
    #[error("Envelope format error: {0}")]
    EnvelopeFormat(String),

    /// Unknown or unsupported algorithm identifier
    #[error("Unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// Encrypters declaring different content algorithms passed into one build call
    #[error("Incompatible encrypters: mixed content encryption algorithms")]
    IncompatibleEncrypters,

    /// No supplied key reference matches any envelope recipient
    #[error("Key not found: {0}")]
    KeyNotFound(String),

    /// Forwarding hop limit exceeded
    #[error("Forwarding loop detected: exceeded {max_hops} hops")]
    LoopDetected { max_hops: usize },

    /// Error related to cryptographic operations
    #[error("Cryptography error: {0}")]
    Cryptography(String),

    /// Signature verification failed
    #[error("Signature verification failed")]
    SignatureVerification,

    /// Validation errors
    #[error("Validation error: {0}")]
    Validation(String),

    /// DID resolution errors
    #[error("DID resolution error: {0}")]
    DidResolution(String),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
