//! Sable agent engine.
//!
//! This crate turns plaintext protocol messages into wire messages and
//! back: plain JSON, signed, authenticated-encrypted ("authcrypt") or
//! anonymous-encrypted ("anoncrypt"). Encryption uses multi-recipient
//! envelopes built from X25519 key agreement, a Concat KDF, authenticated
//! content encryption and per-recipient key wrapping.
//!
//! Key custody, DID resolution and transport stay outside this crate and
//! are reached through the [`agent_key::KeyExchange`], [`agent_key::Signer`]
//! and [`did::DidResolver`] capabilities.

/// Key capability abstractions
pub mod agent_key;

/// Unpacking configuration
pub mod config;

/// Cryptographic building blocks
pub mod crypto;

/// DID resolution boundary
pub mod did;

/// Encrypted envelope construction and parsing
pub mod envelope;

/// Error types
pub mod error;

/// Wire-level message types
pub mod message;

/// Packing and unpacking of protocol messages
pub mod message_packing;

// Re-export key types for convenience
pub use agent_key::{JwsAlgorithm, KeyExchange, LocalKey, LocalSigner, Signer};
pub use config::UnpackConfig;
pub use crypto::content::ContentAlgorithm;
pub use crypto::key_wrap::KeyWrapAlgorithm;
pub use did::{DidResolver, StaticResolver};
pub use envelope::{Decrypter, Encrypter, Envelope, Sender};
pub use error::{Error, Result};
pub use message::SecurityMode;
pub use message_packing::{MessagePacker, PackOptions};

/// Version of the Sable agent engine
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
