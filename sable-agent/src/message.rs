//! Wire-level message types for the Sable agent.
//!
//! This module holds the security mode selector and the signed-message
//! structures. The encrypted envelope lives in [`crate::envelope`]; the
//! plaintext message model lives in `sable-msg`.

use serde::{Deserialize, Serialize};

/// Media type carried in the protected header of signed messages.
pub const SIGNED_TYP: &str = "application/sable-signed+json";

/// Media type carried in the protected header of encrypted messages.
pub const ENCRYPTED_TYP: &str = "application/sable-encrypted+json";

/// Security mode for message packing.
///
/// The mode is always selected explicitly by the caller when packing;
/// unpacking detects the mode from the shape of the wire message instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecurityMode {
    /// Plaintext - no encryption or signatures
    Plain,
    /// Signed - message is signed but not encrypted
    Signed,
    /// Authenticated encryption - recipients can verify who sent it
    AuthCrypt,
    /// Anonymous encryption - nothing identifies the sender
    AnonCrypt,
}

/// A signed message in general JWS JSON serialization.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Jws {
    /// base64url-encoded message payload
    pub payload: String,
    /// One or more signatures over the payload
    pub signatures: Vec<JwsSignature>,
}

/// A single signature entry of a [`Jws`].
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct JwsSignature {
    /// base64url-encoded protected header
    pub protected: String,
    /// base64url-encoded signature over `protected || '.' || payload`
    pub signature: String,
    /// Unprotected header
    pub header: JwsHeader,
}

/// Unprotected per-signature header.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct JwsHeader {
    /// Id of the key that produced the signature
    pub kid: String,
}

/// Protected header of a [`Jws`] signature.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct JwsProtected {
    /// Media type of the signed message
    pub typ: String,
    /// Signature algorithm
    pub alg: String,
}
