//! Key capability abstractions for the Sable agent.
//!
//! Private key material never flows through the engine as plain byte
//! buffers: the agreement pipeline only sees the [`KeyExchange`] capability
//! and the signed packing mode only sees the [`Signer`] capability. Local
//! in-memory implementations are provided here; HSM- or KMS-backed keys
//! implement the same traits without any change to the rest of the engine.

use crate::crypto::agreement::{self, X25519_KEY_LEN};
use crate::error::{Error, Result};
use async_trait::async_trait;
use ed25519_dalek::Signer as Ed25519Signer;
use rand::{CryptoRng, RngCore};
use std::fmt::{self, Debug};
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::Zeroize;

/// Capability to run X25519 key agreement against a peer public key.
///
/// Implementations must reject peer keys that are not exactly 32 bytes
/// before performing any curve operation.
pub trait KeyExchange: Send + Sync + Debug {
    /// Compute the shared secret with the given peer public key.
    fn shared_secret(&self, peer_public: &[u8]) -> Result<[u8; 32]>;
}

/// JWS algorithm identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JwsAlgorithm {
    /// Ed25519 signatures
    EdDSA,
}

impl JwsAlgorithm {
    /// Returns the algorithm identifier as a string
    pub fn as_str(&self) -> &'static str {
        match self {
            JwsAlgorithm::EdDSA => "EdDSA",
        }
    }
}

/// Capability to sign data for the signed packing mode.
///
/// Signing may be remote (and therefore suspend), so the operation is
/// async; everything else about the key stays opaque to the engine.
#[async_trait]
pub trait Signer: Send + Sync + Debug {
    /// The key id advertised in the signature header
    fn key_id(&self) -> &str;

    /// The JWS algorithm this key signs with
    fn algorithm(&self) -> JwsAlgorithm;

    /// Sign the provided data
    async fn sign(&self, data: &[u8]) -> Result<Vec<u8>>;
}

/// An X25519 key agreement key held in local memory.
///
/// The secret half is wiped when the key is dropped.
#[derive(Clone)]
pub struct LocalKey {
    kid: Option<String>,
    secret: StaticSecret,
    public: [u8; X25519_KEY_LEN],
}

impl LocalKey {
    /// Generate a new key from the given CSPRNG.
    pub fn generate<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        let secret = StaticSecret::random_from_rng(&mut *rng);
        let public = PublicKey::from(&secret).to_bytes();
        Self {
            kid: None,
            secret,
            public,
        }
    }

    /// Build a key from raw secret scalar bytes.
    pub fn from_secret_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != X25519_KEY_LEN {
            return Err(Error::InvalidKeyLength {
                expected: X25519_KEY_LEN,
                actual: bytes.len(),
            });
        }
        let mut raw = [0u8; X25519_KEY_LEN];
        raw.copy_from_slice(bytes);
        let secret = StaticSecret::from(raw);
        raw.zeroize();
        let public = PublicKey::from(&secret).to_bytes();
        Ok(Self {
            kid: None,
            secret,
            public,
        })
    }

    /// Builder method to attach a key id.
    pub fn with_kid(mut self, kid: &str) -> Self {
        self.kid = Some(kid.to_string());
        self
    }

    /// The key id, if one was assigned.
    pub fn key_id(&self) -> Option<&str> {
        self.kid.as_deref()
    }

    /// The X25519 public key.
    pub fn public_key(&self) -> [u8; X25519_KEY_LEN] {
        self.public
    }
}

impl Debug for LocalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalKey")
            .field("kid", &self.kid)
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

impl KeyExchange for LocalKey {
    fn shared_secret(&self, peer_public: &[u8]) -> Result<[u8; 32]> {
        agreement::x25519(&self.secret, peer_public)
    }
}

/// An Ed25519 signing key held in local memory.
#[derive(Clone)]
pub struct LocalSigner {
    kid: String,
    signing_key: ed25519_dalek::SigningKey,
}

impl LocalSigner {
    /// Generate a new signing key from the given CSPRNG.
    pub fn generate<R: RngCore + CryptoRng>(kid: &str, rng: &mut R) -> Self {
        Self {
            kid: kid.to_string(),
            signing_key: ed25519_dalek::SigningKey::generate(rng),
        }
    }

    /// Build a signing key from raw secret bytes.
    pub fn from_secret_bytes(kid: &str, bytes: &[u8]) -> Result<Self> {
        if bytes.len() != ed25519_dalek::SECRET_KEY_LENGTH {
            return Err(Error::InvalidKeyLength {
                expected: ed25519_dalek::SECRET_KEY_LENGTH,
                actual: bytes.len(),
            });
        }
        let mut raw = [0u8; ed25519_dalek::SECRET_KEY_LENGTH];
        raw.copy_from_slice(bytes);
        let signing_key = ed25519_dalek::SigningKey::from_bytes(&raw);
        raw.zeroize();
        Ok(Self {
            kid: kid.to_string(),
            signing_key,
        })
    }

    /// The Ed25519 public key used to verify signatures from this key.
    pub fn verifying_key(&self) -> [u8; 32] {
        self.signing_key.verifying_key().to_bytes()
    }
}

impl Debug for LocalSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalSigner")
            .field("kid", &self.kid)
            .field("signing_key", &"[REDACTED]")
            .finish()
    }
}

#[async_trait]
impl Signer for LocalSigner {
    fn key_id(&self) -> &str {
        &self.kid
    }

    fn algorithm(&self) -> JwsAlgorithm {
        JwsAlgorithm::EdDSA
    }

    async fn sign(&self, data: &[u8]) -> Result<Vec<u8>> {
        Ok(self.signing_key.sign(data).to_vec())
    }
}
