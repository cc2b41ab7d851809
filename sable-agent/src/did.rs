//! DID resolution boundary.
//!
//! The engine never turns an identifier into key material itself: that is
//! the job of an external resolver. Only two lookups are consumed here,
//! the sender's key agreement key when an envelope carries `skid` and a
//! signer's verification key when checking a signed message. Recipient
//! keys are always supplied explicitly by the caller.

use crate::error::{Error, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt::Debug;

/// Resolves identifiers to public key material.
#[async_trait]
pub trait DidResolver: Send + Sync + Debug {
    /// Resolve an identifier to an X25519 key agreement public key.
    async fn resolve_key_agreement(&self, id: &str) -> Result<[u8; 32]>;

    /// Resolve an identifier to an Ed25519 verification public key.
    async fn resolve_verification(&self, id: &str) -> Result<[u8; 32]>;
}

/// An in-memory resolver over a fixed key set.
///
/// Useful for tests and for deployments where the peer set is known up
/// front; anything dynamic should implement [`DidResolver`] against a real
/// resolution backend.
#[derive(Debug, Default, Clone)]
pub struct StaticResolver {
    key_agreement: HashMap<String, [u8; 32]>,
    verification: HashMap<String, [u8; 32]>,
}

impl StaticResolver {
    /// Create an empty resolver.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method to register a key agreement key.
    pub fn with_key_agreement(mut self, id: &str, key: [u8; 32]) -> Self {
        self.key_agreement.insert(id.to_string(), key);
        self
    }

    /// Builder method to register a verification key.
    pub fn with_verification(mut self, id: &str, key: [u8; 32]) -> Self {
        self.verification.insert(id.to_string(), key);
        self
    }
}

#[async_trait]
impl DidResolver for StaticResolver {
    async fn resolve_key_agreement(&self, id: &str) -> Result<[u8; 32]> {
        self.key_agreement
            .get(id)
            .copied()
            .ok_or_else(|| Error::DidResolution(format!("no key agreement key for {}", id)))
    }

    async fn resolve_verification(&self, id: &str) -> Result<[u8; 32]> {
        self.verification
            .get(id)
            .copied()
            .ok_or_else(|| Error::DidResolution(format!("no verification key for {}", id)))
    }
}
