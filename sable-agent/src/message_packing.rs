//! Message packing and unpacking.
//!
//! The packer turns a plaintext protocol message into one of four wire
//! renditions (plain, signed, authenticated-encrypted or
//! anonymous-encrypted), selected explicitly by the caller. The unpacker
//! detects the rendition from the wire shape, tries the caller's key
//! references against the envelope's recipient list and unwraps `forward`
//! routing messages up to a configured hop limit.
//!
//! This is the only layer that performs I/O: resolving a sender's `skid`
//! or a signer's verification key goes through the [`DidResolver`]
//! collaborator and may suspend. The cryptographic pipeline around it is
//! synchronous and runs to completion once started.

use crate::agent_key::Signer;
use crate::config::UnpackConfig;
use crate::did::DidResolver;
use crate::envelope::{self, Decrypter, Encrypter, Envelope, Sender};
use crate::error::{Error, Result};
use crate::message::{Jws, JwsHeader, JwsProtected, JwsSignature, SecurityMode, SIGNED_TYP};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use sable_msg::message::{AttachmentData, PlainMessage};
use std::sync::Arc;
use tracing::debug;

/// Options for packing a message.
#[derive(Debug, Clone, Default)]
pub struct PackOptions {
    mode: Option<SecurityMode>,
    signer: Option<Arc<dyn Signer>>,
    sender: Option<Sender>,
    recipients: Vec<Encrypter>,
    extra_aad: Option<Vec<u8>>,
}

impl PackOptions {
    /// Create new packing options. A mode must be selected explicitly.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set to plain mode (no protection).
    pub fn with_plain(mut self) -> Self {
        self.mode = Some(SecurityMode::Plain);
        self
    }

    /// Set to signed mode with the given signing capability.
    pub fn with_signed(mut self, signer: Arc<dyn Signer>) -> Self {
        self.mode = Some(SecurityMode::Signed);
        self.signer = Some(signer);
        self
    }

    /// Set to authenticated encryption with the given sender key.
    pub fn with_auth_crypt(mut self, sender: Sender) -> Self {
        self.mode = Some(SecurityMode::AuthCrypt);
        self.sender = Some(sender);
        self
    }

    /// Set to anonymous encryption.
    pub fn with_anon_crypt(mut self) -> Self {
        self.mode = Some(SecurityMode::AnonCrypt);
        self
    }

    /// Add a recipient for the encrypted modes.
    pub fn with_recipient(mut self, encrypter: Encrypter) -> Self {
        self.recipients.push(encrypter);
        self
    }

    /// Attach extra authenticated data to the envelope.
    pub fn with_aad(mut self, aad: &[u8]) -> Self {
        self.extra_aad = Some(aad.to_vec());
        self
    }

    /// The selected security mode, if any.
    pub fn security_mode(&self) -> Option<SecurityMode> {
        self.mode
    }
}

/// Packs and unpacks protocol messages.
#[derive(Debug, Clone)]
pub struct MessagePacker {
    resolver: Arc<dyn DidResolver>,
    config: UnpackConfig,
}

impl MessagePacker {
    /// Create a packer using the given resolver and default configuration.
    pub fn new(resolver: Arc<dyn DidResolver>) -> Self {
        Self {
            resolver,
            config: UnpackConfig::default(),
        }
    }

    /// Builder method to override the unpack configuration.
    pub fn with_config(mut self, config: UnpackConfig) -> Self {
        self.config = config;
        self
    }

    /// Pack a message for transmission in the selected security mode.
    pub async fn pack(&self, message: &PlainMessage, options: &PackOptions) -> Result<String> {
        message.validate().map_err(Error::Message)?;

        let mode = options.mode.ok_or_else(|| {
            Error::Validation("packing requires an explicit security mode".to_string())
        })?;
        debug!(mode = ?mode, id = %message.id, "packing message");

        match mode {
            SecurityMode::Plain => Ok(serde_json::to_string(message)?),
            SecurityMode::Signed => {
                let signer = options.signer.as_ref().ok_or_else(|| {
                    Error::Validation("signed mode requires a signer".to_string())
                })?;
                let jws = sign_message(message, signer.as_ref()).await?;
                Ok(serde_json::to_string(&jws)?)
            }
            SecurityMode::AuthCrypt => {
                let sender = options.sender.as_ref().ok_or_else(|| {
                    Error::Validation("authcrypt mode requires a sender key".to_string())
                })?;
                if options
                    .recipients
                    .iter()
                    .any(|r| !r.key_wrap_algorithm().is_authenticated())
                {
                    return Err(Error::Validation(
                        "authcrypt mode requires ECDH-1PU recipients".to_string(),
                    ));
                }
                let envelope = envelope::encrypt(
                    &serde_json::to_vec(message)?,
                    &options.recipients,
                    Some(sender),
                    options.extra_aad.as_deref(),
                    &mut OsRng,
                )?;
                envelope.to_json()
            }
            SecurityMode::AnonCrypt => {
                if options.sender.is_some() {
                    return Err(Error::Validation(
                        "anoncrypt mode must not carry a sender key".to_string(),
                    ));
                }
                if options
                    .recipients
                    .iter()
                    .any(|r| r.key_wrap_algorithm().is_authenticated())
                {
                    return Err(Error::Validation(
                        "anoncrypt mode requires ECDH-ES recipients".to_string(),
                    ));
                }
                let envelope = envelope::encrypt(
                    &serde_json::to_vec(message)?,
                    &options.recipients,
                    None,
                    options.extra_aad.as_deref(),
                    &mut OsRng,
                )?;
                envelope.to_json()
            }
        }
    }

    /// Unpack a wire message, trying the supplied key references.
    ///
    /// `forward` routing messages are unwrapped transparently; each nested
    /// hop consumes one unit of the configured hop budget and exhausting
    /// it fails with [`Error::LoopDetected`].
    pub async fn unpack(&self, packed: &str, keys: &[Decrypter]) -> Result<PlainMessage> {
        let mut raw = packed.to_string();
        let mut hops_left = self.config.max_forward_hops;

        loop {
            let message = self.unpack_once(&raw, keys).await?;
            if !message.is_forward() {
                return Ok(message);
            }
            if hops_left == 0 {
                return Err(Error::LoopDetected {
                    max_hops: self.config.max_forward_hops,
                });
            }
            hops_left -= 1;
            debug!(hops_left, "unwrapping forward message");

            raw = match message.forward_attachment().map_err(Error::Message)? {
                AttachmentData::Json { json } => serde_json::to_string(json)?,
                AttachmentData::Base64 { base64 } => {
                    let bytes = URL_SAFE_NO_PAD.decode(base64).map_err(|_| {
                        Error::EnvelopeFormat(
                            "forward attachment is not valid base64url".to_string(),
                        )
                    })?;
                    String::from_utf8(bytes).map_err(|_| {
                        Error::EnvelopeFormat("forward attachment is not UTF-8".to_string())
                    })?
                }
            };
        }
    }

    /// Unpack a single wire message, without following forwards.
    async fn unpack_once(&self, raw: &str, keys: &[Decrypter]) -> Result<PlainMessage> {
        let value: serde_json::Value = serde_json::from_str(raw)
            .map_err(|_| Error::EnvelopeFormat("wire message is not valid JSON".to_string()))?;

        if value.get("ciphertext").is_some() {
            let envelope: Envelope = serde_json::from_value(value)
                .map_err(|_| Error::EnvelopeFormat("malformed envelope".to_string()))?;
            let plaintext = self.decrypt_envelope(&envelope, keys).await?;
            Ok(serde_json::from_slice(&plaintext)?)
        } else if value.get("signatures").is_some() {
            let jws: Jws = serde_json::from_value(value)
                .map_err(|_| Error::EnvelopeFormat("malformed signed message".to_string()))?;
            self.verify_jws(&jws).await
        } else {
            Ok(serde_json::from_value(value)?)
        }
    }

    /// Decrypt an envelope with the first key reference that opens it.
    async fn decrypt_envelope(&self, envelope: &Envelope, keys: &[Decrypter]) -> Result<Vec<u8>> {
        envelope.validate()?;

        if keys.is_empty() {
            return Err(Error::KeyNotFound("no key references supplied".to_string()));
        }

        let protected = envelope.parse_protected()?;
        let sender_public = match protected.skid.as_deref() {
            Some(skid) => {
                debug!(skid, "resolving sender key for authenticated envelope");
                Some(self.resolve_key_agreement(skid).await?)
            }
            None => None,
        };

        // Keys whose kid matches a recipient entry go first; keys without a
        // declared kid are still worth trying against anonymous entries.
        let matches_some_recipient = |decrypter: &&Decrypter| {
            decrypter.kid().is_some_and(|kid| {
                envelope
                    .recipients
                    .iter()
                    .any(|r| r.header.kid.as_deref() == Some(kid))
            })
        };
        let matched: Vec<&Decrypter> = keys.iter().filter(matches_some_recipient).collect();

        let all_recipients_declare_kids = envelope
            .recipients
            .iter()
            .all(|r| r.header.kid.is_some());
        if all_recipients_declare_kids && matched.is_empty() {
            return Err(Error::KeyNotFound(
                "no supplied key reference matches any recipient".to_string(),
            ));
        }
        let rest = keys.iter().filter(|k| !matches_some_recipient(k));
        let candidates: Vec<&Decrypter> = matched.into_iter().chain(rest).collect();

        let sender_public = sender_public.as_ref().map(|key| key.as_slice());
        for decrypter in candidates {
            match envelope::decrypt(envelope, decrypter, sender_public) {
                Ok(plaintext) => return Ok(plaintext),
                Err(Error::DecryptionFailed) => continue,
                Err(other) => return Err(other),
            }
        }

        Err(Error::DecryptionFailed)
    }

    /// Verify a signed message and return its payload.
    async fn verify_jws(&self, jws: &Jws) -> Result<PlainMessage> {
        let payload = URL_SAFE_NO_PAD.decode(&jws.payload).map_err(|_| {
            Error::EnvelopeFormat("signed payload is not valid base64url".to_string())
        })?;

        for entry in &jws.signatures {
            let protected_bytes = URL_SAFE_NO_PAD.decode(&entry.protected).map_err(|_| {
                Error::EnvelopeFormat("protected header is not valid base64url".to_string())
            })?;
            let protected: JwsProtected = serde_json::from_slice(&protected_bytes)
                .map_err(|_| {
                    Error::EnvelopeFormat("protected header is not valid JSON".to_string())
                })?;
            if protected.alg != "EdDSA" {
                return Err(Error::UnsupportedAlgorithm(protected.alg));
            }

            let key_bytes = match self.resolve_verification(&entry.header.kid).await {
                Ok(key) => key,
                // Skip signatures whose key we cannot resolve
                Err(_) => continue,
            };
            let verifying_key = match VerifyingKey::from_bytes(&key_bytes) {
                Ok(key) => key,
                Err(_) => continue,
            };

            let signature_bytes = URL_SAFE_NO_PAD.decode(&entry.signature).map_err(|_| {
                Error::EnvelopeFormat("signature is not valid base64url".to_string())
            })?;
            let signature = match Signature::from_slice(&signature_bytes) {
                Ok(signature) => signature,
                Err(_) => continue,
            };

            let signing_input = format!("{}.{}", entry.protected, jws.payload);
            if verifying_key
                .verify(signing_input.as_bytes(), &signature)
                .is_ok()
            {
                debug!(kid = %entry.header.kid, "signature verified");
                return Ok(serde_json::from_slice(&payload)?);
            }
        }

        Err(Error::SignatureVerification)
    }

    async fn resolve_key_agreement(&self, id: &str) -> Result<[u8; 32]> {
        match self.config.resolve_timeout {
            Some(timeout) => {
                tokio::time::timeout(timeout, self.resolver.resolve_key_agreement(id))
                    .await
                    .map_err(|_| {
                        Error::DidResolution(format!("timed out resolving {}", id))
                    })?
            }
            None => self.resolver.resolve_key_agreement(id).await,
        }
    }

    async fn resolve_verification(&self, id: &str) -> Result<[u8; 32]> {
        match self.config.resolve_timeout {
            Some(timeout) => {
                tokio::time::timeout(timeout, self.resolver.resolve_verification(id))
                    .await
                    .map_err(|_| {
                        Error::DidResolution(format!("timed out resolving {}", id))
                    })?
            }
            None => self.resolver.resolve_verification(id).await,
        }
    }
}

/// Build a signed message over the serialized payload.
async fn sign_message(message: &PlainMessage, signer: &dyn Signer) -> Result<Jws> {
    let payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(message)?);

    let protected = JwsProtected {
        typ: SIGNED_TYP.to_string(),
        alg: signer.algorithm().as_str().to_string(),
    };
    let protected_b64 = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&protected)?);

    let signing_input = format!("{}.{}", protected_b64, payload);
    let signature = signer.sign(signing_input.as_bytes()).await?;

    Ok(Jws {
        payload,
        signatures: vec![JwsSignature {
            protected: protected_b64,
            signature: URL_SAFE_NO_PAD.encode(signature),
            header: JwsHeader {
                kid: signer.key_id().to_string(),
            },
        }],
    })
}
