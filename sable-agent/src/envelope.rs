//! Multi-recipient encrypted envelopes.
//!
//! An envelope encrypts a payload exactly once under a fresh content
//! encryption key and wraps that key separately for every recipient:
//!
//! ```text
//! {
//!   "protected": "<b64url(header)>",
//!   "iv": "...", "ciphertext": "...", "tag": "...",
//!   "aad": "...",
//!   "recipients": [
//!     { "header": { "kid", "alg", "epk", "apu", "apv", "iv", "tag" },
//!       "encrypted_key": "..." }
//!   ]
//! }
//! ```
//!
//! The base64url-encoded protected header doubles as the associated data
//! of the content encryption, so any alteration of the header breaks
//! decryption. All binary values are base64url without padding.

use crate::agent_key::KeyExchange;
use crate::crypto::agreement::{self, EphemeralKeyPair, X25519_KEY_LEN};
use crate::crypto::content::{self, ContentAlgorithm};
use crate::crypto::key_wrap::{self, KeyWrapAlgorithm};
use crate::error::{Error, Result};
use crate::message::ENCRYPTED_TYP;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use zeroize::Zeroizing;

/// A multi-recipient encrypted envelope in wire form.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// base64url of the canonical protected header
    pub protected: String,
    /// base64url of the content encryption nonce
    pub iv: String,
    /// base64url of the ciphertext
    pub ciphertext: String,
    /// base64url of the content authentication tag
    pub tag: String,
    /// base64url of caller-supplied extra authenticated data
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aad: Option<String>,
    /// Per-recipient headers and wrapped keys; never empty
    pub recipients: Vec<Recipient>,
}

/// One recipient entry of an [`Envelope`].
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Recipient {
    /// Per-recipient metadata
    pub header: RecipientHeader,
    /// base64url of the wrapped content encryption key
    pub encrypted_key: String,
}

/// Per-recipient metadata of an [`Envelope`].
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
pub struct RecipientHeader {
    /// Key id of the recipient key, if the sender knows one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,
    /// Key agreement + key wrap algorithm
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alg: Option<String>,
    /// Ephemeral public key of the envelope
    #[serde(skip_serializing_if = "Option::is_none")]
    pub epk: Option<EphemeralPublicKey>,
    /// base64url PartyUInfo mixed into the KDF
    #[serde(skip_serializing_if = "Option::is_none")]
    pub apu: Option<String>,
    /// base64url PartyVInfo mixed into the KDF
    #[serde(skip_serializing_if = "Option::is_none")]
    pub apv: Option<String>,
    /// base64url nonce of the XC20P key wrap, absent for AES-KW
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iv: Option<String>,
    /// base64url tag of the XC20P key wrap, absent for AES-KW
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
}

/// Canonical protected header.
///
/// Serialized with stable field order; the resulting base64url string is
/// authenticated as part of the AAD, so it must never be re-encoded when
/// parsing an existing envelope.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ProtectedHeader {
    /// Content encryption algorithm
    pub enc: String,
    /// Media type of the envelope
    #[serde(skip_serializing_if = "Option::is_none")]
    pub typ: Option<String>,
    /// Key id of the sender's static key, present only for authenticated
    /// envelopes whose sender chose to advertise it
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skid: Option<String>,
}

/// X25519 ephemeral public key in JWK form.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct EphemeralPublicKey {
    /// Key type, always "OKP"
    pub kty: String,
    /// Curve, always "X25519"
    pub crv: String,
    /// base64url of the public key bytes
    pub x: String,
}

impl EphemeralPublicKey {
    /// Encode raw X25519 public key bytes.
    pub fn from_bytes(public: &[u8; X25519_KEY_LEN]) -> Self {
        Self {
            kty: "OKP".to_string(),
            crv: "X25519".to_string(),
            x: URL_SAFE_NO_PAD.encode(public),
        }
    }

    /// Decode back to raw public key bytes, validating the key type.
    pub fn to_bytes(&self) -> Result<[u8; X25519_KEY_LEN]> {
        if self.kty != "OKP" || self.crv != "X25519" {
            return Err(Error::UnsupportedAlgorithm(format!(
                "{}/{} ephemeral key",
                self.kty, self.crv
            )));
        }
        let bytes = URL_SAFE_NO_PAD
            .decode(&self.x)
            .map_err(|_| Error::EnvelopeFormat("epk.x is not valid base64url".to_string()))?;
        bytes.as_slice().try_into().map_err(|_| {
            Error::EnvelopeFormat(format!("epk.x must be {} bytes", X25519_KEY_LEN))
        })
    }
}

/// Per-recipient encryption configuration.
#[derive(Debug, Clone)]
pub struct Encrypter {
    kid: Option<String>,
    public_key: [u8; X25519_KEY_LEN],
    alg: KeyWrapAlgorithm,
    enc: ContentAlgorithm,
    apu: Option<Vec<u8>>,
    apv: Option<Vec<u8>>,
}

impl Encrypter {
    /// Configure encryption to one recipient public key.
    pub fn new(
        public_key: [u8; X25519_KEY_LEN],
        alg: KeyWrapAlgorithm,
        enc: ContentAlgorithm,
    ) -> Self {
        Self {
            kid: None,
            public_key,
            alg,
            enc,
            apu: None,
            apv: None,
        }
    }

    /// Builder method to declare the recipient's key id.
    pub fn with_kid(mut self, kid: &str) -> Self {
        self.kid = Some(kid.to_string());
        self
    }

    /// Builder method to set PartyUInfo. Off by default so anonymous
    /// envelopes do not leak identity.
    pub fn with_apu(mut self, apu: &[u8]) -> Self {
        self.apu = Some(apu.to_vec());
        self
    }

    /// Builder method to set PartyVInfo.
    pub fn with_apv(mut self, apv: &[u8]) -> Self {
        self.apv = Some(apv.to_vec());
        self
    }

    /// The content encryption algorithm this encrypter declares.
    pub fn content_algorithm(&self) -> ContentAlgorithm {
        self.enc
    }

    /// The key wrap algorithm this encrypter declares.
    pub fn key_wrap_algorithm(&self) -> KeyWrapAlgorithm {
        self.alg
    }
}

/// Sender-side key material for authenticated (ECDH-1PU) envelopes.
#[derive(Debug, Clone)]
pub struct Sender {
    /// Key agreement capability of the sender's static key
    pub key: Arc<dyn KeyExchange>,
    /// Key id advertised as `skid` so receivers can resolve the static
    /// public key; omit to require out-of-band sender key distribution
    pub skid: Option<String>,
}

impl Sender {
    /// Sender without an advertised key id.
    pub fn new(key: Arc<dyn KeyExchange>) -> Self {
        Self { key, skid: None }
    }

    /// Builder method to advertise the sender key id.
    pub fn with_skid(mut self, skid: &str) -> Self {
        self.skid = Some(skid.to_string());
        self
    }
}

/// A local key reference used to open envelopes.
#[derive(Debug, Clone)]
pub struct Decrypter {
    kid: Option<String>,
    key: Arc<dyn KeyExchange>,
}

impl Decrypter {
    /// Wrap a key agreement capability.
    pub fn new(key: Arc<dyn KeyExchange>) -> Self {
        Self { kid: None, key }
    }

    /// Builder method to declare the key id this key is known under.
    pub fn with_kid(mut self, kid: &str) -> Self {
        self.kid = Some(kid.to_string());
        self
    }

    /// The declared key id, if any.
    pub fn kid(&self) -> Option<&str> {
        self.kid.as_deref()
    }

    /// The underlying key agreement capability.
    pub fn key(&self) -> &dyn KeyExchange {
        self.key.as_ref()
    }
}

/// Build an envelope over `plaintext` for the given recipients.
///
/// Every encrypter must declare the same content algorithm; violating that
/// fails with [`Error::IncompatibleEncrypters`] before any key material is
/// touched. ECDH-1PU recipients require `sender`; ECDH-ES recipients
/// forbid it.
pub fn encrypt<R: RngCore + CryptoRng>(
    plaintext: &[u8],
    encrypters: &[Encrypter],
    sender: Option<&Sender>,
    extra_aad: Option<&[u8]>,
    rng: &mut R,
) -> Result<Envelope> {
    let (enc, authenticated) = check_compatible(encrypters)?;

    let sender = match (authenticated, sender) {
        (true, Some(sender)) => Some(sender),
        (true, None) => {
            return Err(Error::Validation(
                "authenticated encryption requires a sender key".to_string(),
            ))
        }
        (false, Some(_)) => {
            return Err(Error::Validation(
                "anonymous encryption must not carry a sender key".to_string(),
            ))
        }
        (false, None) => None,
    };

    let protected = ProtectedHeader {
        enc: enc.as_str().to_string(),
        typ: Some(ENCRYPTED_TYP.to_string()),
        skid: sender.and_then(|s| s.skid.clone()),
    };
    let protected_b64 = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&protected)?);
    let aad = compose_aad(&protected_b64, extra_aad);

    let cek = content::generate_cek(enc, rng);
    let (ciphertext, iv, tag) = content::encrypt(enc, &cek, plaintext, &aad, rng)?;

    // One ephemeral keypair per envelope, shared by all recipients
    let ephemeral = EphemeralKeyPair::generate(rng);
    let epk = EphemeralPublicKey::from_bytes(&ephemeral.public_key());

    let mut recipients = Vec::with_capacity(encrypters.len());
    for encrypter in encrypters {
        let apu = encrypter.apu.as_deref().unwrap_or(&[]);
        let apv = encrypter.apv.as_deref().unwrap_or(&[]);

        // `sender` is Some exactly when every encrypter is ECDH-1PU
        let kek = match sender {
            Some(sender) => agreement::derive_1pu_kek(
                &ephemeral,
                sender.key.as_ref(),
                &encrypter.public_key,
                encrypter.alg,
                apu,
                apv,
            )?,
            None => {
                agreement::derive_es_kek(&ephemeral, &encrypter.public_key, encrypter.alg, apu, apv)?
            }
        };

        let mut header = RecipientHeader {
            kid: encrypter.kid.clone(),
            alg: Some(encrypter.alg.as_str().to_string()),
            epk: Some(epk.clone()),
            apu: encrypter.apu.as_deref().map(|b| URL_SAFE_NO_PAD.encode(b)),
            apv: encrypter.apv.as_deref().map(|b| URL_SAFE_NO_PAD.encode(b)),
            iv: None,
            tag: None,
        };

        let encrypted_key = if encrypter.alg.wraps_with_xc20p() {
            let (wrapped, wrap_iv, wrap_tag) = key_wrap::wrap_key_xc20p(&kek, &cek, rng)?;
            header.iv = Some(URL_SAFE_NO_PAD.encode(wrap_iv));
            header.tag = Some(URL_SAFE_NO_PAD.encode(wrap_tag));
            wrapped
        } else {
            key_wrap::wrap_key_aes_kw(&kek, &cek)?
        };

        recipients.push(Recipient {
            header,
            encrypted_key: URL_SAFE_NO_PAD.encode(encrypted_key),
        });
    }

    Ok(Envelope {
        protected: protected_b64,
        iv: URL_SAFE_NO_PAD.encode(iv),
        ciphertext: URL_SAFE_NO_PAD.encode(ciphertext),
        tag: URL_SAFE_NO_PAD.encode(tag),
        aad: extra_aad.map(|aad| URL_SAFE_NO_PAD.encode(aad)),
        recipients,
    })
}

/// Open an envelope with one key reference.
///
/// Recipient entries declaring a kid are only attempted when it matches
/// the decrypter's kid; anonymous entries are attempted in order. For
/// ECDH-1PU envelopes the claimed sender public key must be supplied:
/// re-deriving the agreement with it is what authenticates the sender.
pub fn decrypt(
    envelope: &Envelope,
    decrypter: &Decrypter,
    sender_public: Option<&[u8]>,
) -> Result<Vec<u8>> {
    envelope.validate()?;
    let enc = envelope.content_algorithm()?;

    let iv = decode_field(&envelope.iv, "iv")?;
    let ciphertext = decode_field(&envelope.ciphertext, "ciphertext")?;
    let tag = decode_field(&envelope.tag, "tag")?;
    let extra_aad = envelope
        .aad
        .as_deref()
        .map(|aad| decode_field(aad, "aad"))
        .transpose()?;
    let aad = compose_aad(&envelope.protected, extra_aad.as_deref());

    let candidates: Vec<&Recipient> = match decrypter.kid() {
        Some(kid)
            if envelope
                .recipients
                .iter()
                .any(|r| r.header.kid.as_deref() == Some(kid)) =>
        {
            envelope
                .recipients
                .iter()
                .filter(|r| r.header.kid.as_deref() == Some(kid))
                .collect()
        }
        _ => envelope.recipients.iter().collect(),
    };

    for recipient in candidates {
        match try_recipient(
            recipient,
            decrypter,
            sender_public,
            enc,
            &aad,
            &iv,
            &ciphertext,
            &tag,
        ) {
            Ok(plaintext) => return Ok(plaintext),
            // A failed attempt reveals nothing; move on to the next entry
            Err(Error::DecryptionFailed) => continue,
            Err(other) => return Err(other),
        }
    }

    Err(Error::DecryptionFailed)
}

#[allow(clippy::too_many_arguments)]
fn try_recipient(
    recipient: &Recipient,
    decrypter: &Decrypter,
    sender_public: Option<&[u8]>,
    enc: ContentAlgorithm,
    aad: &[u8],
    iv: &[u8],
    ciphertext: &[u8],
    tag: &[u8],
) -> Result<Vec<u8>> {
    let header = &recipient.header;

    let alg_name = header
        .alg
        .as_deref()
        .ok_or_else(|| Error::EnvelopeFormat("recipient header missing alg".to_string()))?;
    let alg = KeyWrapAlgorithm::from_name(alg_name)?;

    let epk = header
        .epk
        .as_ref()
        .ok_or_else(|| Error::EnvelopeFormat("recipient header missing epk".to_string()))?
        .to_bytes()?;

    let apu = decode_optional(header.apu.as_deref(), "apu")?;
    let apv = decode_optional(header.apv.as_deref(), "apv")?;

    let kek = if alg.is_authenticated() {
        let sender_public = sender_public.ok_or_else(|| {
            Error::Validation(
                "authenticated envelope requires the sender's public key".to_string(),
            )
        })?;
        agreement::derive_1pu_kek_for_recipient(
            decrypter.key(),
            &epk,
            sender_public,
            alg,
            &apu,
            &apv,
        )?
    } else {
        agreement::derive_es_kek_for_recipient(decrypter.key(), &epk, alg, &apu, &apv)?
    };

    let encrypted_key = decode_field(&recipient.encrypted_key, "encrypted_key")?;
    let cek = Zeroizing::new(if alg.wraps_with_xc20p() {
        let wrap_iv = decode_field(
            header.iv.as_deref().ok_or_else(|| {
                Error::EnvelopeFormat("recipient header missing key wrap iv".to_string())
            })?,
            "recipient iv",
        )?;
        let wrap_tag = decode_field(
            header.tag.as_deref().ok_or_else(|| {
                Error::EnvelopeFormat("recipient header missing key wrap tag".to_string())
            })?,
            "recipient tag",
        )?;
        key_wrap::unwrap_key_xc20p(&kek, &encrypted_key, &wrap_iv, &wrap_tag)?
    } else {
        key_wrap::unwrap_key_aes_kw(&kek, &encrypted_key)?
    });

    // A CEK of the wrong size can only come from the wrong key
    if cek.len() != enc.key_len() {
        return Err(Error::DecryptionFailed);
    }

    content::decrypt(enc, &cek, ciphertext, iv, tag, aad)
}

impl Envelope {
    /// Decode and parse the protected header.
    pub fn parse_protected(&self) -> Result<ProtectedHeader> {
        let bytes = URL_SAFE_NO_PAD.decode(&self.protected).map_err(|_| {
            Error::EnvelopeFormat("protected header is not valid base64url".to_string())
        })?;
        serde_json::from_slice(&bytes)
            .map_err(|_| Error::EnvelopeFormat("protected header is not valid JSON".to_string()))
    }

    /// The declared content encryption algorithm.
    pub fn content_algorithm(&self) -> Result<ContentAlgorithm> {
        ContentAlgorithm::from_name(&self.parse_protected()?.enc)
    }

    /// Check structural invariants before any key material is used.
    pub fn validate(&self) -> Result<()> {
        if self.recipients.is_empty() {
            return Err(Error::EnvelopeFormat(
                "envelope has no recipients".to_string(),
            ));
        }
        for (field, value) in [
            ("protected", &self.protected),
            ("iv", &self.iv),
            ("ciphertext", &self.ciphertext),
            ("tag", &self.tag),
        ] {
            if value.is_empty() {
                return Err(Error::EnvelopeFormat(format!("envelope {} is empty", field)));
            }
        }
        // Rejects unknown or absent `enc` as well
        self.content_algorithm()?;
        Ok(())
    }

    /// Serialize to the wire string.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse from the wire string.
    pub fn from_json(raw: &str) -> Result<Self> {
        serde_json::from_str(raw)
            .map_err(|_| Error::EnvelopeFormat("malformed envelope".to_string()))
    }
}

/// Compose the associated data authenticated by the content encryption.
///
/// Without extra AAD this is the protected header string itself. With
/// extra AAD the two parts are joined with 32-bit big-endian length
/// prefixes so neither can masquerade as the other.
pub(crate) fn compose_aad(protected_b64: &str, extra: Option<&[u8]>) -> Vec<u8> {
    match extra {
        None => protected_b64.as_bytes().to_vec(),
        Some(extra) => {
            let mut aad = Vec::with_capacity(8 + protected_b64.len() + extra.len());
            aad.extend_from_slice(&(protected_b64.len() as u32).to_be_bytes());
            aad.extend_from_slice(protected_b64.as_bytes());
            aad.extend_from_slice(&(extra.len() as u32).to_be_bytes());
            aad.extend_from_slice(extra);
            aad
        }
    }
}

fn check_compatible(encrypters: &[Encrypter]) -> Result<(ContentAlgorithm, bool)> {
    let first = encrypters.first().ok_or_else(|| {
        Error::Validation("at least one recipient is required".to_string())
    })?;

    if encrypters.iter().any(|e| e.enc != first.enc) {
        return Err(Error::IncompatibleEncrypters);
    }

    let authenticated = first.alg.is_authenticated();
    if encrypters
        .iter()
        .any(|e| e.alg.is_authenticated() != authenticated)
    {
        return Err(Error::Validation(
            "cannot mix ECDH-ES and ECDH-1PU recipients in one envelope".to_string(),
        ));
    }

    Ok((first.enc, authenticated))
}

fn decode_field(value: &str, field: &str) -> Result<Vec<u8>> {
    URL_SAFE_NO_PAD
        .decode(value)
        .map_err(|_| Error::EnvelopeFormat(format!("{} is not valid base64url", field)))
}

fn decode_optional(value: Option<&str>, field: &str) -> Result<Vec<u8>> {
    match value {
        Some(value) => decode_field(value, field),
        None => Ok(Vec::new()),
    }
}
