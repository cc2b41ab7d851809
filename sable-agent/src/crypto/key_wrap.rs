//! Key wrapping for content encryption keys.
//!
//! Two wrap mechanisms are supported: AES-256 Key Wrap per RFC 3394
//! (deterministic, integrity-checked, no extra IV) and an XChaCha20-Poly1305
//! wrap that produces a per-recipient nonce and tag alongside the wrapped
//! key. Both fail closed: an unwrap either yields the exact original key or
//! [`Error::DecryptionFailed`], never corrupted key material.

use crate::error::{Error, Result};
use aes::Aes256;
use aes_kw::Kek;
use chacha20poly1305::{AeadInPlace, KeyInit, Tag, XChaCha20Poly1305, XNonce};
use rand::{CryptoRng, RngCore};

/// Nonce size of the XChaCha20-Poly1305 key wrap.
pub const XC20P_WRAP_NONCE_LEN: usize = 24;

/// Tag size of the XChaCha20-Poly1305 key wrap.
pub const XC20P_WRAP_TAG_LEN: usize = 16;

/// Key agreement + key wrap algorithm of an envelope recipient.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyWrapAlgorithm {
    /// ECDH-ES with AES-256 key wrap (anonymous)
    EcdhEsA256Kw,
    /// ECDH-ES with XChaCha20-Poly1305 key wrap (anonymous)
    EcdhEsXc20PKw,
    /// ECDH-1PU with AES-256 key wrap (sender-authenticated)
    Ecdh1PuA256Kw,
    /// ECDH-1PU with XChaCha20-Poly1305 key wrap (sender-authenticated)
    Ecdh1PuXc20PKw,
}

impl KeyWrapAlgorithm {
    /// Returns the algorithm identifier as carried in recipient headers.
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyWrapAlgorithm::EcdhEsA256Kw => "ECDH-ES+A256KW",
            KeyWrapAlgorithm::EcdhEsXc20PKw => "ECDH-ES+XC20PKW",
            KeyWrapAlgorithm::Ecdh1PuA256Kw => "ECDH-1PU+A256KW",
            KeyWrapAlgorithm::Ecdh1PuXc20PKw => "ECDH-1PU+XC20PKW",
        }
    }

    /// Parse an algorithm identifier from a recipient header.
    pub fn from_name(name: &str) -> Result<Self> {
        match name {
            "ECDH-ES+A256KW" => Ok(KeyWrapAlgorithm::EcdhEsA256Kw),
            "ECDH-ES+XC20PKW" => Ok(KeyWrapAlgorithm::EcdhEsXc20PKw),
            "ECDH-1PU+A256KW" => Ok(KeyWrapAlgorithm::Ecdh1PuA256Kw),
            "ECDH-1PU+XC20PKW" => Ok(KeyWrapAlgorithm::Ecdh1PuXc20PKw),
            other => Err(Error::UnsupportedAlgorithm(other.to_string())),
        }
    }

    /// Whether the agreement authenticates the sender (ECDH-1PU family).
    pub fn is_authenticated(&self) -> bool {
        matches!(
            self,
            KeyWrapAlgorithm::Ecdh1PuA256Kw | KeyWrapAlgorithm::Ecdh1PuXc20PKw
        )
    }

    /// Whether the CEK is wrapped with XChaCha20-Poly1305 rather than AES-KW.
    pub fn wraps_with_xc20p(&self) -> bool {
        matches!(
            self,
            KeyWrapAlgorithm::EcdhEsXc20PKw | KeyWrapAlgorithm::Ecdh1PuXc20PKw
        )
    }
}

/// Wrap a key using AES-256-KW (RFC 3394).
///
/// The key to wrap must be at least 16 bytes and a multiple of 8; the
/// output is 8 bytes longer than the input (the integrity check value).
pub fn wrap_key_aes_kw(kek: &[u8; 32], plaintext_key: &[u8]) -> Result<Vec<u8>> {
    if plaintext_key.len() < 16 {
        return Err(Error::Cryptography(
            "key to wrap must be at least 16 bytes".to_string(),
        ));
    }
    if plaintext_key.len() % 8 != 0 {
        return Err(Error::Cryptography(
            "key to wrap must be a multiple of 8 bytes".to_string(),
        ));
    }

    let kek = Kek::<Aes256>::from(*kek);

    let mut output = vec![0u8; plaintext_key.len() + 8];
    kek.wrap(plaintext_key, &mut output)
        .map_err(|e| Error::Cryptography(format!("key wrap failed: {:?}", e)))?;

    Ok(output)
}

/// Unwrap a key using AES-256-KW (RFC 3394).
///
/// Verifies the integrity check value; a wrong KEK, tampering or a
/// malformed wrapped key all surface as the generic
/// [`Error::DecryptionFailed`].
pub fn unwrap_key_aes_kw(kek: &[u8; 32], wrapped_key: &[u8]) -> Result<Vec<u8>> {
    if wrapped_key.len() < 24 || wrapped_key.len() % 8 != 0 {
        return Err(Error::DecryptionFailed);
    }

    let kek = Kek::<Aes256>::from(*kek);

    let mut output = vec![0u8; wrapped_key.len() - 8];
    kek.unwrap(wrapped_key, &mut output)
        .map_err(|_| Error::DecryptionFailed)?;

    Ok(output)
}

/// Wrap a key with XChaCha20-Poly1305 under a fresh random nonce.
///
/// Returns `(wrapped_key, nonce, tag)`; nonce and tag travel in the
/// recipient header.
pub fn wrap_key_xc20p<R: RngCore + CryptoRng>(
    kek: &[u8; 32],
    plaintext_key: &[u8],
    rng: &mut R,
) -> Result<(Vec<u8>, Vec<u8>, Vec<u8>)> {
    let cipher = XChaCha20Poly1305::new_from_slice(kek)
        .map_err(|e| Error::Cryptography(format!("failed to create XC20P cipher: {}", e)))?;

    let mut nonce = [0u8; XC20P_WRAP_NONCE_LEN];
    rng.fill_bytes(&mut nonce);

    let mut buffer = plaintext_key.to_vec();
    let tag = cipher
        .encrypt_in_place_detached(XNonce::from_slice(&nonce), b"", &mut buffer)
        .map_err(|e| Error::Cryptography(format!("XC20P key wrap failed: {}", e)))?;

    Ok((buffer, nonce.to_vec(), tag.to_vec()))
}

/// Unwrap a key wrapped with XChaCha20-Poly1305.
pub fn unwrap_key_xc20p(
    kek: &[u8; 32],
    wrapped_key: &[u8],
    nonce: &[u8],
    tag: &[u8],
) -> Result<Vec<u8>> {
    if nonce.len() != XC20P_WRAP_NONCE_LEN || tag.len() != XC20P_WRAP_TAG_LEN {
        return Err(Error::DecryptionFailed);
    }

    let cipher = XChaCha20Poly1305::new_from_slice(kek).map_err(|_| Error::DecryptionFailed)?;

    let mut buffer = wrapped_key.to_vec();
    cipher
        .decrypt_in_place_detached(
            XNonce::from_slice(nonce),
            b"",
            &mut buffer,
            Tag::from_slice(tag),
        )
        .map_err(|_| Error::DecryptionFailed)?;

    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use rand::rngs::OsRng;

    #[test]
    fn test_aes_kw_roundtrip() {
        let kek = [0x42u8; 32];
        let plaintext = [0xABu8; 32];

        let wrapped = wrap_key_aes_kw(&kek, &plaintext).unwrap();
        assert_eq!(wrapped.len(), plaintext.len() + 8);

        let unwrapped = unwrap_key_aes_kw(&kek, &wrapped).unwrap();
        assert_eq!(&unwrapped[..], &plaintext[..]);
    }

    #[test]
    fn test_aes_kw_wrong_kek_fails() {
        let kek1 = [0x42u8; 32];
        let kek2 = [0x43u8; 32];
        let plaintext = [0xABu8; 32];

        let wrapped = wrap_key_aes_kw(&kek1, &plaintext).unwrap();
        assert_matches!(
            unwrap_key_aes_kw(&kek2, &wrapped),
            Err(Error::DecryptionFailed)
        );
    }

    #[test]
    fn test_aes_kw_tampering_detected() {
        let kek = [0x42u8; 32];
        let plaintext = [0xABu8; 32];

        let mut wrapped = wrap_key_aes_kw(&kek, &plaintext).unwrap();
        wrapped[0] ^= 0xFF;

        assert_matches!(
            unwrap_key_aes_kw(&kek, &wrapped),
            Err(Error::DecryptionFailed)
        );
    }

    #[test]
    fn test_aes_kw_rejects_bad_input_sizes() {
        let kek = [0x42u8; 32];
        // Too short
        assert!(wrap_key_aes_kw(&kek, &[0xABu8; 8]).is_err());
        // Not a multiple of 8
        assert!(wrap_key_aes_kw(&kek, &[0xABu8; 17]).is_err());
    }

    #[test]
    fn test_xc20p_roundtrip() {
        let kek = [0x42u8; 32];
        let plaintext = [0xABu8; 64];

        let (wrapped, nonce, tag) = wrap_key_xc20p(&kek, &plaintext, &mut OsRng).unwrap();
        assert_eq!(wrapped.len(), plaintext.len());
        assert_eq!(nonce.len(), XC20P_WRAP_NONCE_LEN);
        assert_eq!(tag.len(), XC20P_WRAP_TAG_LEN);

        let unwrapped = unwrap_key_xc20p(&kek, &wrapped, &nonce, &tag).unwrap();
        assert_eq!(&unwrapped[..], &plaintext[..]);
    }

    #[test]
    fn test_xc20p_tampering_detected() {
        let kek = [0x42u8; 32];
        let plaintext = [0xABu8; 32];

        let (mut wrapped, nonce, tag) = wrap_key_xc20p(&kek, &plaintext, &mut OsRng).unwrap();
        wrapped[3] ^= 0x01;

        assert_matches!(
            unwrap_key_xc20p(&kek, &wrapped, &nonce, &tag),
            Err(Error::DecryptionFailed)
        );
    }

    #[test]
    fn test_xc20p_wrong_kek_fails() {
        let kek1 = [0x42u8; 32];
        let kek2 = [0x43u8; 32];
        let plaintext = [0xABu8; 32];

        let (wrapped, nonce, tag) = wrap_key_xc20p(&kek1, &plaintext, &mut OsRng).unwrap();
        assert_matches!(
            unwrap_key_xc20p(&kek2, &wrapped, &nonce, &tag),
            Err(Error::DecryptionFailed)
        );
    }

    #[test]
    fn test_algorithm_names_roundtrip() {
        for alg in [
            KeyWrapAlgorithm::EcdhEsA256Kw,
            KeyWrapAlgorithm::EcdhEsXc20PKw,
            KeyWrapAlgorithm::Ecdh1PuA256Kw,
            KeyWrapAlgorithm::Ecdh1PuXc20PKw,
        ] {
            assert_eq!(KeyWrapAlgorithm::from_name(alg.as_str()).unwrap(), alg);
        }
        assert_matches!(
            KeyWrapAlgorithm::from_name("RSA-OAEP"),
            Err(Error::UnsupportedAlgorithm(_))
        );
    }
}
