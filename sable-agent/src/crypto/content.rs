//! Content encryption for envelope payloads.
//!
//! The payload is encrypted exactly once per envelope under a fresh content
//! encryption key; recipients differ only in how that key is wrapped. Three
//! algorithm families are supported: XChaCha20-Poly1305, AES-256-GCM and
//! AES-256-CBC with HMAC-SHA-512 (encrypt-then-MAC per RFC 7518 Section 5.2).

use crate::error::{Error, Result};
use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use aes_gcm::{AeadInPlace, Aes256Gcm, KeyInit, Nonce, Tag};
use chacha20poly1305::{XChaCha20Poly1305, XNonce};
use hmac::{Hmac, Mac};
use rand::{CryptoRng, RngCore};
use sha2::Sha512;
use zeroize::Zeroizing;

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;
type HmacSha512 = Hmac<Sha512>;

/// Content encryption algorithm declared in the protected header `enc`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentAlgorithm {
    /// XChaCha20-Poly1305
    Xc20P,
    /// AES-256-GCM
    A256Gcm,
    /// AES-256-CBC + HMAC-SHA-512, encrypt-then-MAC
    A256CbcHs512,
}

impl ContentAlgorithm {
    /// Returns the algorithm identifier as carried in the protected header.
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentAlgorithm::Xc20P => "XC20P",
            ContentAlgorithm::A256Gcm => "A256GCM",
            ContentAlgorithm::A256CbcHs512 => "A256CBC-HS512",
        }
    }

    /// Parse an `enc` identifier from a protected header.
    pub fn from_name(name: &str) -> Result<Self> {
        match name {
            "XC20P" => Ok(ContentAlgorithm::Xc20P),
            "A256GCM" => Ok(ContentAlgorithm::A256Gcm),
            "A256CBC-HS512" => Ok(ContentAlgorithm::A256CbcHs512),
            other => Err(Error::UnsupportedAlgorithm(other.to_string())),
        }
    }

    /// Length of the content encryption key in bytes.
    ///
    /// The CBC-HMAC family needs a 64-byte key: the first half keys the
    /// HMAC, the second half keys AES.
    pub fn key_len(&self) -> usize {
        match self {
            ContentAlgorithm::Xc20P | ContentAlgorithm::A256Gcm => 32,
            ContentAlgorithm::A256CbcHs512 => 64,
        }
    }

    /// Nonce/IV length in bytes.
    pub fn nonce_len(&self) -> usize {
        match self {
            ContentAlgorithm::Xc20P => 24,
            ContentAlgorithm::A256Gcm => 12,
            ContentAlgorithm::A256CbcHs512 => 16,
        }
    }

    /// Authentication tag length in bytes.
    pub fn tag_len(&self) -> usize {
        match self {
            ContentAlgorithm::Xc20P | ContentAlgorithm::A256Gcm => 16,
            ContentAlgorithm::A256CbcHs512 => 32,
        }
    }
}

/// Generate a fresh content encryption key for the given algorithm.
///
/// The key is wiped from memory when dropped.
pub fn generate_cek<R: RngCore + CryptoRng>(
    alg: ContentAlgorithm,
    rng: &mut R,
) -> Zeroizing<Vec<u8>> {
    let mut cek = Zeroizing::new(vec![0u8; alg.key_len()]);
    rng.fill_bytes(&mut cek);
    cek
}

/// Encrypt a payload, returning `(ciphertext, iv, tag)`.
///
/// `aad` is authenticated but not encrypted; the envelope layer composes it
/// from the protected header and any caller-supplied extra data.
pub fn encrypt<R: RngCore + CryptoRng>(
    alg: ContentAlgorithm,
    cek: &[u8],
    plaintext: &[u8],
    aad: &[u8],
    rng: &mut R,
) -> Result<(Vec<u8>, Vec<u8>, Vec<u8>)> {
    if cek.len() != alg.key_len() {
        return Err(Error::InvalidKeyLength {
            expected: alg.key_len(),
            actual: cek.len(),
        });
    }

    match alg {
        ContentAlgorithm::Xc20P => {
            let cipher = XChaCha20Poly1305::new_from_slice(cek)
                .map_err(|e| Error::Cryptography(format!("failed to create XC20P cipher: {}", e)))?;

            let mut iv = [0u8; 24];
            rng.fill_bytes(&mut iv);

            let mut buffer = plaintext.to_vec();
            let tag = cipher
                .encrypt_in_place_detached(XNonce::from_slice(&iv), aad, &mut buffer)
                .map_err(|e| Error::Cryptography(format!("XC20P encryption failed: {}", e)))?;

            Ok((buffer, iv.to_vec(), tag.to_vec()))
        }
        ContentAlgorithm::A256Gcm => {
            let cipher = Aes256Gcm::new_from_slice(cek).map_err(|e| {
                Error::Cryptography(format!("failed to create AES-GCM cipher: {}", e))
            })?;

            let mut iv = [0u8; 12];
            rng.fill_bytes(&mut iv);

            let mut buffer = plaintext.to_vec();
            let tag = cipher
                .encrypt_in_place_detached(Nonce::from_slice(&iv), aad, &mut buffer)
                .map_err(|e| Error::Cryptography(format!("AES-GCM encryption failed: {}", e)))?;

            Ok((buffer, iv.to_vec(), tag.to_vec()))
        }
        ContentAlgorithm::A256CbcHs512 => {
            let (mac_key, enc_key) = cek.split_at(32);

            let mut iv = [0u8; 16];
            rng.fill_bytes(&mut iv);

            let encryptor = Aes256CbcEnc::new_from_slices(enc_key, &iv).map_err(|e| {
                Error::Cryptography(format!("failed to create AES-CBC cipher: {}", e))
            })?;
            let ciphertext = encryptor.encrypt_padded_vec_mut::<Pkcs7>(plaintext);

            let tag = cbc_hs512_tag(mac_key, aad, &iv, &ciphertext)?;

            Ok((ciphertext, iv.to_vec(), tag))
        }
    }
}

/// Decrypt a payload, validating the tag before returning any plaintext.
///
/// Every failure mode (wrong key, tampered ciphertext, mismatched AAD,
/// truncated nonce or tag) is reported as [`Error::DecryptionFailed`].
pub fn decrypt(
    alg: ContentAlgorithm,
    cek: &[u8],
    ciphertext: &[u8],
    iv: &[u8],
    tag: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>> {
    if cek.len() != alg.key_len() || iv.len() != alg.nonce_len() || tag.len() != alg.tag_len() {
        return Err(Error::DecryptionFailed);
    }

    match alg {
        ContentAlgorithm::Xc20P => {
            let cipher =
                XChaCha20Poly1305::new_from_slice(cek).map_err(|_| Error::DecryptionFailed)?;

            let mut buffer = ciphertext.to_vec();
            cipher
                .decrypt_in_place_detached(
                    XNonce::from_slice(iv),
                    aad,
                    &mut buffer,
                    Tag::from_slice(tag),
                )
                .map_err(|_| Error::DecryptionFailed)?;

            Ok(buffer)
        }
        ContentAlgorithm::A256Gcm => {
            let cipher = Aes256Gcm::new_from_slice(cek).map_err(|_| Error::DecryptionFailed)?;

            let mut buffer = ciphertext.to_vec();
            cipher
                .decrypt_in_place_detached(
                    Nonce::from_slice(iv),
                    aad,
                    &mut buffer,
                    Tag::from_slice(tag),
                )
                .map_err(|_| Error::DecryptionFailed)?;

            Ok(buffer)
        }
        ContentAlgorithm::A256CbcHs512 => {
            let (mac_key, enc_key) = cek.split_at(32);

            // MAC check first; the ciphertext is only touched afterwards
            let mut mac =
                <HmacSha512 as Mac>::new_from_slice(mac_key).map_err(|_| Error::DecryptionFailed)?;
            mac.update(aad);
            mac.update(iv);
            mac.update(ciphertext);
            mac.update(&aad_bit_length(aad));
            mac.verify_truncated_left(tag)
                .map_err(|_| Error::DecryptionFailed)?;

            let decryptor =
                Aes256CbcDec::new_from_slices(enc_key, iv).map_err(|_| Error::DecryptionFailed)?;
            decryptor
                .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
                .map_err(|_| Error::DecryptionFailed)
        }
    }
}

/// HMAC-SHA-512 over `AAD || IV || ciphertext || AL`, truncated to 32 bytes.
fn cbc_hs512_tag(mac_key: &[u8], aad: &[u8], iv: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>> {
    let mut mac = <HmacSha512 as Mac>::new_from_slice(mac_key)
        .map_err(|e| Error::Cryptography(format!("failed to key HMAC-SHA-512: {}", e)))?;
    mac.update(aad);
    mac.update(iv);
    mac.update(ciphertext);
    mac.update(&aad_bit_length(aad));

    Ok(mac.finalize().into_bytes()[..32].to_vec())
}

/// AL field of RFC 7518 Section 5.2.2: AAD length in bits, 64-bit big-endian.
fn aad_bit_length(aad: &[u8]) -> [u8; 8] {
    ((aad.len() as u64) * 8).to_be_bytes()
}
