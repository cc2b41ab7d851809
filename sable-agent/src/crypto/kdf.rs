//! Concat KDF (NIST SP 800-56A single-step, SHA-256).
//!
//! Turns an ECDH shared secret into a key encryption key. The same KDF
//! serves every supported key agreement family; the algorithm identifier of
//! the key-wrap algorithm is mixed in so KEKs derived for different wrap
//! algorithms never coincide.

use crate::error::{Error, Result};
use sha2::{Digest, Sha256};

/// Derive key material from a shared secret.
///
/// The OtherInfo structure follows RFC 7518 Section 4.6.2:
/// - AlgorithmID: length (4 bytes BE) || algorithm identifier
/// - PartyUInfo: length (4 bytes BE) || apu
/// - PartyVInfo: length (4 bytes BE) || apv
/// - SuppPubInfo: keydatalen in bits (4 bytes BE)
///
/// `DerivedKey = Hash(counter || Z || OtherInfo)` per round, truncated to
/// `key_data_len / 8` bytes.
pub fn derive_key(
    shared_secret: &[u8],
    algorithm_id: &str,
    apu: &[u8],
    apv: &[u8],
    key_data_len: usize,
) -> Result<Vec<u8>> {
    if key_data_len == 0 || key_data_len % 8 != 0 {
        return Err(Error::Cryptography(
            "key_data_len must be a positive multiple of 8".to_string(),
        ));
    }

    let mut other_info = Vec::new();

    other_info.extend_from_slice(&(algorithm_id.len() as u32).to_be_bytes());
    other_info.extend_from_slice(algorithm_id.as_bytes());

    other_info.extend_from_slice(&(apu.len() as u32).to_be_bytes());
    other_info.extend_from_slice(apu);

    other_info.extend_from_slice(&(apv.len() as u32).to_be_bytes());
    other_info.extend_from_slice(apv);

    other_info.extend_from_slice(&(key_data_len as u32).to_be_bytes());

    // SHA-256 yields 32 bytes per round
    let key_data_len_bytes = key_data_len / 8;
    let hash_len = 32;
    let reps = key_data_len_bytes.div_ceil(hash_len);

    let mut derived = Vec::with_capacity(key_data_len_bytes);

    for counter in 1..=reps {
        let mut hasher = Sha256::new();
        hasher.update((counter as u32).to_be_bytes());
        hasher.update(shared_secret);
        hasher.update(&other_info);

        derived.extend_from_slice(&hasher.finalize());
    }

    derived.truncate(key_data_len_bytes);
    Ok(derived)
}
