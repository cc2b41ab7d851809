//! X25519 key agreement and per-recipient KEK derivation.
//!
//! Two agreement families feed the Concat KDF:
//!
//! - **ECDH-ES** (anonymous): a single ephemeral-static agreement per
//!   recipient. Nothing in the derivation identifies the sender.
//! - **ECDH-1PU** (authenticated): the ephemeral-static and static-static
//!   secrets are concatenated `Ze || Zs` before derivation, so only the
//!   holder of the sender's static key could have produced the envelope.
//!
//! One ephemeral keypair is generated per envelope and reused across all
//! recipients.

use crate::agent_key::KeyExchange;
use crate::crypto::kdf;
use crate::crypto::key_wrap::KeyWrapAlgorithm;
use crate::error::{Error, Result};
use rand::{CryptoRng, RngCore};
use std::fmt::{self, Debug};
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::Zeroizing;

/// Length of X25519 public and secret keys in bytes.
pub const X25519_KEY_LEN: usize = 32;

/// KEK length in bits. All supported wrap algorithms take a 256-bit key.
const KEK_BITS: usize = 256;

/// Raw X25519 Diffie-Hellman with strict input validation.
///
/// Rejects peer keys that are not exactly 32 bytes before touching the
/// curve, and rejects exchanges that land on the identity point.
pub(crate) fn x25519(secret: &StaticSecret, peer_public: &[u8]) -> Result<[u8; 32]> {
    let peer: [u8; X25519_KEY_LEN] =
        peer_public
            .try_into()
            .map_err(|_| Error::InvalidKeyLength {
                expected: X25519_KEY_LEN,
                actual: peer_public.len(),
            })?;

    let shared = secret.diffie_hellman(&PublicKey::from(peer));
    if !shared.was_contributory() {
        return Err(Error::Cryptography(
            "non-contributory X25519 exchange".to_string(),
        ));
    }
    Ok(shared.to_bytes())
}

/// Ephemeral X25519 keypair, generated once per envelope.
pub struct EphemeralKeyPair {
    secret: StaticSecret,
    public: [u8; X25519_KEY_LEN],
}

impl EphemeralKeyPair {
    /// Generate a fresh keypair from the given CSPRNG.
    pub fn generate<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        let secret = StaticSecret::random_from_rng(&mut *rng);
        let public = PublicKey::from(&secret).to_bytes();
        Self { secret, public }
    }

    /// The public half, carried as `epk` in recipient headers.
    pub fn public_key(&self) -> [u8; X25519_KEY_LEN] {
        self.public
    }

    /// Agreement between the ephemeral secret and a peer public key.
    pub fn shared_secret(&self, peer_public: &[u8]) -> Result<[u8; 32]> {
        x25519(&self.secret, peer_public)
    }
}

impl Debug for EphemeralKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EphemeralKeyPair")
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

/// Derive the KEK for one ECDH-ES recipient on the sender side.
pub fn derive_es_kek(
    ephemeral: &EphemeralKeyPair,
    recipient_public: &[u8],
    alg: KeyWrapAlgorithm,
    apu: &[u8],
    apv: &[u8],
) -> Result<Zeroizing<[u8; 32]>> {
    let z = Zeroizing::new(ephemeral.shared_secret(recipient_public)?);
    kek_from_secret(&z[..], alg, apu, apv)
}

/// Derive the KEK for one ECDH-ES recipient on the receiving side.
pub fn derive_es_kek_for_recipient(
    recipient: &dyn KeyExchange,
    ephemeral_public: &[u8],
    alg: KeyWrapAlgorithm,
    apu: &[u8],
    apv: &[u8],
) -> Result<Zeroizing<[u8; 32]>> {
    let z = Zeroizing::new(recipient.shared_secret(ephemeral_public)?);
    kek_from_secret(&z[..], alg, apu, apv)
}

/// Derive the KEK for one ECDH-1PU recipient on the sender side.
///
/// `Ze` comes from the envelope's ephemeral key, `Zs` from the sender's
/// static key; both against the same recipient public key.
pub fn derive_1pu_kek(
    ephemeral: &EphemeralKeyPair,
    sender: &dyn KeyExchange,
    recipient_public: &[u8],
    alg: KeyWrapAlgorithm,
    apu: &[u8],
    apv: &[u8],
) -> Result<Zeroizing<[u8; 32]>> {
    let ze = Zeroizing::new(ephemeral.shared_secret(recipient_public)?);
    let zs = Zeroizing::new(sender.shared_secret(recipient_public)?);
    kek_from_combined(&ze, &zs, alg, apu, apv)
}

/// Derive the KEK for one ECDH-1PU recipient on the receiving side.
///
/// Re-deriving with the claimed sender's static public key implicitly
/// authenticates the sender: a different key yields a different KEK and the
/// key unwrap fails.
pub fn derive_1pu_kek_for_recipient(
    recipient: &dyn KeyExchange,
    ephemeral_public: &[u8],
    sender_public: &[u8],
    alg: KeyWrapAlgorithm,
    apu: &[u8],
    apv: &[u8],
) -> Result<Zeroizing<[u8; 32]>> {
    let ze = Zeroizing::new(recipient.shared_secret(ephemeral_public)?);
    let zs = Zeroizing::new(recipient.shared_secret(sender_public)?);
    kek_from_combined(&ze, &zs, alg, apu, apv)
}

fn kek_from_combined(
    ze: &[u8; 32],
    zs: &[u8; 32],
    alg: KeyWrapAlgorithm,
    apu: &[u8],
    apv: &[u8],
) -> Result<Zeroizing<[u8; 32]>> {
    let mut z = Zeroizing::new(Vec::with_capacity(2 * X25519_KEY_LEN));
    z.extend_from_slice(ze);
    z.extend_from_slice(zs);
    kek_from_secret(&z, alg, apu, apv)
}

fn kek_from_secret(
    z: &[u8],
    alg: KeyWrapAlgorithm,
    apu: &[u8],
    apv: &[u8],
) -> Result<Zeroizing<[u8; 32]>> {
    let derived = Zeroizing::new(kdf::derive_key(z, alg.as_str(), apu, apv, KEK_BITS)?);
    let mut kek = Zeroizing::new([0u8; 32]);
    kek.copy_from_slice(&derived);
    Ok(kek)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent_key::LocalKey;
    use assert_matches::assert_matches;
    use rand::rngs::OsRng;

    #[test]
    fn test_es_derivation_matches_on_both_sides() {
        let ephemeral = EphemeralKeyPair::generate(&mut OsRng);
        let recipient = LocalKey::generate(&mut OsRng);

        let sender_kek = derive_es_kek(
            &ephemeral,
            &recipient.public_key(),
            KeyWrapAlgorithm::EcdhEsA256Kw,
            b"",
            b"",
        )
        .unwrap();
        let recipient_kek = derive_es_kek_for_recipient(
            &recipient,
            &ephemeral.public_key(),
            KeyWrapAlgorithm::EcdhEsA256Kw,
            b"",
            b"",
        )
        .unwrap();

        assert_eq!(&sender_kek[..], &recipient_kek[..]);
    }

    #[test]
    fn test_1pu_derivation_matches_on_both_sides() {
        let ephemeral = EphemeralKeyPair::generate(&mut OsRng);
        let sender = LocalKey::generate(&mut OsRng);
        let recipient = LocalKey::generate(&mut OsRng);

        let sender_kek = derive_1pu_kek(
            &ephemeral,
            &sender,
            &recipient.public_key(),
            KeyWrapAlgorithm::Ecdh1PuA256Kw,
            b"apu",
            b"apv",
        )
        .unwrap();
        let recipient_kek = derive_1pu_kek_for_recipient(
            &recipient,
            &ephemeral.public_key(),
            &sender.public_key(),
            KeyWrapAlgorithm::Ecdh1PuA256Kw,
            b"apu",
            b"apv",
        )
        .unwrap();

        assert_eq!(&sender_kek[..], &recipient_kek[..]);
    }

    #[test]
    fn test_1pu_binds_the_sender_key() {
        let ephemeral = EphemeralKeyPair::generate(&mut OsRng);
        let sender = LocalKey::generate(&mut OsRng);
        let impostor = LocalKey::generate(&mut OsRng);
        let recipient = LocalKey::generate(&mut OsRng);

        let real = derive_1pu_kek(
            &ephemeral,
            &sender,
            &recipient.public_key(),
            KeyWrapAlgorithm::Ecdh1PuA256Kw,
            b"",
            b"",
        )
        .unwrap();
        let claimed = derive_1pu_kek_for_recipient(
            &recipient,
            &ephemeral.public_key(),
            &impostor.public_key(),
            KeyWrapAlgorithm::Ecdh1PuA256Kw,
            b"",
            b"",
        )
        .unwrap();

        assert_ne!(&real[..], &claimed[..]);
    }

    #[test]
    fn test_es_and_1pu_keks_differ() {
        // Same Ze, but 1PU mixes in Zs and a different algorithm id
        let ephemeral = EphemeralKeyPair::generate(&mut OsRng);
        let sender = LocalKey::generate(&mut OsRng);
        let recipient = LocalKey::generate(&mut OsRng);

        let es = derive_es_kek(
            &ephemeral,
            &recipient.public_key(),
            KeyWrapAlgorithm::EcdhEsA256Kw,
            b"",
            b"",
        )
        .unwrap();
        let one_pu = derive_1pu_kek(
            &ephemeral,
            &sender,
            &recipient.public_key(),
            KeyWrapAlgorithm::Ecdh1PuA256Kw,
            b"",
            b"",
        )
        .unwrap();

        assert_ne!(&es[..], &one_pu[..]);
    }

    #[test]
    fn test_peer_key_length_is_checked_first() {
        let ephemeral = EphemeralKeyPair::generate(&mut OsRng);
        assert_matches!(
            ephemeral.shared_secret(&[0u8; 33]),
            Err(Error::InvalidKeyLength {
                expected: 32,
                actual: 33
            })
        );
    }
}
