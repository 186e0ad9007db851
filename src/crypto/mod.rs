//! Thin wrappers around the platform crypto primitives this crate treats as opaque: HKDF-SHA512,
//! ChaCha20-Poly1305, Ed25519, Curve25519/X25519, and SRP-6a.
//!
//! Every function here is a pure, allocation-light wrapper around a well-known RustCrypto (or
//! RustCrypto-adjacent) crate; none of it re-implements cryptography.

pub mod srp;

use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use hkdf::Hkdf;
use sha2::Sha512;
use x25519_dalek::{EphemeralSecret, PublicKey as X25519PublicKey};

use crate::error::Error;

/// HKDF-SHA512(salt, ikm, info, L) as used throughout pairing and the record layer.
#[must_use]
pub fn hkdf_sha512(salt: &[u8], ikm: &[u8], info: &[u8], len: usize) -> Vec<u8> {
    let hk = Hkdf::<Sha512>::new(Some(salt), ikm);
    let mut okm = vec![0u8; len];
    hk.expand(info, &mut okm)
        .expect("HKDF-SHA512 output length is always valid for len <= 255*64");
    okm
}

/// Build the 12-byte ChaCha20-Poly1305 nonce used by the pairing messages: an ASCII label
/// right-padded with leading zero bytes to 12 bytes total (e.g. `"PS-Msg05"` -> 4 zero bytes
/// followed by the 8 label bytes).
#[must_use]
pub fn literal_nonce(label: &[u8]) -> [u8; 12] {
    assert!(label.len() <= 12, "pairing nonce labels are at most 12 bytes");
    let mut nonce = [0u8; 12];
    nonce[12 - label.len()..].copy_from_slice(label);
    nonce
}

/// Build the record-layer nonce: 4 zero bytes followed by an 8-byte little-endian counter.
#[must_use]
pub fn counter_nonce(counter: u64) -> [u8; 12] {
    let mut nonce = [0u8; 12];
    nonce[4..].copy_from_slice(&counter.to_le_bytes());
    nonce
}

/// Encrypt `plaintext` with ChaCha20-Poly1305, returning `ciphertext || tag`.
pub fn chacha20poly1305_encrypt(key: &[u8; 32], nonce: &[u8; 12], aad: &[u8], plaintext: &[u8]) -> Vec<u8> {
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key));
    cipher
        .encrypt(Nonce::from_slice(nonce), Payload { msg: plaintext, aad })
        .expect("ChaCha20-Poly1305 encryption does not fail")
}

/// Decrypt `ciphertext || tag` with ChaCha20-Poly1305, returning the plaintext.
///
/// # Errors
/// Returns [`Error::Authentication`] if the AEAD tag does not verify.
pub fn chacha20poly1305_decrypt(
    key: &[u8; 32],
    nonce: &[u8; 12],
    aad: &[u8],
    ciphertext: &[u8],
) -> Result<Vec<u8>, Error> {
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key));
    cipher
        .decrypt(Nonce::from_slice(nonce), Payload { msg: ciphertext, aad })
        .map_err(|_| Error::Authentication)
}

/// A long-term Ed25519 identity keypair (the accessory's, or a decoded controller's).
#[derive(Clone)]
pub struct Ed25519Identity {
    signing_key: Option<SigningKey>,
    verifying_key: VerifyingKey,
}

impl Ed25519Identity {
    /// Generate a fresh long-term keypair (accessory identity, created on first boot).
    #[must_use]
    pub fn generate() -> Self {
        let signing_key = SigningKey::generate(&mut rand_core::OsRng);
        let verifying_key = signing_key.verifying_key();
        Self {
            signing_key: Some(signing_key),
            verifying_key,
        }
    }

    /// Wrap a long-term keypair loaded from persistent storage.
    #[must_use]
    pub fn from_signing_key_bytes(bytes: &[u8; 32]) -> Self {
        let signing_key = SigningKey::from_bytes(bytes);
        let verifying_key = signing_key.verifying_key();
        Self {
            signing_key: Some(signing_key),
            verifying_key,
        }
    }

    /// Wrap a peer's public key only (no signing capability) — the shape a controller's
    /// long-term public key arrives in over the wire.
    ///
    /// # Errors
    /// Returns [`Error::Protocol`] if `bytes` is not a valid Ed25519 public key.
    pub fn from_public_key_bytes(bytes: &[u8]) -> Result<Self, Error> {
        let array: [u8; 32] = bytes
            .try_into()
            .map_err(|_| Error::Protocol("Ed25519 public key must be 32 bytes"))?;
        let verifying_key =
            VerifyingKey::from_bytes(&array).map_err(|_| Error::Protocol("invalid Ed25519 public key"))?;
        Ok(Self {
            signing_key: None,
            verifying_key,
        })
    }

    /// The 32-byte raw public key, as carried in TLV `PublicKey`/`Identifier` items.
    #[must_use]
    pub fn public_key_bytes(&self) -> [u8; 32] {
        self.verifying_key.to_bytes()
    }

    /// The 32-byte raw signing key, for persistence.
    #[must_use]
    pub fn signing_key_bytes(&self) -> Option<[u8; 32]> {
        self.signing_key.as_ref().map(|k| k.to_bytes())
    }

    /// Sign `message` with the long-term private key.
    ///
    /// # Panics
    /// Panics if this identity was constructed from a public key only.
    #[must_use]
    pub fn sign(&self, message: &[u8]) -> [u8; 64] {
        self.signing_key
            .as_ref()
            .expect("signing requires the private half of the keypair")
            .sign(message)
            .to_bytes()
    }

    /// Verify a 64-byte Ed25519 signature over `message`.
    pub fn verify(&self, message: &[u8], signature: &[u8]) -> Result<(), Error> {
        let sig_bytes: [u8; 64] = signature
            .try_into()
            .map_err(|_| Error::Authentication)?;
        let signature = Signature::from_bytes(&sig_bytes);
        self.verifying_key
            .verify(message, &signature)
            .map_err(|_| Error::Authentication)
    }
}

/// A one-shot Curve25519 ephemeral keypair used by Pair-Verify: generated fresh for V1,
/// consumed by the single `diffie_hellman` call at V1's reply.
pub struct EphemeralKeyPair {
    secret: EphemeralSecret,
    public: X25519PublicKey,
}

impl EphemeralKeyPair {
    /// Generate a fresh ephemeral Curve25519 keypair.
    #[must_use]
    pub fn generate() -> Self {
        let secret = EphemeralSecret::random_from_rng(rand_core::OsRng);
        let public = X25519PublicKey::from(&secret);
        Self { secret, public }
    }

    /// The 32-byte public key to send to the peer.
    #[must_use]
    pub fn public_key_bytes(&self) -> [u8; 32] {
        self.public.to_bytes()
    }

    /// Consume this keypair to compute `X25519(self.secret, peer_public)`.
    ///
    /// # Errors
    /// Returns [`Error::Protocol`] if `peer_public` is not 32 bytes.
    pub fn diffie_hellman(self, peer_public: &[u8]) -> Result<[u8; 32], Error> {
        let array: [u8; 32] = peer_public
            .try_into()
            .map_err(|_| Error::Protocol("Curve25519 public key must be 32 bytes"))?;
        let peer = X25519PublicKey::from(array);
        Ok(self.secret.diffie_hellman(&peer).to_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chacha20poly1305_round_trips() {
        let key = [7u8; 32];
        let nonce = counter_nonce(0);
        let aad = [0x10, 0x00];
        let pt = b"hello hap";

        let ct = chacha20poly1305_encrypt(&key, &nonce, &aad, pt);
        let recovered = chacha20poly1305_decrypt(&key, &nonce, &aad, &ct).unwrap();
        assert_eq!(recovered, pt);
    }

    #[test]
    fn chacha20poly1305_detects_tamper() {
        let key = [7u8; 32];
        let nonce = counter_nonce(0);
        let mut ct = chacha20poly1305_encrypt(&key, &nonce, &[], b"data");
        let last = ct.len() - 1;
        ct[last] ^= 0x01;
        assert!(chacha20poly1305_decrypt(&key, &nonce, &[], &ct).is_err());
    }

    #[test]
    fn literal_nonce_pads_with_leading_zeros() {
        let nonce = literal_nonce(b"PS-Msg05");
        assert_eq!(&nonce[..4], &[0, 0, 0, 0]);
        assert_eq!(&nonce[4..], b"PS-Msg05");
    }

    #[test]
    fn counter_nonce_is_little_endian() {
        assert_eq!(counter_nonce(0), [0u8; 12]);
        let mut expect = [0u8; 12];
        expect[4] = 1;
        assert_eq!(counter_nonce(1), expect);
    }

    #[test]
    fn ed25519_sign_and_verify() {
        let identity = Ed25519Identity::generate();
        let sig = identity.sign(b"message");
        identity.verify(b"message", &sig).unwrap();
        assert!(identity.verify(b"tampered", &sig).is_err());
    }

    #[test]
    fn x25519_ecdh_agrees() {
        let a = EphemeralKeyPair::generate();
        let b = EphemeralKeyPair::generate();
        let a_pub = a.public_key_bytes();
        let b_pub = b.public_key_bytes();

        let shared_a = a.diffie_hellman(&b_pub).unwrap();
        let shared_b = b.diffie_hellman(&a_pub).unwrap();
        assert_eq!(shared_a, shared_b);
    }
}
