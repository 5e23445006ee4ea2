//! AEAD seal/open sessions
//!
//! A [`Session`] owns one encrypt key and one decrypt key and turns packet
//! plaintexts into wire datagrams: an 8-byte nonce, the ciphertext with its
//! 16-byte tag, and a trailing id byte appended by the caller so a
//! multiplexing receiver can pick the right session before opening.
//! Sealing never reuses a nonce; opening failures are a boolean condition,
//! not an error path.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_128_GCM};
use ring::rand::{SecureRandom, SystemRandom};
use thiserror::Error;

/// Serialized nonce length on the wire.
pub const NONCE_LEN: usize = 8;

/// AEAD authentication tag length.
pub const TAG_LEN: usize = 16;

const KEY_LEN: usize = 16;

/// Key handling errors
#[derive(Error, Debug)]
pub enum KeyError {
    #[error("invalid base64 key encoding")]
    BadEncoding,

    #[error("key material has wrong length")]
    BadLength,

    #[error("system randomness unavailable")]
    NoEntropy,
}

/// A 128-bit key with a printable base64 form.
#[derive(Clone, PartialEq, Eq)]
pub struct Base64Key {
    key: [u8; KEY_LEN],
}

impl Base64Key {
    /// Generate a fresh random key.
    pub fn random(rng: &SystemRandom) -> Result<Self, KeyError> {
        let mut key = [0u8; KEY_LEN];
        rng.fill(&mut key).map_err(|_| KeyError::NoEntropy)?;
        Ok(Base64Key { key })
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, KeyError> {
        let key: [u8; KEY_LEN] = bytes.try_into().map_err(|_| KeyError::BadLength)?;
        Ok(Base64Key { key })
    }

    pub fn from_printable(printable: &str) -> Result<Self, KeyError> {
        let bytes = BASE64
            .decode(printable)
            .map_err(|_| KeyError::BadEncoding)?;
        Self::from_bytes(&bytes)
    }

    pub fn printable(&self) -> String {
        BASE64.encode(self.key)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.key
    }
}

impl std::fmt::Debug for Base64Key {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // never print key material
        write!(f, "Base64Key(..)")
    }
}

fn gcm_key(key: &Base64Key) -> LessSafeKey {
    // length is fixed by construction
    LessSafeKey::new(UnboundKey::new(&AES_128_GCM, key.as_bytes()).expect("AES-128 key"))
}

/// One direction pair of AEAD keys with a strictly increasing seal nonce.
pub struct Session {
    seal_key: LessSafeKey,
    open_key: LessSafeKey,
    next_nonce: u64,
}

impl Session {
    pub fn new(encrypt_key: &Base64Key, decrypt_key: &Base64Key) -> Self {
        Session {
            seal_key: gcm_key(encrypt_key),
            open_key: gcm_key(decrypt_key),
            next_nonce: 0,
        }
    }

    fn nonce(value: u64) -> Nonce {
        let mut bytes = [0u8; 12];
        bytes[4..].copy_from_slice(&value.to_be_bytes());
        Nonce::assume_unique_for_key(bytes)
    }

    /// Seal a plaintext under the given associated data.
    ///
    /// The output is `nonce(8) ‖ ciphertext ‖ tag(16)`; the caller appends
    /// its own id byte before putting the datagram on the wire.
    pub fn seal(&mut self, associated_data: &[u8], plaintext: &[u8]) -> Vec<u8> {
        let nonce_value = self.next_nonce;
        self.next_nonce += 1;

        let mut out = Vec::with_capacity(NONCE_LEN + plaintext.len() + TAG_LEN);
        out.extend_from_slice(&nonce_value.to_be_bytes());
        out.extend_from_slice(plaintext);

        let tag = self
            .seal_key
            .seal_in_place_separate_tag(
                Self::nonce(nonce_value),
                Aad::from(associated_data),
                &mut out[NONCE_LEN..],
            )
            .expect("sealing cannot fail for in-range plaintext");
        out.extend_from_slice(tag.as_ref());
        out
    }

    /// Open a sealed message under the expected associated data.
    ///
    /// Returns `None` on any authentication or framing failure; the caller
    /// counts the failure and carries on.
    pub fn open(&self, expected_associated_data: &[u8], wire: &[u8]) -> Option<Vec<u8>> {
        if wire.len() < NONCE_LEN + TAG_LEN {
            return None;
        }

        let nonce_value = u64::from_be_bytes(wire[..NONCE_LEN].try_into().ok()?);
        let mut in_out = wire[NONCE_LEN..].to_vec();

        let plaintext = self
            .open_key
            .open_in_place(
                Self::nonce(nonce_value),
                Aad::from(expected_associated_data),
                &mut in_out,
            )
            .ok()?;
        let len = plaintext.len();
        in_out.truncate(len);
        Some(in_out)
    }
}
