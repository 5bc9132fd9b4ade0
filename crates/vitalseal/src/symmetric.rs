//! AES-256-GCM for identifying fields.
//!
//! Every call to [`encrypt`] draws a fresh 96-bit nonce from the OS
//! generator. Decryption verifies the tag before any plaintext is released.

use aes_gcm::aead::{AeadCore, AeadInPlace, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce, Tag};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub const KEY_BYTES: usize = 32;
pub const NONCE_BYTES: usize = 12;
pub const TAG_BYTES: usize = 16;

/// A 256-bit AES key.
#[derive(Clone, PartialEq, Eq)]
pub struct SymmetricKey([u8; KEY_BYTES]);

impl std::fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SymmetricKey(..)")
    }
}

impl SymmetricKey {
    pub fn from_bytes(bytes: [u8; KEY_BYTES]) -> Self {
        Self(bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let array: [u8; KEY_BYTES] = bytes
            .try_into()
            .map_err(|_| Error::InvalidKeyLength(bytes.len()))?;
        Ok(Self(array))
    }

    pub fn as_bytes(&self) -> &[u8; KEY_BYTES] {
        &self.0
    }

    fn cipher(&self) -> Aes256Gcm {
        Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.0))
    }
}

/// Nonce, ciphertext and detached tag of one AES-GCM encryption.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AeadPayload {
    pub nonce: [u8; NONCE_BYTES],
    pub ciphertext: Vec<u8>,
    pub tag: [u8; TAG_BYTES],
}

impl AeadPayload {
    /// nonce | tag | ciphertext.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(NONCE_BYTES + TAG_BYTES + self.ciphertext.len());
        out.extend_from_slice(&self.nonce);
        out.extend_from_slice(&self.tag);
        out.extend_from_slice(&self.ciphertext);
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < NONCE_BYTES + TAG_BYTES {
            return Err(Error::AuthenticationFailure);
        }
        let (nonce, rest) = bytes.split_at(NONCE_BYTES);
        let (tag, ciphertext) = rest.split_at(TAG_BYTES);
        let mut payload = Self {
            nonce: [0u8; NONCE_BYTES],
            ciphertext: ciphertext.to_vec(),
            tag: [0u8; TAG_BYTES],
        };
        payload.nonce.copy_from_slice(nonce);
        payload.tag.copy_from_slice(tag);
        Ok(payload)
    }
}

/// Fresh random key from the OS generator.
pub fn generate_key() -> SymmetricKey {
    let key = Aes256Gcm::generate_key(OsRng);
    let mut bytes = [0u8; KEY_BYTES];
    bytes.copy_from_slice(&key);
    SymmetricKey(bytes)
}

pub fn encrypt(plaintext: &[u8], key: &SymmetricKey) -> Result<AeadPayload> {
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
    let mut buffer = plaintext.to_vec();
    let tag = key
        .cipher()
        .encrypt_in_place_detached(&nonce, b"", &mut buffer)
        .map_err(|_| Error::SymmetricEncryption)?;

    let mut payload = AeadPayload {
        nonce: [0u8; NONCE_BYTES],
        ciphertext: buffer,
        tag: [0u8; TAG_BYTES],
    };
    payload.nonce.copy_from_slice(&nonce);
    payload.tag.copy_from_slice(&tag);
    Ok(payload)
}

/// Verify and decrypt. Any tag mismatch is [`Error::AuthenticationFailure`].
pub fn decrypt(payload: &AeadPayload, key: &SymmetricKey) -> Result<Vec<u8>> {
    let mut buffer = payload.ciphertext.clone();
    key.cipher()
        .decrypt_in_place_detached(
            Nonce::from_slice(&payload.nonce),
            b"",
            &mut buffer,
            Tag::from_slice(&payload.tag),
        )
        .map_err(|_| Error::AuthenticationFailure)?;
    Ok(buffer)
}

/// UTF-8 convenience wrapper for string fields.
pub fn encrypt_str(value: &str, key: &SymmetricKey) -> Result<AeadPayload> {
    encrypt(value.as_bytes(), key)
}

pub fn decrypt_str(payload: &AeadPayload, key: &SymmetricKey) -> Result<String> {
    String::from_utf8(decrypt(payload, key)?).map_err(|_| Error::AuthenticationFailure)
}
