//! Encryption of small secrets (username, password) stored in the config file.
//!
//! The key is derived from the device id, so secrets sealed for one device id
//! cannot be opened under another. Blob format: base64(nonce ‖ ciphertext).

use crate::error::CryptoError;
use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use sha2::{Digest, Sha256};

/// Application salt mixed into the key derivation.
const KEY_SALT: &[u8] = b"l8myfamily-agent";

/// Salts of the earlier laptop and Android agents, accepted when opening.
pub(crate) const LEGACY_KEY_SALTS: &[&[u8]] =
    &[b"l8myfamily-laptop-agent", b"l8myfamily-android-agent"];

/// AES-GCM nonce size (96 bits).
const NONCE_SIZE: usize = 12;

/// AES-256-GCM sealer keyed by a device id.
pub struct SecretBox {
    cipher: Aes256Gcm,
}

impl SecretBox {
    pub fn for_device(device_id: &str) -> Self {
        Self::with_salt(device_id, KEY_SALT)
    }

    pub(crate) fn with_salt(device_id: &str, salt: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(device_id.as_bytes());
        hasher.update(salt);
        let key = hasher.finalize();
        Self {
            cipher: Aes256Gcm::new(&key),
        }
    }

    /// Encrypt `plaintext` with a fresh random nonce.
    pub fn seal(&self, plaintext: &str) -> Result<String, CryptoError> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|_| CryptoError::Encrypt)?;

        let mut combined = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        combined.extend_from_slice(nonce.as_slice());
        combined.extend_from_slice(&ciphertext);
        Ok(STANDARD.encode(combined))
    }

    /// Decrypt a blob produced by [`SecretBox::seal`].
    pub fn open(&self, blob: &str) -> Result<String, CryptoError> {
        let combined = STANDARD
            .decode(blob.trim())
            .map_err(|e| CryptoError::Malformed(e.to_string()))?;

        if combined.len() < NONCE_SIZE {
            return Err(CryptoError::Malformed("ciphertext too short".to_string()));
        }

        let (nonce_bytes, ciphertext) = combined.split_at(NONCE_SIZE);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|_| CryptoError::Decrypt)?;

        String::from_utf8(plaintext).map_err(|e| CryptoError::Malformed(e.to_string()))
    }
}

/// Seal `plaintext` for `device_id`.
pub fn seal(plaintext: &str, device_id: &str) -> Result<String, CryptoError> {
    SecretBox::for_device(device_id).seal(plaintext)
}

/// Open a blob sealed for `device_id`.
pub fn open(blob: &str, device_id: &str) -> Result<String, CryptoError> {
    SecretBox::for_device(device_id).open(blob)
}

/// Like [`open`], but also accepts blobs sealed by the earlier agents.
///
/// Such secrets are re-sealed under the current key on the next save.
pub fn open_with_legacy(blob: &str, device_id: &str) -> Result<String, CryptoError> {
    let err = match open(blob, device_id) {
        Err(CryptoError::Decrypt) => CryptoError::Decrypt,
        result => return result,
    };

    for salt in LEGACY_KEY_SALTS {
        if let Ok(plaintext) = SecretBox::with_salt(device_id, salt).open(blob) {
            tracing::debug!("Opened secret sealed by an earlier agent");
            return Ok(plaintext);
        }
    }
    Err(err)
}
