//! Password-based symmetric encryption for the stream framer.
//!
//! The default [`PasswordCipher`] derives a key with Argon2id and seals with
//! AES-256-GCM. Salt and nonce travel in the stream header as `salt ‖ nonce`.

use crate::error::{QrbError, Result};
use aes_gcm::{
    aead::{rand_core::RngCore, Aead, KeyInit, OsRng},
    Aes256Gcm, Key, Nonce,
};
use argon2::Argon2;
use std::fmt;

pub const KEY_SIZE: usize = 32;
pub const SALT_SIZE: usize = 16;
pub const NONCE_SIZE: usize = 12;

pub trait Cipher: Send + Sync {
    /// Length of the parameter block (`salt ‖ nonce`) stored in the header.
    fn params_len(&self) -> usize;

    /// Returns `(params, ciphertext)`.
    fn seal(&self, password: &str, plaintext: &[u8]) -> Result<(Vec<u8>, Vec<u8>)>;

    /// Fails with [`QrbError::DecryptError`] on a wrong password or tampered data.
    fn open(&self, password: &str, params: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>>;
}

/// Argon2id output. Zeroed when dropped, whichever path drops it.
pub struct DerivedKey([u8; KEY_SIZE]);

impl DerivedKey {
    pub fn derive(password: &str, salt: &[u8]) -> Result<Self> {
        let mut key = DerivedKey([0u8; KEY_SIZE]);
        Argon2::default()
            .hash_password_into(password.as_bytes(), salt, &mut key.0)
            .map_err(|e| QrbError::Encrypt(format!("argon2: {e}")))?;
        Ok(key)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }

    fn aead(&self) -> Aes256Gcm {
        Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.0))
    }
}

impl fmt::Debug for DerivedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DerivedKey([REDACTED])")
    }
}

impl Drop for DerivedKey {
    fn drop(&mut self) {
        self.0.iter_mut().for_each(|b| *b = 0);
    }
}

#[derive(Default, Clone, Copy, Debug)]
pub struct PasswordCipher;

impl Cipher for PasswordCipher {
    fn params_len(&self) -> usize {
        SALT_SIZE + NONCE_SIZE
    }

    fn seal(&self, password: &str, plaintext: &[u8]) -> Result<(Vec<u8>, Vec<u8>)> {
        let mut params = vec![0u8; SALT_SIZE + NONCE_SIZE];
        OsRng.fill_bytes(&mut params);
        let (salt, nonce) = params.split_at(SALT_SIZE);

        let key = DerivedKey::derive(password, salt)?;
        let ciphertext = key
            .aead()
            .encrypt(Nonce::from_slice(nonce), plaintext)
            .map_err(|e| QrbError::Encrypt(e.to_string()))?;
        Ok((params, ciphertext))
    }

    fn open(&self, password: &str, params: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>> {
        if params.len() != self.params_len() {
            return Err(QrbError::DecryptError(format!(
                "expected {} bytes of salt and nonce, got {}",
                self.params_len(),
                params.len()
            )));
        }
        let (salt, nonce) = params.split_at(SALT_SIZE);
        let key = DerivedKey::derive(password, salt)
            .map_err(|e| QrbError::DecryptError(e.to_string()))?;
        key.aead()
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| QrbError::DecryptError("wrong password or corrupted ciphertext".into()))
    }
}
