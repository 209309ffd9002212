//! Envelope encryption for PHI held in the intake store.
//!
//! Ciphertext layout: 12-byte random nonce followed by the AES-256-GCM output.

use aes_gcm::aead::{Aead, KeyInit, OsRng, rand_core::RngCore};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use hkdf::Hkdf;
use sha2::Sha256;

use crate::error::{AppError, Result};

const NONCE_LEN: usize = 12;
const PHI_KEY_INFO: &[u8] = b"rxcheckout-phi-v1";

#[derive(Clone)]
pub struct MasterKey {
    key: [u8; 32],
}

impl MasterKey {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let key: [u8; 32] = bytes
            .try_into()
            .map_err(|_| AppError::Internal("Encryption key must be exactly 32 bytes".into()))?;
        Ok(Self { key })
    }

    /// Derive a PHI key from another secret (the prefill token secret) via HKDF.
    pub fn derive(secret: &str) -> Result<Self> {
        let hk = Hkdf::<Sha256>::new(None, secret.as_bytes());
        let mut key = [0u8; 32];
        hk.expand(PHI_KEY_INFO, &mut key)
            .map_err(|_| AppError::Internal("Failed to derive PHI key".into()))?;
        Ok(Self { key })
    }

    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.key));
        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);

        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), plaintext)
            .map_err(|_| AppError::Internal("Encryption failed".into()))?;

        let mut out = nonce_bytes.to_vec();
        out.extend(ciphertext);
        Ok(out)
    }

    pub fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>> {
        if data.len() < NONCE_LEN {
            return Err(AppError::Internal("Invalid ciphertext: too short".into()));
        }
        let (nonce, ciphertext) = data.split_at(NONCE_LEN);
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.key));
        cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| AppError::Internal("Decryption failed".into()))
    }
}

impl std::fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("MasterKey(..)")
    }
}
