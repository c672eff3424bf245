use aes_gcm::{
    aead::{Aead, KeyInit, OsRng},
    Aes128Gcm, Nonce,
};
use rand::RngCore;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::errors::AppError;

pub const KEY_LEN: usize = 16;
const NONCE_LEN: usize = 12;

/// Fixed-length symmetric key that enables token persistence.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct TokenKey([u8; KEY_LEN]);

impl TokenKey {
    /// Accepts exactly 16 bytes of UTF-8 text, the form users paste into
    /// `AES_KEY`.
    pub fn parse(raw: &str) -> Result<Self, AppError> {
        let bytes = raw.as_bytes();
        if bytes.len() != KEY_LEN {
            return Err(AppError::Config(format!(
                "AES_KEY must be exactly {} bytes, got {}",
                KEY_LEN,
                bytes.len()
            )));
        }
        let mut key = [0u8; KEY_LEN];
        key.copy_from_slice(bytes);
        Ok(Self(key))
    }
}

impl std::fmt::Debug for TokenKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("TokenKey(..)")
    }
}

/// AES-128-GCM over the whole serialized token map.
/// Blob layout: `nonce (12 bytes) || ciphertext || tag`.
pub struct VaultCrypto {
    key: TokenKey,
}

impl VaultCrypto {
    pub fn new(key: TokenKey) -> Self {
        Self { key }
    }

    fn cipher(&self) -> Result<Aes128Gcm, AppError> {
        Aes128Gcm::new_from_slice(&self.key.0)
            .map_err(|e| AppError::Decryption(format!("invalid key length: {:?}", e)))
    }
}

impl super::TokenCipher for VaultCrypto {
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, AppError> {
        let nonce_bytes = generate_nonce();
        let nonce = Nonce::from_slice(&nonce_bytes);
        let ciphertext = self
            .cipher()?
            .encrypt(nonce, plaintext)
            .map_err(|e| AppError::Decryption(format!("encryption failed: {}", e)))?;

        let mut blob = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        blob.extend_from_slice(&nonce_bytes);
        blob.extend_from_slice(&ciphertext);
        Ok(blob)
    }

    fn decrypt(&self, blob: &[u8]) -> Result<Vec<u8>, AppError> {
        if blob.len() < NONCE_LEN {
            return Err(AppError::Decryption(format!(
                "blob too short: {} bytes",
                blob.len()
            )));
        }
        let (nonce_bytes, ciphertext) = blob.split_at(NONCE_LEN);
        self.cipher()?
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|_| AppError::Decryption("wrong key or corrupted data".into()))
    }
}

fn generate_nonce() -> [u8; NONCE_LEN] {
    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);
    nonce
}
