pub mod builtin;

use crate::errors::AppError;

pub use builtin::{TokenKey, VaultCrypto};

/// Symmetric encrypt/decrypt contract used by the token store.
/// Implementations: VaultCrypto (AES-128-GCM, nonce-prefixed blobs).
pub trait TokenCipher: Send + Sync {
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, AppError>;

    /// Must fail (never panic) on a wrong key or a corrupt blob.
    fn decrypt(&self, blob: &[u8]) -> Result<Vec<u8>, AppError>;
}
