//! Encrypted-at-rest token map.
//!
//! The whole map is one JSON document, encrypted with the caller's key and
//! written to a single file. Reads never fail to the caller: a missing,
//! undecryptable or malformed file degrades to an empty map so the run
//! proceeds with fresh logins.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::errors::AppError;
use crate::models::TokenMap;
use crate::vault::TokenCipher;

pub const DEFAULT_TOKEN_FILE: &str = "encrypted_tokens.data";

pub struct TokenStore {
    path: PathBuf,
    cipher: Box<dyn TokenCipher>,
}

impl TokenStore {
    pub fn new(path: impl Into<PathBuf>, cipher: Box<dyn TokenCipher>) -> Self {
        Self {
            path: path.into(),
            cipher,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the persisted map, degrading to empty on any fault.
    pub fn load(&self) -> TokenMap {
        match self.try_load() {
            Ok(Some(tokens)) => {
                info!(accounts = tokens.len(), path = %self.path.display(), "loaded cached tokens");
                tokens
            }
            Ok(None) => {
                debug!(path = %self.path.display(), "no token file yet");
                TokenMap::new()
            }
            Err(e) => {
                warn!(
                    path = %self.path.display(),
                    error = %e,
                    "token file unreadable (wrong key or corrupted), starting with empty store"
                );
                TokenMap::new()
            }
        }
    }

    /// Like `load`, but surfaces the fault. `Ok(None)` when no file exists.
    pub fn try_load(&self) -> Result<Option<TokenMap>, AppError> {
        let blob = match fs::read(&self.path) {
            Ok(blob) => blob,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(AppError::Io(e)),
        };
        let plaintext = self.cipher.decrypt(&blob)?;
        let text = String::from_utf8(plaintext)
            .map_err(|e| AppError::Decryption(format!("plaintext is not UTF-8: {}", e)))?;
        let tokens: TokenMap = serde_json::from_str(&text)?;
        Ok(Some(tokens))
    }

    /// Serialize, encrypt and atomically replace the token file.
    pub fn save(&self, tokens: &TokenMap) -> Result<(), AppError> {
        let json = serde_json::to_string(tokens)?;
        let blob = self.cipher.encrypt(json.as_bytes())?;
        atomic_write(&self.path, &blob)?;
        info!(accounts = tokens.len(), path = %self.path.display(), "persisted tokens");
        Ok(())
    }
}

/// Write via a temp file in the target directory, then rename over the
/// destination so readers never observe a partial file.
fn atomic_write(path: &Path, bytes: &[u8]) -> Result<(), AppError> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tmp.as_file()
            .set_permissions(fs::Permissions::from_mode(0o600))?;
    }

    tmp.as_file_mut().write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| AppError::Io(e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CredentialBundle, IssuedToken};
    use crate::vault::{TokenKey, VaultCrypto};
    use chrono::{TimeZone, Utc};

    fn store(dir: &Path, key: &str) -> TokenStore {
        let crypto = VaultCrypto::new(TokenKey::parse(key).unwrap());
        TokenStore::new(dir.join(DEFAULT_TOKEN_FILE), Box::new(crypto))
    }

    fn sample_map() -> TokenMap {
        let issued = Utc.timestamp_millis_opt(1_760_000_000_000).unwrap();
        let mut bundle = CredentialBundle::with_device_id("device-a");
        bundle.access = Some(IssuedToken::new("access-a", issued));
        bundle.login = Some(IssuedToken::new("login-a", issued));
        bundle.app = Some(IssuedToken::new("app-a", issued));
        bundle.user_id = Some("1001".into());

        let mut map = TokenMap::new();
        map.insert("+8613800138000".into(), bundle);
        map.insert("runner@example.com".into(), CredentialBundle::with_device_id("device-b"));
        map
    }

    #[test]
    fn test_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path(), "0123456789abcdef");
        assert!(store.try_load().unwrap().is_none());
        assert!(store.load().is_empty());
    }

    #[test]
    fn test_save_then_load_is_field_for_field_equal() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path(), "0123456789abcdef");
        let map = sample_map();

        store.save(&map).unwrap();
        assert_eq!(store.load(), map);
    }

    #[test]
    fn test_wrong_key_degrades_to_empty() {
        let dir = tempfile::tempdir().unwrap();
        store(dir.path(), "0123456789abcdef").save(&sample_map()).unwrap();

        let other = store(dir.path(), "fedcba9876543210");
        assert!(matches!(other.try_load(), Err(AppError::Decryption(_))));
        assert!(other.load().is_empty());
    }

    #[test]
    fn test_corrupt_file_degrades_to_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path(), "0123456789abcdef");
        fs::write(store.path(), b"definitely not ciphertext").unwrap();
        assert!(store.load().is_empty());
    }

    #[test]
    fn test_valid_ciphertext_of_bad_json_degrades_to_empty() {
        let dir = tempfile::tempdir().unwrap();
        let crypto = VaultCrypto::new(TokenKey::parse("0123456789abcdef").unwrap());
        let blob = crypto.encrypt(b"[not a map]").unwrap();
        let store = store(dir.path(), "0123456789abcdef");
        fs::write(store.path(), blob).unwrap();

        assert!(matches!(store.try_load(), Err(AppError::Serialization(_))));
        assert!(store.load().is_empty());
    }

    #[test]
    fn test_save_replaces_previous_contents() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path(), "0123456789abcdef");
        store.save(&sample_map()).unwrap();

        let mut smaller = TokenMap::new();
        smaller.insert("x@example.com".into(), CredentialBundle::with_device_id("d"));
        store.save(&smaller).unwrap();

        assert_eq!(store.load(), smaller);
    }
}
