//! File-based root key provider for `WardSeal`.
//!
//! The key file holds the root key as text, in the same encodings accepted for
//! `WARDSEAL_ROOT_KEY`: 64 hex characters, or `base64:` followed by standard
//! base64. Suitable for development, tests and single-host deployments.

#![warn(clippy::pedantic, clippy::nursery)]

use rand::rngs::OsRng;
use rand::RngCore;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use wardseal::config::parse_key_text;
use wardseal::error::KeyProviderError;
use wardseal::key_provider::{KeyMaterial, KeyProvider, ROOT_KEY_SIZE};
use zeroize::Zeroizing;

/// Reads the root key from a file.
///
/// The file is read on every [`root_key`](KeyProvider::root_key) call, so a
/// replaced file is picked up by the next mapper built from this provider.
#[derive(Debug, Clone)]
pub struct FileKeyProvider {
    path: PathBuf,
}

impl FileKeyProvider {
    /// Creates a provider for an existing key file.
    ///
    /// # Errors
    ///
    /// Returns `KeyProviderError::NotConfigured` if the file does not exist.
    pub fn new(path: impl Into<PathBuf>) -> Result<Self, KeyProviderError> {
        let path = path.into();
        if !path.is_file() {
            return Err(KeyProviderError::NotConfigured(format!(
                "key file does not exist: {}",
                path.display()
            )));
        }
        Ok(Self { path })
    }

    /// Generates a fresh random root key, writes it as hex to `path` and
    /// returns a provider for it. On Unix the file is created with `0600`
    /// permissions.
    ///
    /// # Errors
    ///
    /// Returns `KeyProviderError::CreationFailed` if the file already exists,
    /// or an I/O error if it cannot be written.
    pub fn init(path: impl Into<PathBuf>) -> Result<Self, KeyProviderError> {
        let path = path.into();
        if path.exists() {
            return Err(KeyProviderError::CreationFailed(format!(
                "refusing to overwrite existing key file: {}",
                path.display()
            )));
        }

        let text = generate_key_hex();
        let mut file = create_private(&path)?;
        file.write_all(text.as_bytes())?;
        file.write_all(b"\n")?;
        file.sync_all()?;

        tracing::info!(path = %path.display(), "generated new root key file");
        Ok(Self { path })
    }

    /// Path of the key file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl KeyProvider for FileKeyProvider {
    fn root_key(&self) -> Result<KeyMaterial, KeyProviderError> {
        let text = Zeroizing::new(fs::read_to_string(&self.path)?);
        let key = parse_key_text(&text)?;
        tracing::debug!(path = %self.path.display(), "root key read from file");
        Ok(key)
    }
}

/// Returns 32 random bytes as lowercase hex.
#[must_use]
pub fn generate_key_hex() -> Zeroizing<String> {
    let mut bytes = Zeroizing::new([0u8; ROOT_KEY_SIZE]);
    OsRng.fill_bytes(&mut bytes[..]);
    Zeroizing::new(hex::encode(&bytes[..]))
}

#[cfg(unix)]
fn create_private(path: &Path) -> Result<fs::File, KeyProviderError> {
    use std::os::unix::fs::OpenOptionsExt;
    Ok(fs::OpenOptions::new().write(true).create_new(true).mode(0o600).open(path)?)
}

#[cfg(not(unix))]
fn create_private(path: &Path) -> Result<fs::File, KeyProviderError> {
    Ok(fs::OpenOptions::new().write(true).create_new(true).open(path)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_init_then_read() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("root.key");

        let provider = FileKeyProvider::init(&path).unwrap();
        assert!(provider.root_key().is_ok());

        let reopened = FileKeyProvider::new(&path).unwrap();
        assert_eq!(reopened.path(), path.as_path());
        assert!(reopened.root_key().is_ok());
    }

    #[test]
    fn test_init_refuses_overwrite() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("root.key");
        FileKeyProvider::init(&path).unwrap();
        let before = fs::read_to_string(&path).unwrap();

        let result = FileKeyProvider::init(&path);
        assert!(matches!(result, Err(KeyProviderError::CreationFailed(_))));
        assert_eq!(fs::read_to_string(&path).unwrap(), before);
    }

    #[test]
    fn test_missing_file_is_not_configured() {
        let dir = TempDir::new().unwrap();
        let result = FileKeyProvider::new(dir.path().join("absent.key"));
        assert!(matches!(result, Err(KeyProviderError::NotConfigured(_))));
    }

    #[test]
    fn test_accepts_base64_key_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("root.key");
        fs::write(&path, "base64:AQIDBAUGBwgJCgsMDQ4PEBESExQVFhcYGRobHB0eHyA=\n").unwrap();

        assert!(FileKeyProvider::new(&path).unwrap().root_key().is_ok());
    }

    #[test]
    fn test_rejects_short_key() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("root.key");
        fs::write(&path, "abcd").unwrap();

        let result = FileKeyProvider::new(&path).unwrap().root_key();
        assert!(matches!(result, Err(KeyProviderError::InvalidKey(_))));
    }

    #[test]
    fn test_generated_keys_differ() {
        let a = generate_key_hex();
        let b = generate_key_hex();
        assert_eq!(a.len(), ROOT_KEY_SIZE * 2);
        assert_ne!(*a, *b);
    }

    #[cfg(unix)]
    #[test]
    fn test_key_file_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("root.key");
        FileKeyProvider::init(&path).unwrap();

        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
