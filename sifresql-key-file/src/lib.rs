//! File-based key provider for `SifreSQL`.
//!
//! This provider stores keys in the filesystem and is suitable for
//! development and testing environments.

#![warn(clippy::pedantic, clippy::nursery)]

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use rand::rngs::OsRng;
use rand::RngCore;
use secrecy::SecretVec;
use sifresql::error::{HandlerError, KeyProviderError};
use sifresql::handler::{HandlerRegistry, SecurityHandler};
use sifresql::key_provider::{KeyProvider, KEY_SIZE};
use sifresql::vault::VaultHandler;
use tracing::info;
use zeroize::Zeroizing;

/// Identifier of the [`VaultHandler`] backed by a [`FileKeyProvider`].
pub const FILE_VAULT_HANDLER: &str = "vault-file";

/// Handler option naming the key directory.
pub const KEY_DIR_OPTION: &str = "keyDir";

const CURRENT_FILE: &str = "current";
const PEPPER_FILE: &str = "pepper.key";
const KEY_PREFIX: &str = "key_";
const KEY_SUFFIX: &str = ".key";

/// File-based key provider for development and testing.
///
/// Keys are stored in the filesystem with the following structure:
/// ```text
/// keys/
/// ├── key_v1.key      (32 bytes, 0600 permissions)
/// ├── key_v2.key      (32 bytes, 0600 permissions)
/// ├── current         (text file naming the active key, e.g. "v2")
/// └── pepper.key      (32 bytes, 0600 permissions)
/// ```
///
/// Files are read on every call, so a rotation done by another process is
/// picked up without restarting.
#[derive(Debug, Clone)]
pub struct FileKeyProvider {
    key_dir: PathBuf,
}

impl FileKeyProvider {
    /// Opens an existing key directory.
    ///
    /// # Errors
    ///
    /// Returns error if the directory doesn't exist.
    pub fn new(key_dir: impl Into<PathBuf>) -> Result<Self, KeyProviderError> {
        let key_dir = key_dir.into();
        if !key_dir.is_dir() {
            return Err(KeyProviderError::CreationFailed(format!(
                "Key directory does not exist: {}",
                key_dir.display()
            )));
        }
        Ok(Self { key_dir })
    }

    /// Initializes a new key directory with a fresh key `v1` and pepper.
    ///
    /// # Errors
    ///
    /// Returns error if the directory already holds keys, or if directory
    /// creation or key generation fails.
    pub fn init(key_dir: impl Into<PathBuf>) -> Result<Self, KeyProviderError> {
        let key_dir = key_dir.into();
        fs::create_dir_all(&key_dir)?;
        if key_dir.join(CURRENT_FILE).exists() || key_dir.join(PEPPER_FILE).exists() {
            return Err(KeyProviderError::CreationFailed(format!(
                "Key directory is already initialized: {}",
                key_dir.display()
            )));
        }

        let provider = Self { key_dir };
        write_secret(&provider.key_dir.join(PEPPER_FILE), &random_key())?;
        provider.install_key("v1")?;
        info!(key_dir = %provider.key_dir.display(), "key directory initialized");
        Ok(provider)
    }

    /// Generates a new key and makes it current. Older keys stay on disk
    /// so existing ciphertexts keep decrypting.
    ///
    /// Returns the new key id.
    ///
    /// # Errors
    ///
    /// Returns error if the current key id is unreadable or a file cannot be written.
    pub fn rotate(&self) -> Result<String, KeyProviderError> {
        let next = self.key_ids()?.iter().filter_map(|id| version(id)).max().unwrap_or(0) + 1;
        let key_id = format!("v{next}");
        self.install_key(&key_id)?;
        info!(key_id = %key_id, "rotated to new key");
        Ok(key_id)
    }

    /// Ids of every key stored in the directory, sorted by version.
    ///
    /// # Errors
    ///
    /// Returns error if the directory cannot be listed.
    pub fn key_ids(&self) -> Result<Vec<String>, KeyProviderError> {
        let mut ids = Vec::new();
        for entry in fs::read_dir(&self.key_dir)? {
            let name = entry?.file_name();
            if let Some(id) = name
                .to_str()
                .and_then(|name| name.strip_prefix(KEY_PREFIX))
                .and_then(|rest| rest.strip_suffix(KEY_SUFFIX))
            {
                ids.push(id.to_string());
            }
        }
        ids.sort_by_key(|id| (version(id), id.clone()));
        Ok(ids)
    }

    #[must_use]
    pub fn key_dir(&self) -> &Path {
        &self.key_dir
    }

    fn key_path(&self, key_id: &str) -> Result<PathBuf, KeyProviderError> {
        let valid = |c: char| c.is_ascii_alphanumeric() || c == '-' || c == '_';
        if key_id.is_empty() || !key_id.chars().all(valid) {
            return Err(KeyProviderError::InvalidKey(format!("invalid key id `{key_id}`")));
        }
        Ok(self.key_dir.join(format!("{KEY_PREFIX}{key_id}{KEY_SUFFIX}")))
    }

    fn install_key(&self, key_id: &str) -> Result<(), KeyProviderError> {
        let path = self.key_path(key_id)?;
        if path.exists() {
            return Err(KeyProviderError::CreationFailed(format!("key `{key_id}` already exists")));
        }
        write_secret(&path, &random_key())?;
        fs::write(self.key_dir.join(CURRENT_FILE), key_id)?;
        Ok(())
    }
}

impl KeyProvider for FileKeyProvider {
    fn current_key_id(&self) -> Result<String, KeyProviderError> {
        match fs::read_to_string(self.key_dir.join(CURRENT_FILE)) {
            Ok(id) if !id.trim().is_empty() => Ok(id.trim().to_string()),
            Ok(_) => Err(KeyProviderError::NoActiveKey),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(KeyProviderError::NoActiveKey),
            Err(e) => Err(e.into()),
        }
    }

    fn key(&self, key_id: &str) -> Result<SecretVec<u8>, KeyProviderError> {
        match read_secret(&self.key_path(key_id)?) {
            Err(KeyProviderError::Io(e)) if e.kind() == io::ErrorKind::NotFound => {
                Err(KeyProviderError::KeyNotFound(key_id.to_string()))
            }
            other => other,
        }
    }

    fn pepper(&self) -> Result<Option<SecretVec<u8>>, KeyProviderError> {
        match read_secret(&self.key_dir.join(PEPPER_FILE)) {
            Ok(pepper) => Ok(Some(pepper)),
            Err(KeyProviderError::Io(e)) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(KeyProviderError::PepperUnavailable(e.to_string())),
        }
    }
}

/// Registers the [`FILE_VAULT_HANDLER`], which reads the key directory from
/// the `keyDir` handler option.
pub fn register(registry: &mut HandlerRegistry) {
    registry.register(FILE_VAULT_HANDLER, |options| {
        let key_dir = options.get(KEY_DIR_OPTION).ok_or_else(|| HandlerError::InvalidOption {
            option: KEY_DIR_OPTION.to_string(),
            reason: "missing".to_string(),
        })?;
        let provider = FileKeyProvider::new(key_dir)?;
        Ok(Box::new(VaultHandler::new(provider)?) as Box<dyn SecurityHandler>)
    });
}

fn version(key_id: &str) -> Option<u64> {
    key_id.strip_prefix('v')?.parse().ok()
}

fn random_key() -> Zeroizing<Vec<u8>> {
    let mut key = Zeroizing::new(vec![0u8; KEY_SIZE]);
    OsRng.fill_bytes(&mut key);
    key
}

fn read_secret(path: &Path) -> Result<SecretVec<u8>, KeyProviderError> {
    let bytes = fs::read(path)?;
    if bytes.len() != KEY_SIZE {
        return Err(KeyProviderError::InvalidKey(format!(
            "{} must hold {KEY_SIZE} bytes, found {}",
            path.display(),
            bytes.len()
        )));
    }
    Ok(SecretVec::new(bytes))
}

fn write_secret(path: &Path, bytes: &[u8]) -> Result<(), KeyProviderError> {
    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use tempfile::TempDir;

    #[test]
    fn test_init_creates_key_and_pepper() {
        let dir = TempDir::new().unwrap();
        let provider = FileKeyProvider::init(dir.path().join("keys")).unwrap();

        assert_eq!(provider.current_key_id().unwrap(), "v1");
        assert_eq!(provider.key("v1").unwrap().expose_secret().len(), KEY_SIZE);
        assert!(provider.pepper().unwrap().is_some());
        assert_eq!(provider.key_ids().unwrap(), vec!["v1".to_string()]);
    }

    #[test]
    fn test_init_refuses_existing_directory() {
        let dir = TempDir::new().unwrap();
        FileKeyProvider::init(dir.path()).unwrap();

        assert!(matches!(
            FileKeyProvider::init(dir.path()),
            Err(KeyProviderError::CreationFailed(_))
        ));
    }

    #[test]
    fn test_rotate_keeps_old_keys() {
        let dir = TempDir::new().unwrap();
        let provider = FileKeyProvider::init(dir.path()).unwrap();
        let old = provider.key("v1").unwrap().expose_secret().clone();

        assert_eq!(provider.rotate().unwrap(), "v2");
        assert_eq!(provider.rotate().unwrap(), "v3");

        assert_eq!(provider.current_key_id().unwrap(), "v3");
        assert_eq!(provider.key("v1").unwrap().expose_secret(), &old);
        assert_ne!(provider.key("v3").unwrap().expose_secret(), &old);
        assert_eq!(provider.key_ids().unwrap(), ["v1", "v2", "v3"]);
    }

    #[test]
    fn test_missing_key_and_directory() {
        let dir = TempDir::new().unwrap();
        let provider = FileKeyProvider::init(dir.path()).unwrap();

        assert!(matches!(provider.key("v9"), Err(KeyProviderError::KeyNotFound(id)) if id == "v9"));
        assert!(matches!(provider.key("../v1"), Err(KeyProviderError::InvalidKey(_))));
        assert!(FileKeyProvider::new(dir.path().join("missing")).is_err());
    }

    #[test]
    fn test_empty_directory_has_no_active_key() {
        let dir = TempDir::new().unwrap();
        let provider = FileKeyProvider::new(dir.path()).unwrap();

        assert!(matches!(provider.current_key_id(), Err(KeyProviderError::NoActiveKey)));
        assert!(provider.pepper().unwrap().is_none());
    }

    #[test]
    fn test_truncated_key_is_rejected() {
        let dir = TempDir::new().unwrap();
        let provider = FileKeyProvider::init(dir.path()).unwrap();
        fs::write(dir.path().join("key_v1.key"), [1u8; 4]).unwrap();

        assert!(matches!(provider.key("v1"), Err(KeyProviderError::InvalidKey(_))));
    }

    #[cfg(unix)]
    #[test]
    fn test_key_files_are_private() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        FileKeyProvider::init(dir.path()).unwrap();

        let mode = fs::metadata(dir.path().join(PEPPER_FILE)).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
