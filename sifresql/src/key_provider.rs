//! Key provider abstraction for the built-in vault handler.

use std::collections::BTreeMap;

use secrecy::{ExposeSecret, SecretVec};

use crate::error::{HandlerError, KeyProviderError};
use crate::handler::HandlerOptions;

/// Length in bytes of a master key and of the pepper.
pub const KEY_SIZE: usize = 32;

/// Provides key material to the [`VaultHandler`](crate::vault::VaultHandler).
///
/// Implementations must be thread-safe (`Send + Sync`): one provider serves
/// every statement the interceptor processes.
///
/// # Example
///
/// ```rust,ignore
/// use sifresql::key_provider::KeyProvider;
///
/// struct MyProvider;
///
/// impl KeyProvider for MyProvider {
///     fn current_key_id(&self) -> Result<String, KeyProviderError> {
///         // Implementation
///     }
///     // ... other methods
/// }
/// ```
pub trait KeyProvider: Send + Sync {
    /// Returns the identifier of the key used for new ciphertexts.
    ///
    /// # Errors
    ///
    /// Returns `KeyProviderError::NoActiveKey` if no key is configured.
    fn current_key_id(&self) -> Result<String, KeyProviderError>;

    /// Returns the master key stored under `key_id`.
    ///
    /// Older keys stay readable after a rotation so existing ciphertexts
    /// can still be decrypted.
    ///
    /// # Errors
    ///
    /// Returns `KeyProviderError::KeyNotFound` if the id is unknown.
    fn key(&self, key_id: &str) -> Result<SecretVec<u8>, KeyProviderError>;

    /// Returns the pepper value for blind index generation.
    ///
    /// # Returns
    ///
    /// Returns `None` if the provider doesn't support blind indexes.
    ///
    /// # Errors
    ///
    /// Returns `KeyProviderError::PepperUnavailable` if pepper retrieval fails.
    fn pepper(&self) -> Result<Option<SecretVec<u8>>, KeyProviderError> {
        Ok(None)
    }
}

/// In-memory key provider configured from hex strings.
///
/// Used by the `"vault"` handler, which reads `masterKey` (and optionally
/// `keyId`) plus `pepper` from the handler options.
pub struct StaticKeyProvider {
    current: String,
    keys: BTreeMap<String, SecretVec<u8>>,
    pepper: Option<SecretVec<u8>>,
}

impl StaticKeyProvider {
    /// Creates a provider holding a single key.
    ///
    /// # Errors
    ///
    /// Returns `KeyProviderError::InvalidKey` if the key is not [`KEY_SIZE`] bytes.
    pub fn new(key_id: impl Into<String>, key: Vec<u8>) -> Result<Self, KeyProviderError> {
        check_length("master key", &key)?;
        let current = key_id.into();
        let mut keys = BTreeMap::new();
        keys.insert(current.clone(), SecretVec::new(key));
        Ok(Self { current, keys, pepper: None })
    }

    /// Parses a hex-encoded master key.
    ///
    /// # Errors
    ///
    /// Returns `KeyProviderError::InvalidKey` on malformed hex or a wrong length.
    pub fn from_hex(key_id: impl Into<String>, key_hex: &str) -> Result<Self, KeyProviderError> {
        let key = hex::decode(key_hex.trim())
            .map_err(|e| KeyProviderError::InvalidKey(format!("master key is not hex: {e}")))?;
        Self::new(key_id, key)
    }

    /// Builds a provider from handler options.
    ///
    /// Reads `masterKey` and `pepper` (hex, required) and `keyId`
    /// (defaults to `"k1"`).
    ///
    /// # Errors
    ///
    /// Returns `HandlerError::InvalidOption` naming the first bad option.
    pub fn from_options(options: &HandlerOptions) -> Result<Self, HandlerError> {
        let required = |name: &str| {
            options.get(name).ok_or_else(|| HandlerError::InvalidOption {
                option: name.to_string(),
                reason: "missing".to_string(),
            })
        };
        let invalid = |name: &str, err: KeyProviderError| HandlerError::InvalidOption {
            option: name.to_string(),
            reason: err.to_string(),
        };

        let key_id = options.get("keyId").map_or("k1", String::as_str);
        let provider =
            Self::from_hex(key_id, required("masterKey")?).map_err(|e| invalid("masterKey", e))?;
        let pepper = hex::decode(required("pepper")?.trim()).map_err(|e| {
            invalid("pepper", KeyProviderError::InvalidKey(format!("pepper is not hex: {e}")))
        })?;
        provider.with_pepper(pepper).map_err(|e| invalid("pepper", e))
    }

    /// Sets the pepper used for blind indexes.
    ///
    /// # Errors
    ///
    /// Returns `KeyProviderError::InvalidKey` if the pepper is not [`KEY_SIZE`] bytes.
    pub fn with_pepper(mut self, pepper: Vec<u8>) -> Result<Self, KeyProviderError> {
        check_length("pepper", &pepper)?;
        self.pepper = Some(SecretVec::new(pepper));
        Ok(self)
    }

    /// Adds a retired key that can still decrypt older ciphertexts.
    ///
    /// # Errors
    ///
    /// Returns `KeyProviderError::InvalidKey` if the key is not [`KEY_SIZE`] bytes.
    pub fn with_retired_key(
        mut self,
        key_id: impl Into<String>,
        key: Vec<u8>,
    ) -> Result<Self, KeyProviderError> {
        check_length("retired key", &key)?;
        self.keys.insert(key_id.into(), SecretVec::new(key));
        Ok(self)
    }
}

impl KeyProvider for StaticKeyProvider {
    fn current_key_id(&self) -> Result<String, KeyProviderError> {
        Ok(self.current.clone())
    }

    fn key(&self, key_id: &str) -> Result<SecretVec<u8>, KeyProviderError> {
        self.keys
            .get(key_id)
            .map(|key| SecretVec::new(key.expose_secret().clone()))
            .ok_or_else(|| KeyProviderError::KeyNotFound(key_id.to_string()))
    }

    fn pepper(&self) -> Result<Option<SecretVec<u8>>, KeyProviderError> {
        Ok(self.pepper.as_ref().map(|p| SecretVec::new(p.expose_secret().clone())))
    }
}

fn check_length(what: &str, key: &[u8]) -> Result<(), KeyProviderError> {
    if key.len() == KEY_SIZE {
        Ok(())
    } else {
        Err(KeyProviderError::InvalidKey(format!(
            "{what} must be {KEY_SIZE} bytes, got {}",
            key.len()
        )))
    }
}
