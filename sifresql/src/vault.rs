//! Built-in capability handler: authenticated encryption plus blind indexes.
//!
//! The [`VaultHandler`] encrypts with ChaCha20-Poly1305 under a data key
//! derived from the provider's current master key. Ciphertext columns hold
//! text of the form `<key-id>:<base64(nonce || ciphertext)>`, so values written
//! before a key rotation keep decrypting as long as the provider still knows
//! the old key. Index columns hold the hex blind index of the plaintext.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chacha20poly1305::{
    aead::{rand_core::RngCore, Aead, KeyInit, OsRng, Payload},
    ChaCha20Poly1305, Nonce,
};
use secrecy::{ExposeSecret, SecretVec};
use std::sync::Arc;
use zeroize::Zeroizing;

use crate::blind_index::{blind_index_hex, index_key};
use crate::error::HandlerError;
use crate::handler::SecurityHandler;
use crate::kdf::{derive_key, KeyPurpose};
use crate::key_provider::KeyProvider;

/// Nonce size for ChaCha20-Poly1305 (96 bits).
const NONCE_SIZE: usize = 12;

/// Separates the key id from the encoded payload. Not part of the base64 alphabet.
const KEY_ID_SEPARATOR: char = ':';

/// Vault-backed [`SecurityHandler`].
///
/// # Example
///
/// ```
/// use sifresql::handler::SecurityHandler;
/// use sifresql::key_provider::StaticKeyProvider;
/// use sifresql::vault::VaultHandler;
///
/// let provider = StaticKeyProvider::new("k1", vec![1u8; 32])?.with_pepper(vec![2u8; 32])?;
/// let vault = VaultHandler::new(provider)?;
///
/// let ciphertext = vault.encrypt("123-45-6789")?;
/// assert_eq!(vault.decrypt(&ciphertext)?, "123-45-6789");
/// assert_eq!(vault.index("123-45-6789")?, vault.index("123-45-6789")?);
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub struct VaultHandler<P: KeyProvider> {
    provider: Arc<P>,
    index_key: Arc<SecretVec<u8>>,
}

impl<P: KeyProvider> VaultHandler<P> {
    /// Creates a vault over the given key provider.
    ///
    /// # Errors
    ///
    /// Returns error if the provider has no pepper, since every configured
    /// column needs an index.
    pub fn new(provider: P) -> Result<Self, HandlerError> {
        let index_key = index_key(&provider)?;
        Ok(Self { provider: Arc::new(provider), index_key: Arc::new(index_key) })
    }

    fn cipher_for(&self, key_id: &str) -> Result<ChaCha20Poly1305, HandlerError> {
        let master = self.provider.key(key_id)?;
        let data_key = derive_key(&master, key_id, KeyPurpose::Data)?;
        ChaCha20Poly1305::new_from_slice(data_key.expose_secret())
            .map_err(|e| HandlerError::EncryptionFailed(format!("Invalid data key: {e}")))
    }
}

impl<P: KeyProvider> SecurityHandler for VaultHandler<P> {
    fn encrypt(&self, plain: &str) -> Result<String, HandlerError> {
        let key_id = self.provider.current_key_id()?;
        if key_id.contains(KEY_ID_SEPARATOR) {
            return Err(HandlerError::EncryptionFailed(format!(
                "key id `{key_id}` must not contain `{KEY_ID_SEPARATOR}`"
            )));
        }
        let cipher = self.cipher_for(&key_id)?;

        let mut nonce_bytes = [0u8; NONCE_SIZE];
        OsRng.fill_bytes(&mut nonce_bytes);

        // Key id is authenticated so a payload cannot be replayed under another key.
        let ciphertext = cipher
            .encrypt(
                Nonce::from_slice(&nonce_bytes),
                Payload { msg: plain.as_bytes(), aad: key_id.as_bytes() },
            )
            .map_err(|e| {
                HandlerError::EncryptionFailed(format!("ChaCha20-Poly1305 encryption failed: {e}"))
            })?;

        let mut payload = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        payload.extend_from_slice(&nonce_bytes);
        payload.extend_from_slice(&ciphertext);

        Ok(format!("{key_id}{KEY_ID_SEPARATOR}{}", STANDARD.encode(payload)))
    }

    fn decrypt(&self, cipher: &str) -> Result<String, HandlerError> {
        let (key_id, encoded) = cipher
            .rsplit_once(KEY_ID_SEPARATOR)
            .ok_or_else(|| HandlerError::DecryptionFailed("missing key id".to_string()))?;
        let payload = STANDARD
            .decode(encoded)
            .map_err(|e| HandlerError::DecryptionFailed(format!("invalid base64: {e}")))?;
        if payload.len() < NONCE_SIZE {
            return Err(HandlerError::DecryptionFailed("ciphertext too short".to_string()));
        }
        let (nonce_bytes, ciphertext) = payload.split_at(NONCE_SIZE);

        let plaintext = Zeroizing::new(
            self.cipher_for(key_id)?
                .decrypt(
                    Nonce::from_slice(nonce_bytes),
                    Payload { msg: ciphertext, aad: key_id.as_bytes() },
                )
                .map_err(|_| HandlerError::AuthenticationFailed)?,
        );

        std::str::from_utf8(&plaintext)
            .map(str::to_string)
            .map_err(|e| HandlerError::DecryptionFailed(format!("plaintext is not UTF-8: {e}")))
    }

    fn index(&self, plain: &str) -> Result<String, HandlerError> {
        blind_index_hex(&self.index_key, plain)
    }
}

impl<P: KeyProvider> Clone for VaultHandler<P> {
    fn clone(&self) -> Self {
        Self { provider: Arc::clone(&self.provider), index_key: Arc::clone(&self.index_key) }
    }
}
