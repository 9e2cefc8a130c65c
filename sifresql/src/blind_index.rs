//! Blind index generation for searchable encryption.
//!
//! Blind indexes allow equality and membership queries on encrypted columns
//! without revealing the plaintext value. They are keyed HMACs, so the same
//! plaintext always produces the same index while the index alone reveals
//! nothing without the pepper.

use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretVec};
use sha2::Sha256;

use crate::error::HandlerError;
use crate::kdf::{derive_key, KeyPurpose};
use crate::key_provider::KeyProvider;

type HmacSha256 = Hmac<Sha256>;

/// Standard blind index output size (16 bytes).
pub const BLIND_INDEX_SIZE: usize = 16;

/// Key id the index key is derived under. Fixed so indexes survive key rotation.
const INDEX_KEY_ID: &str = "pepper";

/// Computes `HMAC-SHA256(index_key, value)[..16]`.
///
/// # Errors
///
/// Returns `HandlerError::IndexGenerationFailed` if the key is rejected by HMAC.
pub fn generate_blind_index(
    index_key: &SecretVec<u8>,
    value: &[u8],
) -> Result<Vec<u8>, HandlerError> {
    let mut mac = HmacSha256::new_from_slice(index_key.expose_secret())
        .map_err(|e| HandlerError::IndexGenerationFailed(format!("Invalid index key: {e}")))?;

    mac.update(value);

    let bytes = mac.finalize().into_bytes();
    Ok(bytes[..BLIND_INDEX_SIZE].to_vec())
}

/// Derives the index key from the provider's pepper.
///
/// # Errors
///
/// Returns error if:
/// - Pepper is not available from the provider
/// - Key derivation fails
pub fn index_key<P: KeyProvider + ?Sized>(provider: &P) -> Result<SecretVec<u8>, HandlerError> {
    let pepper = provider
        .pepper()?
        .ok_or_else(|| HandlerError::IndexGenerationFailed("Pepper not available".to_string()))?;
    derive_key(&pepper, INDEX_KEY_ID, KeyPurpose::Index)
}

/// Generates the text form stored in index columns: lowercase hex of the blind index.
///
/// # Errors
///
/// Returns error if index generation fails.
///
/// # Example
///
/// ```
/// use sifresql::blind_index::{blind_index_hex, index_key};
/// use sifresql::key_provider::StaticKeyProvider;
///
/// let provider = StaticKeyProvider::new("k1", vec![1u8; 32])?.with_pepper(vec![2u8; 32])?;
/// let key = index_key(&provider)?;
///
/// let index1 = blind_index_hex(&key, "alice@example.com")?;
/// let index2 = blind_index_hex(&key, "alice@example.com")?;
/// assert_eq!(index1, index2);
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub fn blind_index_hex(index_key: &SecretVec<u8>, value: &str) -> Result<String, HandlerError> {
    generate_blind_index(index_key, value.as_bytes()).map(hex::encode)
}
