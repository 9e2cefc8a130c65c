//! Key derivation using HKDF (HMAC-based Key Derivation Function).
//!
//! Master keys handed out by a [`KeyProvider`](crate::key_provider::KeyProvider)
//! are never used directly: every cipher key is expanded from the master key
//! with HKDF-SHA256, bound to the key id and the purpose of the derived key.

use hkdf::Hkdf;
use secrecy::{ExposeSecret, SecretVec};
use sha2::Sha256;

use crate::error::HandlerError;

/// Derived data key size in bytes (256 bits).
pub const DATA_KEY_SIZE: usize = 32;

/// What a derived key is used for. Part of the HKDF `info` input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyPurpose {
    /// AEAD key for ciphertext columns.
    Data,
    /// HMAC key for blind index columns.
    Index,
}

impl KeyPurpose {
    const fn label(self) -> &'static str {
        match self {
            Self::Data => "data",
            Self::Index => "index",
        }
    }
}

/// Derives a purpose-bound key from a master key using HKDF.
///
/// The `info` parameter is `sifresql|<purpose>|<key_id>`, so two key ids
/// sharing the same master material still yield unrelated keys.
///
/// # Errors
///
/// Returns `HandlerError::KeyDerivation` if the derivation fails.
///
/// # Example
///
/// ```
/// use sifresql::kdf::{derive_key, KeyPurpose};
/// use secrecy::SecretVec;
///
/// let master = SecretVec::new(vec![0u8; 32]);
/// let key = derive_key(&master, "k1", KeyPurpose::Data).expect("derivation failed");
/// ```
pub fn derive_key(
    master: &SecretVec<u8>,
    key_id: &str,
    purpose: KeyPurpose,
) -> Result<SecretVec<u8>, HandlerError> {
    let hkdf = Hkdf::<Sha256>::new(None, master.expose_secret());

    let info = format!("sifresql|{}|{key_id}", purpose.label());

    let mut key = vec![0u8; DATA_KEY_SIZE];
    hkdf.expand(info.as_bytes(), &mut key).map_err(|_| HandlerError::KeyDerivation)?;

    Ok(SecretVec::new(key))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_key_deterministic() {
        let master = SecretVec::new(vec![1u8; 32]);

        let key1 = derive_key(&master, "k1", KeyPurpose::Data).unwrap();
        let key2 = derive_key(&master, "k1", KeyPurpose::Data).unwrap();

        assert_eq!(key1.expose_secret(), key2.expose_secret());
        assert_eq!(key1.expose_secret().len(), DATA_KEY_SIZE);
    }

    #[test]
    fn test_derive_key_separates_ids_and_purposes() {
        let master = SecretVec::new(vec![1u8; 32]);

        let data_k1 = derive_key(&master, "k1", KeyPurpose::Data).unwrap();
        let data_k2 = derive_key(&master, "k2", KeyPurpose::Data).unwrap();
        let index_k1 = derive_key(&master, "k1", KeyPurpose::Index).unwrap();

        assert_ne!(data_k1.expose_secret(), data_k2.expose_secret());
        assert_ne!(data_k1.expose_secret(), index_k1.expose_secret());
    }

    #[test]
    fn test_derive_key_with_different_masters() {
        let master1 = SecretVec::new(vec![1u8; 32]);
        let master2 = SecretVec::new(vec![2u8; 32]);

        let key1 = derive_key(&master1, "k1", KeyPurpose::Data).unwrap();
        let key2 = derive_key(&master2, "k1", KeyPurpose::Data).unwrap();

        assert_ne!(key1.expose_secret(), key2.expose_secret());
    }

    // RFC 5869 Appendix A.1, HKDF-SHA256 test case 1.
    #[test]
    fn test_hkdf_rfc5869_test_case_1() {
        const IKM_HEX: &str = "0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b";
        const SALT_HEX: &str = "000102030405060708090a0b0c";
        const INFO_HEX: &str = "f0f1f2f3f4f5f6f7f8f9";
        const EXPECTED_OKM_HEX: &str =
            "3cb25f25faacd57a90434f64d0362f2a2d2d0a90cf1a5a4c5db02d56ecc4c5bf34007208d5b887185865";

        let ikm = hex::decode(IKM_HEX).unwrap();
        let salt = hex::decode(SALT_HEX).unwrap();
        let info = hex::decode(INFO_HEX).unwrap();
        let expected_okm = hex::decode(EXPECTED_OKM_HEX).unwrap();

        let hkdf = Hkdf::<Sha256>::new(Some(&salt), &ikm);
        let mut okm = vec![0u8; 42];
        hkdf.expand(&info, &mut okm).expect("HKDF expand failed");

        assert_eq!(okm, expected_okm);
    }
}
