//! Error types for `SifreSQL` operations.

use std::fmt;

/// Main error type for `SifreSQL` operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The statement could not be parsed (malformed or unsupported SQL).
    #[error("parse failed: {0}")]
    Parse(String),

    /// Startup configuration is missing or invalid.
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// A rewrite could not be completed; the original statement is used instead.
    #[error("transform failed: {0}")]
    Transform(String),

    /// The capability handler failed
    #[error("security handler error: {0}")]
    Handler(#[from] HandlerError),

    /// Key provider operation failed
    #[error("key provider error: {0}")]
    KeyProvider(#[from] KeyProviderError),

    /// Reading a configuration file failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML configuration could not be read
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl Error {
    pub(crate) fn transform(message: impl Into<String>) -> Self {
        Self::Transform(message.into())
    }

    pub(crate) fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }
}

/// Failures raised by a [`SecurityHandler`](crate::handler::SecurityHandler).
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    /// A value could not be turned into ciphertext
    #[error("encryption failed: {0}")]
    EncryptionFailed(String),

    /// A stored ciphertext could not be read back
    #[error("decryption failed: {0}")]
    DecryptionFailed(String),

    /// The AEAD tag did not verify
    #[error("authentication failed: ciphertext was modified or belongs to another key")]
    AuthenticationFailed,

    /// No search surrogate could be computed
    #[error("index generation failed: {0}")]
    IndexGenerationFailed(String),

    /// Handler options are invalid
    #[error("invalid handler option `{option}`: {reason}")]
    InvalidOption {
        /// The offending option key
        option: String,
        /// Why it was rejected
        reason: String,
    },

    /// HKDF rejected the requested output length
    #[error("key derivation failed")]
    KeyDerivation,

    /// Key material was unavailable
    #[error("key provider error: {0}")]
    KeyProvider(#[from] KeyProviderError),
}

/// Errors specific to key provider operations.
#[derive(Debug)]
pub enum KeyProviderError {
    /// Key not found
    KeyNotFound(String),

    /// Key creation failed
    CreationFailed(String),

    /// No active key configured
    NoActiveKey,

    /// Key material is malformed
    InvalidKey(String),

    /// Pepper not available
    PepperUnavailable(String),

    /// I/O operation failed
    Io(std::io::Error),
}

impl fmt::Display for KeyProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::KeyNotFound(id) => write!(f, "key not found: {id}"),
            Self::CreationFailed(msg) => write!(f, "key creation failed: {msg}"),
            Self::NoActiveKey => write!(f, "no active key configured"),
            Self::InvalidKey(msg) => write!(f, "invalid key material: {msg}"),
            Self::PepperUnavailable(msg) => write!(f, "pepper not available: {msg}"),
            Self::Io(err) => write!(f, "I/O error: {err}"),
        }
    }
}

impl std::error::Error for KeyProviderError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for KeyProviderError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}
