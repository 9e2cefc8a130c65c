//! Capability handler: the pluggable provider of `encrypt`, `decrypt` and `index`.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use crate::error::{Error, HandlerError};
use crate::key_provider::StaticKeyProvider;
use crate::vault::VaultHandler;

/// Options forwarded to [`SecurityHandler::configure`] at startup.
pub type HandlerOptions = BTreeMap<String, String>;

/// Identifier of the built-in [`VaultHandler`] backed by a [`StaticKeyProvider`].
pub const VAULT_HANDLER: &str = "vault";

/// Provides the cryptographic primitive used by the rewrite engine.
///
/// The engine treats all three operations as opaque text-to-text calls.
/// `index` MUST be deterministic: identical input always yields identical
/// output, otherwise equality and membership predicates stop matching.
///
/// Implementations must be thread-safe (`Send + Sync`): one handler serves
/// every statement the interceptor processes.
pub trait SecurityHandler: Send + Sync {
    /// Encrypts a plaintext value into the text stored in the ciphertext column.
    ///
    /// # Errors
    ///
    /// Any error aborts the rewrite of the current statement.
    fn encrypt(&self, plain: &str) -> Result<String, HandlerError>;

    /// Decrypts the text read back from a ciphertext column.
    ///
    /// # Errors
    ///
    /// Errors are scoped to the property being decrypted.
    fn decrypt(&self, cipher: &str) -> Result<String, HandlerError>;

    /// Computes the deterministic search surrogate for a plaintext value.
    ///
    /// # Errors
    ///
    /// Any error aborts the rewrite of the current statement.
    fn index(&self, plain: &str) -> Result<String, HandlerError>;

    /// Optional startup hook receiving the configured handler options.
    ///
    /// # Errors
    ///
    /// An error here aborts interceptor initialization.
    fn configure(&mut self, _options: &HandlerOptions) -> Result<(), HandlerError> {
        Ok(())
    }
}

type HandlerFactory =
    Box<dyn Fn(&HandlerOptions) -> Result<Box<dyn SecurityHandler>, HandlerError> + Send + Sync>;

/// Maps `handlerClass` identifiers to handler constructors.
///
/// The default registry knows the [`VAULT_HANDLER`]; hosts register their
/// own handlers before building the interceptor.
pub struct HandlerRegistry {
    factories: HashMap<String, HandlerFactory>,
}

impl HandlerRegistry {
    /// Creates a registry without any handler.
    #[must_use]
    pub fn empty() -> Self {
        Self { factories: HashMap::new() }
    }

    /// Registers a handler constructor under `name`, replacing any previous one.
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn(&HandlerOptions) -> Result<Box<dyn SecurityHandler>, HandlerError>
            + Send
            + Sync
            + 'static,
    {
        self.factories.insert(name.into(), Box::new(factory));
    }

    /// Registers a handler type built with `Default` and then configured.
    pub fn register_default<H>(&mut self, name: impl Into<String>)
    where
        H: SecurityHandler + Default + 'static,
    {
        self.register(name, |options| {
            let mut handler = H::default();
            handler.configure(options)?;
            Ok(Box::new(handler) as Box<dyn SecurityHandler>)
        });
    }

    /// Returns `true` if a handler is registered under `name`.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Instantiates and configures the handler registered under `name`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Configuration` if the name is unknown or the handler
    /// rejects its options.
    pub fn build(
        &self,
        name: &str,
        options: &HandlerOptions,
    ) -> Result<Box<dyn SecurityHandler>, Error> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| Error::configuration(format!("unknown handlerClass `{name}`")))?;
        factory(options)
            .map_err(|e| Error::configuration(format!("handler `{name}` failed to start: {e}")))
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(VAULT_HANDLER, |options| {
            let provider = StaticKeyProvider::from_options(options)?;
            Ok(Box::new(VaultHandler::new(provider)?) as Box<dyn SecurityHandler>)
        });
        registry
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.factories.keys().collect();
        names.sort();
        f.debug_struct("HandlerRegistry").field("handlers", &names).finish()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Reversible, recognisable handler used across the crate's unit tests.

    use super::*;

    /// `encrypt(x) = "enc(x)"`, `index(x) = "idx(x)"`, `decrypt` strips `enc(...)`.
    #[derive(Debug, Default)]
    pub struct MarkerHandler {
        pub fail_on: Option<String>,
    }

    impl MarkerHandler {
        pub fn failing_on(value: &str) -> Self {
            Self { fail_on: Some(value.to_string()) }
        }

        fn check(&self, value: &str) -> Result<(), HandlerError> {
            if self.fail_on.as_deref() == Some(value) {
                return Err(HandlerError::EncryptionFailed(format!("refusing {value}")));
            }
            Ok(())
        }
    }

    impl SecurityHandler for MarkerHandler {
        fn encrypt(&self, plain: &str) -> Result<String, HandlerError> {
            self.check(plain)?;
            Ok(format!("enc({plain})"))
        }

        fn decrypt(&self, cipher: &str) -> Result<String, HandlerError> {
            self.check(cipher)?;
            cipher
                .strip_prefix("enc(")
                .and_then(|rest| rest.strip_suffix(')'))
                .map(str::to_string)
                .ok_or_else(|| {
                    HandlerError::DecryptionFailed(format!("not a ciphertext: {cipher}"))
                })
        }

        fn index(&self, plain: &str) -> Result<String, HandlerError> {
            self.check(plain)?;
            Ok(format!("idx({plain})"))
        }

        fn configure(&mut self, options: &HandlerOptions) -> Result<(), HandlerError> {
            self.fail_on = options.get("failOn").cloned();
            Ok(())
        }
    }
}
