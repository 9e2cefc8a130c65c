//! # `SifreSQL`
//!
//! Transparent searchable field-level encryption by rewriting SQL statements
//! on their way to the database.
//!
//! Sensitive columns are stored twice: as ciphertext and as a deterministic
//! blind index. The [`SecurityInterceptor`](interceptor::SecurityInterceptor)
//! rewrites each statement so that the application keeps talking about the
//! plaintext column:
//!
//! - INSERT and UPDATE write the ciphertext and index columns instead of the
//!   source column, and the bound parameters follow the placeholders
//! - WHERE predicates compare the index column against the index of the
//!   searched value
//! - SELECT projections read the ciphertext column back under the source
//!   name, and result rows are decrypted after execution
//!
//! ## Example
//!
//! ```
//! use serde_json::json;
//! use sifresql::prelude::*;
//!
//! let config = SecurityConfig::new("vault")
//!     .with_handler_option("masterKey", "01".repeat(32))
//!     .with_handler_option("pepper", "02".repeat(32))
//!     .with_statement_prefix("app.")
//!     .with_column(ColumnSecurityConfig::new("users", "ssn", "ssn_enc", "ssn_idx"));
//! let interceptor = SecurityInterceptor::new(&config, &HandlerRegistry::default())?;
//!
//! let statement = MappedStatement::new("app.findBySsn", StatementKind::Select);
//! let bound = BoundStatement::new("SELECT id FROM users WHERE ssn = ?")
//!     .with_mapping("ssn")
//!     .with_parameter_object(json!({"ssn": "123-45-6789"}));
//!
//! let prepared = interceptor.prepare(&statement, &bound);
//! assert_eq!(prepared.bound.sql, "SELECT id FROM users WHERE ssn = ?");
//! # Ok::<(), sifresql::error::Error>(())
//! ```
//!
//! Predicates and projections are only rewritten with
//! `overwriteSourceByTarget` enabled, as in the example above they are not.

#![warn(clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod blind_index;
pub mod config;
pub mod context;
pub mod decrypt;
pub mod error;
pub mod handler;
pub mod interceptor;
pub mod kdf;
pub mod key_provider;
pub mod params;
pub mod parser;
pub mod property;
pub mod resolver;
pub mod rewrite;
pub mod statement;
pub mod vault;

pub mod prelude {
    //! Convenience re-exports for common use.
    pub use crate::config::{ColumnSecurityConfig, SecurityConfig};
    pub use crate::context::{ColumnPropertyMap, Invocation};
    pub use crate::decrypt::DecryptReport;
    pub use crate::error::{Error, HandlerError, KeyProviderError};
    pub use crate::handler::{HandlerOptions, HandlerRegistry, SecurityHandler};
    pub use crate::interceptor::{Prepared, SecurityInterceptor};
    pub use crate::key_provider::{KeyProvider, StaticKeyProvider};
    pub use crate::statement::{
        BoundStatement, MappedStatement, ParameterMapping, QueryResult, ResultMap, StatementKind,
    };
    pub use crate::vault::VaultHandler;
}
