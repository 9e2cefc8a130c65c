//! The statement interceptor: the single entry point a host calls around
//! statement execution.
//!
//! Each call goes through two phases. `prepare` gates, parses, resolves and
//! rewrites the statement, and returns the bound statement to execute plus
//! an [`Invocation`] describing what to decrypt. `fetch` consumes that
//! invocation and decrypts the result rows. Rewriting is all-or-nothing:
//! any failure hands back the original statement untouched.

use tracing::{debug, info, trace, warn};

use crate::config::{ColumnsByTable, SecurityConfig};
use crate::context::Invocation;
use crate::decrypt::{DecryptReport, RowDecryptor};
use crate::error::Error;
use crate::handler::{HandlerRegistry, SecurityHandler};
use crate::parser::{DialectParser, StatementParser};
use crate::resolver::ActiveColumns;
use crate::rewrite::{RewriteOptions, Rewriter, Rewritten};
use crate::statement::{BoundStatement, MappedStatement, QueryResult};

/// Output of the prepare phase.
#[derive(Debug, Clone)]
pub struct Prepared {
    /// Statement to execute: rewritten, or the original on pass-through.
    pub bound: BoundStatement,
    /// Hand this to [`SecurityInterceptor::fetch`] after executing `bound`.
    pub invocation: Invocation,
    /// `false` when the original statement was passed through.
    pub rewritten: bool,
}

/// Searchable-encryption statement interceptor.
///
/// Built once at startup; read-only afterwards and safe to share across
/// threads.
///
/// # Example
///
/// ```
/// use serde_json::json;
/// use sifresql::prelude::*;
///
/// let config = SecurityConfig::new("vault")
///     .with_handler_option("masterKey", "01".repeat(32))
///     .with_handler_option("pepper", "02".repeat(32))
///     .with_statement_prefix("app.user.")
///     .with_column(ColumnSecurityConfig::new("users", "ssn", "ssn_enc", "ssn_idx"));
/// let interceptor = SecurityInterceptor::new(&config, &HandlerRegistry::default())?;
///
/// let statement = MappedStatement::new("app.user.insert", StatementKind::Insert);
/// let bound = BoundStatement::new("INSERT INTO users (id, ssn) VALUES (?, ?)")
///     .with_mapping("id")
///     .with_mapping("ssn")
///     .with_parameter_object(json!({"id": 1, "ssn": "123-45-6789"}));
///
/// let prepared = interceptor.prepare(&statement, &bound);
/// assert_eq!(prepared.bound.sql, "INSERT INTO users (id, ssn_enc, ssn_idx) VALUES (?, ?, ?)");
/// assert_eq!(prepared.bound.parameter_mappings.len(), 3);
/// # Ok::<(), sifresql::error::Error>(())
/// ```
pub struct SecurityInterceptor {
    enabled: bool,
    options: RewriteOptions,
    statement_id_prefixes: Vec<String>,
    columns_by_table: ColumnsByTable,
    map_underscore_to_camel_case: bool,
    handler: Option<Box<dyn SecurityHandler>>,
    parser: Box<dyn StatementParser>,
}

impl SecurityInterceptor {
    /// Validates `config` and instantiates its handler from `registry`.
    ///
    /// A disabled configuration builds an interceptor that passes every
    /// statement through without instantiating a handler.
    ///
    /// # Errors
    ///
    /// Returns `Error::Configuration` for an invalid configuration or a
    /// handler that cannot be built.
    pub fn new(config: &SecurityConfig, registry: &HandlerRegistry) -> Result<Self, Error> {
        config.validate()?;
        let handler = match config.handler_class.as_deref() {
            Some(name) if config.enabled => Some(registry.build(name, &config.handler_options)?),
            _ => None,
        };
        Self::assemble(config, handler)
    }

    /// Builds an interceptor around an already configured handler, ignoring
    /// `handlerClass` and `handlerOptions`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Configuration` for invalid columns or dialect.
    pub fn with_handler(
        config: &SecurityConfig,
        handler: Box<dyn SecurityHandler>,
    ) -> Result<Self, Error> {
        config.validate_columns()?;
        Self::assemble(config, config.enabled.then_some(handler))
    }

    fn assemble(
        config: &SecurityConfig,
        handler: Option<Box<dyn SecurityHandler>>,
    ) -> Result<Self, Error> {
        let parser = DialectParser::new(config.dialect.clone())?;
        if config.enabled && config.statement_id_prefixes.is_empty() {
            warn!("statementIdPrefixes is empty, every statement will pass through unmodified");
        }
        let columns_by_table = config.columns_by_table();
        info!(
            enabled = config.enabled,
            tables = columns_by_table.len(),
            columns = config.column_security_config.len(),
            "security interceptor configured"
        );
        Ok(Self {
            enabled: config.enabled,
            options: RewriteOptions {
                overwrite_source_by_target: config.overwrite_source_by_target,
                write_source: config.write_source,
            },
            statement_id_prefixes: config.statement_id_prefixes.clone(),
            columns_by_table,
            map_underscore_to_camel_case: config.map_underscore_to_camel_case,
            handler,
            parser: Box::new(parser),
        })
    }

    /// Replaces the statement parser.
    #[must_use]
    pub fn with_parser(mut self, parser: impl StatementParser + 'static) -> Self {
        self.parser = Box::new(parser);
        self
    }

    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn matches_prefix(&self, statement_id: &str) -> bool {
        self.statement_id_prefixes.iter().any(|prefix| statement_id.starts_with(prefix.as_str()))
    }

    /// Prepare phase: rewrites `bound` for execution.
    ///
    /// Never fails. Statements that are gated out, unparsable, reference no
    /// configured table, or fail to rewrite come back as an exact copy of
    /// `bound` with an invocation that decrypts nothing.
    #[must_use]
    pub fn prepare(&self, statement: &MappedStatement, bound: &BoundStatement) -> Prepared {
        let passthrough = || Prepared {
            bound: bound.clone(),
            invocation: Invocation::passthrough(&statement.id),
            rewritten: false,
        };

        let Some(handler) = self.handler.as_deref().filter(|_| self.enabled) else {
            return passthrough();
        };
        if !self.matches_prefix(&statement.id) {
            trace!(statement_id = %statement.id, "no statement id prefix matches");
            return passthrough();
        }
        if !statement.kind.is_rewritable() {
            trace!(
                statement_id = %statement.id,
                kind = %statement.kind,
                "statement kind not rewritten"
            );
            return passthrough();
        }

        match self.rewrite(handler, statement, bound) {
            Ok(Some(rewritten)) => {
                debug!(
                    statement_id = %statement.id,
                    original = %bound.sql,
                    rewritten = %rewritten.bound.sql,
                    parameters = rewritten.bound.parameter_mappings.len(),
                    decrypted_columns = rewritten.column_properties.len(),
                    "statement rewritten"
                );
                Prepared {
                    bound: rewritten.bound,
                    invocation: Invocation::new(&statement.id, rewritten.column_properties),
                    rewritten: true,
                }
            }
            Ok(None) => {
                trace!(statement_id = %statement.id, "no configured table referenced");
                passthrough()
            }
            Err(e) => {
                warn!(
                    statement_id = %statement.id,
                    error = %e,
                    "rewrite failed, executing the original statement"
                );
                passthrough()
            }
        }
    }

    fn rewrite(
        &self,
        handler: &dyn SecurityHandler,
        statement: &MappedStatement,
        bound: &BoundStatement,
    ) -> Result<Option<Rewritten>, Error> {
        let parsed = self.parser.parse(&bound.sql)?;
        let active = ActiveColumns::resolve(&parsed, &self.columns_by_table);
        if active.is_empty() {
            return Ok(None);
        }
        Rewriter::new(&active, handler, self.options, &statement.result_maps, bound)
            .rewrite(parsed)
            .map(Some)
    }

    /// Fetch phase: decrypts `result` for the invocation it was produced by.
    pub fn fetch(&self, invocation: Invocation, result: &mut QueryResult) -> DecryptReport {
        let Some(handler) = self.handler.as_deref() else {
            return DecryptReport::default();
        };
        if !invocation.needs_decryption() {
            return DecryptReport::default();
        }
        let report = RowDecryptor::new(handler)
            .map_underscore_to_camel_case(self.map_underscore_to_camel_case)
            .decrypt(invocation.column_properties(), result);
        if report.failed > 0 {
            warn!(
                statement_id = invocation.statement_id(),
                failed = report.failed,
                "some values could not be decrypted"
            );
        }
        report
    }

    /// Runs both phases around `execute`.
    ///
    /// # Errors
    ///
    /// Only errors returned by `execute` are propagated.
    pub fn intercept<F, E>(
        &self,
        statement: &MappedStatement,
        bound: &BoundStatement,
        execute: F,
    ) -> Result<QueryResult, E>
    where
        F: FnOnce(&BoundStatement) -> Result<QueryResult, E>,
    {
        let Prepared { bound, invocation, .. } = self.prepare(statement, bound);
        let mut result = execute(&bound)?;
        self.fetch(invocation, &mut result);
        Ok(result)
    }
}
