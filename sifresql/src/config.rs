//! Startup configuration of the interceptor.
//!
//! Keys are camelCase in both TOML and JSON:
//!
//! ```toml
//! enabled = true
//! overwriteSourceByTarget = true
//! writeSource = false
//! handlerClass = "vault"
//! statementIdPrefixes = ["app.user."]
//!
//! [handlerOptions]
//! masterKey = "…64 hex chars…"
//! pepper = "…64 hex chars…"
//!
//! [[columnSecurityConfig]]
//! table = "users"
//! sourceColumn = "ssn"
//! targetColumn = "ssn_enc"
//! indexColumn = "ssn_idx"
//! ```

use std::collections::{HashMap, HashSet};
use std::path::Path;

use serde::{Deserialize, Serialize};
use sqlparser::dialect::dialect_from_str;

use crate::error::Error;
use crate::handler::HandlerOptions;
use crate::resolver::normalize_identifier;

/// Dialect used when none is configured.
pub const DEFAULT_DIALECT: &str = "generic";

/// Sensitive columns of a table, keyed by normalized source column name.
pub type TableColumns = HashMap<String, ColumnSecurityConfig>;

/// Configured tables, keyed by normalized table name.
pub type ColumnsByTable = HashMap<String, TableColumns>;

/// Declares one sensitive column and the two columns that replace it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnSecurityConfig {
    pub table: String,
    pub source_column: String,
    /// Holds `encrypt(source)`.
    pub target_column: String,
    /// Holds `index(source)`.
    pub index_column: String,
}

impl ColumnSecurityConfig {
    #[must_use]
    pub fn new(
        table: impl Into<String>,
        source_column: impl Into<String>,
        target_column: impl Into<String>,
        index_column: impl Into<String>,
    ) -> Self {
        Self {
            table: table.into(),
            source_column: source_column.into(),
            target_column: target_column.into(),
            index_column: index_column.into(),
        }
    }
}

/// Interceptor configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SecurityConfig {
    /// Master switch. When `false` every statement passes through.
    pub enabled: bool,
    /// Redirect reads and filters from source columns to target/index columns.
    pub overwrite_source_by_target: bool,
    /// Keep writing the plaintext source column next to the derived ones.
    pub write_source: bool,
    /// Registered name of the capability handler.
    pub handler_class: Option<String>,
    pub handler_options: HandlerOptions,
    /// Only statements whose id starts with one of these are processed.
    pub statement_id_prefixes: Vec<String>,
    pub column_security_config: Vec<ColumnSecurityConfig>,
    /// SQL dialect name understood by `sqlparser` (`generic`, `mysql`, `postgresql`, ...).
    pub dialect: String,
    /// Match `snake_case` result properties against `camelCase` row keys.
    pub map_underscore_to_camel_case: bool,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            overwrite_source_by_target: false,
            write_source: false,
            handler_class: None,
            handler_options: HandlerOptions::new(),
            statement_id_prefixes: Vec::new(),
            column_security_config: Vec::new(),
            dialect: DEFAULT_DIALECT.to_string(),
            map_underscore_to_camel_case: false,
        }
    }
}

impl SecurityConfig {
    /// Enabled configuration using the named handler and nothing else.
    #[must_use]
    pub fn new(handler_class: impl Into<String>) -> Self {
        Self { enabled: true, handler_class: Some(handler_class.into()), ..Self::default() }
    }

    #[must_use]
    pub fn with_column(mut self, column: ColumnSecurityConfig) -> Self {
        self.column_security_config.push(column);
        self
    }

    #[must_use]
    pub fn with_statement_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.statement_id_prefixes.push(prefix.into());
        self
    }

    #[must_use]
    pub fn with_handler_option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.handler_options.insert(key.into(), value.into());
        self
    }

    /// Parses a TOML document.
    ///
    /// # Errors
    ///
    /// Returns `Error::Toml` on malformed input.
    pub fn from_toml_str(s: &str) -> Result<Self, Error> {
        Ok(toml::from_str(s)?)
    }

    /// Parses a JSON document.
    ///
    /// # Errors
    ///
    /// Returns `Error::Json` on malformed input.
    pub fn from_json_str(s: &str) -> Result<Self, Error> {
        Ok(serde_json::from_str(s)?)
    }

    /// Loads a configuration file, picking the format from its extension
    /// (`.json` is JSON, anything else is TOML).
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or parsed.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;
        let is_json = path.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        if is_json {
            Self::from_json_str(&contents)
        } else {
            Self::from_toml_str(&contents)
        }
    }

    /// Checks the configuration for errors that would break rewriting.
    ///
    /// A disabled configuration is always valid.
    ///
    /// # Errors
    ///
    /// Returns `Error::Configuration` describing the first problem found.
    pub fn validate(&self) -> Result<(), Error> {
        if !self.enabled {
            return Ok(());
        }
        if self.handler_class.as_deref().map_or(true, |name| name.trim().is_empty()) {
            return Err(Error::configuration("handlerClass is required when enabled"));
        }
        self.validate_columns()
    }

    /// Checks everything but the handler: dialect and column entries.
    ///
    /// # Errors
    ///
    /// Returns `Error::Configuration` describing the first problem found.
    pub fn validate_columns(&self) -> Result<(), Error> {
        if dialect_from_str(&self.dialect).is_none() {
            return Err(Error::configuration(format!("unknown dialect `{}`", self.dialect)));
        }

        let mut sources = HashSet::new();
        let mut derived = HashSet::new();
        for column in &self.column_security_config {
            let names = [
                ("table", &column.table),
                ("sourceColumn", &column.source_column),
                ("targetColumn", &column.target_column),
                ("indexColumn", &column.index_column),
            ];
            if let Some((field, _)) = names.iter().find(|(_, value)| value.trim().is_empty()) {
                return Err(Error::configuration(format!(
                    "columnSecurityConfig entry for table `{}` has an empty {field}",
                    column.table
                )));
            }

            let table = normalize_identifier(&column.table);
            let source = normalize_identifier(&column.source_column);
            let target = normalize_identifier(&column.target_column);
            let index = normalize_identifier(&column.index_column);
            if source == target || source == index || target == index {
                return Err(Error::configuration(format!(
                    "`{table}.{source}`: source, target and index columns must differ"
                )));
            }
            if !sources.insert((table.clone(), source.clone())) {
                return Err(Error::configuration(format!("`{table}.{source}` is configured twice")));
            }
            derived.insert((table.clone(), target));
            derived.insert((table, index));
        }
        if let Some((table, column)) = sources.intersection(&derived).next() {
            return Err(Error::configuration(format!(
                "`{table}.{column}` is both a source column and a derived column"
            )));
        }
        Ok(())
    }

    /// Groups the column entries by normalized table and source column names.
    ///
    /// Target and index names are stripped of quotes but keep their case,
    /// since they are emitted into rewritten SQL.
    #[must_use]
    pub fn columns_by_table(&self) -> ColumnsByTable {
        let mut tables = ColumnsByTable::new();
        for column in &self.column_security_config {
            let table = normalize_identifier(&column.table);
            let source = normalize_identifier(&column.source_column);
            let entry = ColumnSecurityConfig {
                table: table.clone(),
                source_column: source.clone(),
                target_column: strip_quotes(&column.target_column).to_string(),
                index_column: strip_quotes(&column.index_column).to_string(),
            };
            tables.entry(table).or_default().insert(source, entry);
        }
        tables
    }
}

fn strip_quotes(name: &str) -> &str {
    let name = name.trim();
    for (open, close) in [('"', '"'), ('`', '`'), ('[', ']')] {
        if let Some(inner) = name.strip_prefix(open).and_then(|n| n.strip_suffix(close)) {
            return inner;
        }
    }
    name
}
