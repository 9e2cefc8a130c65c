//! SQL parsing seam.

use sqlparser::ast::Statement;
use sqlparser::dialect::dialect_from_str;
use sqlparser::parser::Parser;

use crate::config::DEFAULT_DIALECT;
use crate::error::Error;

/// Turns SQL text into a single statement tree.
pub trait StatementParser: Send + Sync {
    /// Parses exactly one statement.
    ///
    /// # Errors
    ///
    /// Returns `Error::Parse` for malformed SQL or when the text holds zero
    /// or several statements.
    fn parse(&self, sql: &str) -> Result<Statement, Error>;
}

/// [`StatementParser`] backed by a named `sqlparser` dialect.
#[derive(Debug, Clone)]
pub struct DialectParser {
    dialect: String,
}

impl DialectParser {
    /// # Errors
    ///
    /// Returns `Error::Configuration` if the dialect name is unknown.
    pub fn new(dialect: impl Into<String>) -> Result<Self, Error> {
        let dialect = dialect.into();
        if dialect_from_str(&dialect).is_none() {
            return Err(Error::configuration(format!("unknown dialect `{dialect}`")));
        }
        Ok(Self { dialect })
    }
}

impl Default for DialectParser {
    fn default() -> Self {
        Self { dialect: DEFAULT_DIALECT.to_string() }
    }
}

impl StatementParser for DialectParser {
    fn parse(&self, sql: &str) -> Result<Statement, Error> {
        let dialect = dialect_from_str(&self.dialect)
            .ok_or_else(|| Error::configuration(format!("unknown dialect `{}`", self.dialect)))?;
        let mut statements =
            Parser::parse_sql(dialect.as_ref(), sql).map_err(|e| Error::Parse(e.to_string()))?;
        match statements.len() {
            1 => Ok(statements.remove(0)),
            n => Err(Error::Parse(format!("expected one statement, found {n}"))),
        }
    }
}
