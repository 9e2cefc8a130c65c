//! Rewrite engine.
//!
//! Turns a statement over plaintext source columns into one over ciphertext
//! and index columns, and keeps the parameter mappings aligned with the
//! placeholders of the emitted SQL.
//!
//! Placeholders are correlated with mappings by ordinal: before rewriting,
//! every `?` is renamed to `?#<n>` in source order, so `n` designates the
//! original mapping even after others were inserted or removed. Placeholders
//! introduced by the rewrite are plain `?`. All of them are restored to `?`
//! before the statement is printed.

mod columns;
mod predicate;
mod projection;

use std::collections::HashSet;
use std::ops::ControlFlow;

use serde_json::Value;
use sqlparser::ast::{
    visit_expressions, visit_expressions_mut, Expr, Ident, Statement, Value as AstValue,
    ValueWithSpan,
};
use tracing::trace;

use crate::config::ColumnSecurityConfig;
use crate::context::ColumnPropertyMap;
use crate::error::Error;
use crate::handler::SecurityHandler;
use crate::params::ParameterSync;
use crate::resolver::ActiveColumns;
use crate::statement::{BoundStatement, ParameterMapping, ResultMap};

const PLACEHOLDER: &str = "?";
const ORDINAL_TAG: &str = "?#";

/// Switches taken from the interceptor configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RewriteOptions {
    /// Redirect projections and predicates to ciphertext and index columns.
    pub overwrite_source_by_target: bool,
    /// Keep writing the plaintext source column.
    pub write_source: bool,
}

/// Result of a successful rewrite.
#[derive(Debug, Clone)]
pub struct Rewritten {
    pub bound: BoundStatement,
    /// Aliases of projected ciphertext columns, empty for non-selects.
    pub column_properties: ColumnPropertyMap,
}

/// One rewrite pass over one statement. Consumed by [`Rewriter::rewrite`].
pub struct Rewriter<'a> {
    active: &'a ActiveColumns,
    handler: &'a dyn SecurityHandler,
    options: RewriteOptions,
    result_maps: &'a [ResultMap],
    originals: Vec<ParameterMapping>,
    params: ParameterSync,
    column_properties: ColumnPropertyMap,
    /// Table keys of the select being rewritten, empty outside selects.
    scope: HashSet<String>,
}

impl<'a> Rewriter<'a> {
    #[must_use]
    pub fn new(
        active: &'a ActiveColumns,
        handler: &'a dyn SecurityHandler,
        options: RewriteOptions,
        result_maps: &'a [ResultMap],
        bound: &BoundStatement,
    ) -> Self {
        Self {
            active,
            handler,
            options,
            result_maps,
            originals: bound.parameter_mappings.clone(),
            params: ParameterSync::new(bound),
            column_properties: ColumnPropertyMap::new(),
            scope: HashSet::new(),
        }
    }

    /// Rewrites `statement` and returns the new SQL with its parameters.
    ///
    /// # Errors
    ///
    /// Returns `Error::Transform` if placeholders and mappings cannot be
    /// correlated, and propagates handler failures. The caller discards
    /// everything on error.
    pub fn rewrite(mut self, mut statement: Statement) -> Result<Rewritten, Error> {
        let placeholders = number_placeholders(&mut statement);
        if placeholders != self.originals.len() {
            return Err(Error::transform(format!(
                "statement has {placeholders} placeholders but {} parameter mappings",
                self.originals.len()
            )));
        }

        match &mut statement {
            Statement::Insert(insert) => self.rewrite_insert(insert)?,
            Statement::Update(update) => {
                self.rewrite_assignments(&mut update.assignments)?;
                if let Some(selection) = &mut update.selection {
                    self.rewrite_filter(selection)?;
                }
            }
            Statement::Delete(delete) => {
                if let Some(selection) = &mut delete.selection {
                    self.rewrite_filter(selection)?;
                }
            }
            Statement::Query(query) => self.rewrite_query(query)?,
            _ => trace!("statement kind is not rewritten"),
        }

        restore_placeholders(&mut statement);
        let emitted = count_placeholders(&statement);
        if emitted != self.params.len() {
            return Err(Error::transform(format!(
                "rewritten statement has {emitted} placeholders but {} parameter mappings",
                self.params.len()
            )));
        }

        Ok(Rewritten {
            bound: self.params.into_bound(statement.to_string()),
            column_properties: self.column_properties,
        })
    }

    /// WHERE clauses are only redirected to index columns when overwriting.
    fn rewrite_filter(&mut self, selection: &mut Expr) -> Result<(), Error> {
        if self.options.overwrite_source_by_target {
            self.rewrite_predicate(selection)?;
        }
        Ok(())
    }

    /// Sensitive column referenced by `expr`, skipping derived columns.
    fn sensitive_column(&self, expr: &Expr) -> Option<&'a ColumnSecurityConfig> {
        let active = self.active;
        let ident = column_ident(expr)?;
        if active.is_derived(ident) {
            return None;
        }
        active.get_in(ident, &self.scope)
    }

    /// Current runtime value of the `ordinal`-th original placeholder.
    fn original_value(&self, ordinal: usize) -> Result<Value, Error> {
        self.originals
            .get(ordinal)
            .map(|mapping| self.params.value_of(mapping))
            .ok_or_else(|| {
                Error::transform(format!("no parameter mapping for placeholder {ordinal}"))
            })
    }
}

/// Value expression as seen by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Operand {
    /// Original placeholder with its ordinal.
    Placeholder(usize),
    /// String or numeric literal, as text.
    Literal(String),
    Null,
    Unsupported,
}

impl Operand {
    fn of(expr: &Expr) -> Self {
        let Expr::Value(ValueWithSpan { value, .. }) = expr else {
            return Self::Unsupported;
        };
        match value {
            AstValue::Placeholder(p) => p
                .strip_prefix(ORDINAL_TAG)
                .and_then(|n| n.parse().ok())
                .map_or(Self::Unsupported, Self::Placeholder),
            AstValue::SingleQuotedString(s) | AstValue::Number(s, _) => Self::Literal(s.clone()),
            AstValue::Null => Self::Null,
            _ => Self::Unsupported,
        }
    }

    const fn is_supported(&self) -> bool {
        !matches!(self, Self::Unsupported)
    }
}

/// Text handed to the capability handler; `None` for SQL `NULL`.
fn plain_text(value: &Value) -> Result<Option<String>, Error> {
    match value {
        Value::Null => Ok(None),
        Value::String(s) => Ok(Some(s.clone())),
        Value::Number(n) => Ok(Some(n.to_string())),
        Value::Bool(b) => Ok(Some(b.to_string())),
        Value::Array(_) | Value::Object(_) => {
            Err(Error::transform("structured parameter values cannot be encrypted"))
        }
    }
}

fn placeholder() -> Expr {
    Expr::Value(AstValue::Placeholder(PLACEHOLDER.to_string()).into())
}

fn string_literal(text: String) -> Expr {
    Expr::Value(AstValue::SingleQuotedString(text).into())
}

fn null() -> Expr {
    Expr::Value(AstValue::Null.into())
}

/// Column named by a bare or qualified identifier expression.
fn column_ident(expr: &Expr) -> Option<&Ident> {
    match expr {
        Expr::Identifier(ident) => Some(ident),
        Expr::CompoundIdentifier(parts) => parts.last(),
        _ => None,
    }
}

/// Renames the column of an identifier expression, keeping qualifier and quoting.
fn rename_column(expr: &mut Expr, name: &str) {
    let ident = match expr {
        Expr::Identifier(ident) => Some(ident),
        Expr::CompoundIdentifier(parts) => parts.last_mut(),
        _ => None,
    };
    if let Some(ident) = ident {
        ident.value = name.to_string();
    }
}

fn placeholder_text_mut(expr: &mut Expr) -> Option<&mut String> {
    match expr {
        Expr::Value(ValueWithSpan { value: AstValue::Placeholder(p), .. }) => Some(p),
        _ => None,
    }
}

fn number_placeholders(statement: &mut Statement) -> usize {
    let mut next = 0;
    let _ = visit_expressions_mut(statement, |expr| {
        if let Some(p) = placeholder_text_mut(expr) {
            if p.as_str() == PLACEHOLDER {
                *p = format!("{ORDINAL_TAG}{next}");
                next += 1;
            }
        }
        ControlFlow::<()>::Continue(())
    });
    next
}

fn restore_placeholders(statement: &mut Statement) {
    let _ = visit_expressions_mut(statement, |expr| {
        if let Some(p) = placeholder_text_mut(expr) {
            if p.starts_with(ORDINAL_TAG) {
                *p = PLACEHOLDER.to_string();
            }
        }
        ControlFlow::<()>::Continue(())
    });
}

fn count_placeholders(statement: &Statement) -> usize {
    let mut count = 0;
    let _ = visit_expressions(statement, |expr| {
        if let Expr::Value(ValueWithSpan { value: AstValue::Placeholder(p), .. }) = expr {
            if p == PLACEHOLDER {
                count += 1;
            }
        }
        ControlFlow::<()>::Continue(())
    });
    count
}

#[cfg(test)]
pub(crate) mod testing {
    //! Shared fixtures for the rewrite tests.

    use super::*;
    use crate::config::{ColumnsByTable, SecurityConfig};
    use crate::handler::testing::MarkerHandler;
    use crate::parser::{DialectParser, StatementParser};

    pub fn columns() -> ColumnsByTable {
        SecurityConfig::new("marker")
            .with_column(ColumnSecurityConfig::new("users", "ssn", "ssn_enc", "ssn_idx"))
            .with_column(ColumnSecurityConfig::new("users", "email", "email_enc", "email_idx"))
            .with_column(ColumnSecurityConfig::new("accounts", "iban", "iban_enc", "iban_idx"))
            .columns_by_table()
    }

    pub const OVERWRITE: RewriteOptions =
        RewriteOptions { overwrite_source_by_target: true, write_source: false };

    pub fn canonical(sql: &str) -> String {
        DialectParser::default().parse(sql).unwrap().to_string()
    }

    pub fn rewrite_in(
        dialect: &str,
        columns: &ColumnsByTable,
        bound: &BoundStatement,
        options: RewriteOptions,
        result_maps: &[ResultMap],
    ) -> Result<Rewritten, Error> {
        let statement = DialectParser::new(dialect)?.parse(&bound.sql)?;
        let active = ActiveColumns::resolve(&statement, columns);
        let handler = MarkerHandler::default();
        Rewriter::new(&active, &handler, options, result_maps, bound).rewrite(statement)
    }

    pub fn rewrite(bound: &BoundStatement, options: RewriteOptions) -> Rewritten {
        rewrite_in("generic", &columns(), bound, options, &[]).unwrap()
    }

    /// Runtime values bound to the placeholders, in order.
    pub fn bound_values(bound: &BoundStatement) -> Vec<Value> {
        let sync = ParameterSync::new(bound);
        sync.mappings().iter().map(|mapping| sync.value_of(mapping)).collect()
    }
}
