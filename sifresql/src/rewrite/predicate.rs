//! WHERE clause rewriting: sensitive columns are compared through their
//! index column, against indexed values.

use serde_json::Value;
use sqlparser::ast::{Expr, FunctionArg, FunctionArgExpr, FunctionArguments};

use super::{plain_text, rename_column, string_literal, Operand, Rewriter};
use crate::error::Error;
use crate::params::{fresh_property_name, Anchor};

/// Argument expressions of a function call.
fn function_args(expr: &mut Expr) -> Vec<&mut Expr> {
    let Expr::Function(function) = expr else {
        return Vec::new();
    };
    let FunctionArguments::List(list) = &mut function.args else {
        return Vec::new();
    };
    list.args
        .iter_mut()
        .filter_map(|arg| match arg {
            FunctionArg::Unnamed(FunctionArgExpr::Expr(expr))
            | FunctionArg::Named { arg: FunctionArgExpr::Expr(expr), .. } => Some(expr),
            _ => None,
        })
        .collect()
}

impl Rewriter<'_> {
    pub(super) fn rewrite_predicate(&mut self, expr: &mut Expr) -> Result<(), Error> {
        match expr {
            Expr::Nested(inner)
            | Expr::UnaryOp { expr: inner, .. }
            | Expr::IsNull(inner)
            | Expr::IsNotNull(inner) => self.rewrite_predicate(inner),
            Expr::BinaryOp { left, right, .. } => {
                let left_sensitive = self.sensitive_column(left).is_some();
                let right_sensitive = self.sensitive_column(right).is_some();
                if left_sensitive && !right_sensitive {
                    self.index_operand(right)?;
                } else if right_sensitive && !left_sensitive {
                    self.index_operand(left)?;
                }
                self.rewrite_predicate(left)?;
                self.rewrite_predicate(right)
            }
            Expr::Like { expr: left, pattern, .. }
            | Expr::ILike { expr: left, pattern, .. }
            | Expr::SimilarTo { expr: left, pattern, .. } => {
                if self.sensitive_column(left).is_some() {
                    self.index_operand(pattern)?;
                }
                self.rewrite_predicate(left)
            }
            // Only the left side is renamed; the subquery is a separate scope.
            Expr::InSubquery { expr: left, .. } => self.rewrite_predicate(left),
            Expr::InList { expr: left, list, .. } => {
                if self.sensitive_column(left).is_some() {
                    for item in list.iter_mut() {
                        self.index_operand(item)?;
                    }
                }
                self.rewrite_predicate(left)
            }
            Expr::Function(_) => {
                for arg in function_args(expr) {
                    self.rewrite_predicate(arg)?;
                }
                Ok(())
            }
            Expr::Identifier(_) | Expr::CompoundIdentifier(_) => {
                if let Some(column) = self.sensitive_column(expr) {
                    rename_column(expr, &column.index_column);
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Replaces a value compared with a sensitive column by its index.
    ///
    /// A placeholder keeps its slot but is rebound to a fresh parameter
    /// holding the index; a literal is replaced in place. Function arguments
    /// are indexed one by one. `NULL` is left alone.
    fn index_operand(&mut self, expr: &mut Expr) -> Result<(), Error> {
        match Operand::of(expr) {
            Operand::Placeholder(ordinal) => {
                if let Some(plain) = plain_text(&self.original_value(ordinal)?)? {
                    let index = Value::String(self.handler.index(&plain)?);
                    self.params.replace_param(
                        fresh_property_name(),
                        Some(index),
                        Anchor::Origin(ordinal),
                    );
                }
                Ok(())
            }
            Operand::Literal(plain) => {
                *expr = string_literal(self.handler.index(&plain)?);
                Ok(())
            }
            Operand::Null => Ok(()),
            Operand::Unsupported => match expr {
                Expr::Nested(inner) => self.index_operand(inner),
                Expr::Function(_) => {
                    for arg in function_args(expr) {
                        self.index_operand(arg)?;
                    }
                    Ok(())
                }
                _ => Ok(()),
            },
        }
    }
}
