//! Column pairing for INSERT and UPDATE.
//!
//! Every value written to a sensitive source column is paired with its
//! ciphertext and index. Lists are rebuilt in one left-to-right pass, so
//! slots inserted (or removed) for earlier columns never shift later ones.

use std::mem;

use serde_json::Value;
use sqlparser::ast::{
    Assignment, AssignmentTarget, Expr, Ident, Insert, ObjectNamePart, SetExpr,
};
use tracing::debug;

use super::{null, placeholder, plain_text, string_literal, Operand, Rewriter};
use crate::config::ColumnSecurityConfig;
use crate::error::Error;
use crate::params::{fresh_property_name, Anchor};

/// A sensitive column at `position` of the original list.
struct Slot<'c> {
    position: usize,
    column: &'c ColumnSecurityConfig,
}

/// Rebuilds `items`, expanding each slot into `[source?, target, index]`.
fn splice<T>(
    items: Vec<T>,
    slots: &[Slot<'_>],
    write_source: bool,
    mut derive: impl FnMut(&T, &Slot<'_>) -> Result<(T, T), Error>,
) -> Result<Vec<T>, Error> {
    let mut out = Vec::with_capacity(items.len() + 2 * slots.len());
    let mut slots = slots.iter().peekable();
    for (position, item) in items.into_iter().enumerate() {
        match slots.next_if(|slot| slot.position == position) {
            Some(slot) => {
                let (target, index) = derive(&item, slot)?;
                if write_source {
                    out.push(item);
                }
                out.push(target);
                out.push(index);
            }
            None => out.push(item),
        }
    }
    Ok(out)
}

fn renamed(source: &Ident, name: &str) -> Ident {
    let mut ident = source.clone();
    ident.value = name.to_string();
    ident
}

fn assignment_column(assignment: &Assignment) -> Option<&Ident> {
    match &assignment.target {
        AssignmentTarget::ColumnName(name) => name.0.last()?.as_ident(),
        _ => None,
    }
}

fn retargeted(assignment: &Assignment, column: &str, value: Expr) -> Assignment {
    let mut target = assignment.target.clone();
    if let AssignmentTarget::ColumnName(name) = &mut target {
        if let Some(ObjectNamePart::Identifier(ident)) = name.0.last_mut() {
            ident.value = column.to_string();
        }
    }
    Assignment { target, value }
}

impl Rewriter<'_> {
    pub(super) fn rewrite_insert(&mut self, insert: &mut Insert) -> Result<(), Error> {
        if insert.columns.is_empty() {
            // MySQL `INSERT ... SET col = ?`
            return self.rewrite_assignments(&mut insert.assignments);
        }
        let active = self.active;
        if insert.columns.iter().any(|column| active.is_derived(column)) {
            debug!("insert already targets derived columns, left unmodified");
            return Ok(());
        }
        let sensitive: Vec<Slot<'_>> = insert
            .columns
            .iter()
            .enumerate()
            .filter_map(|(position, ident)| {
                active.get(ident).map(|column| Slot { position, column })
            })
            .collect();
        if sensitive.is_empty() {
            return Ok(());
        }

        let width = insert.columns.len();
        let rows = match insert.source.as_deref_mut().map(|query| query.body.as_mut()) {
            Some(SetExpr::Values(values)) => &mut values.rows,
            _ => {
                debug!("insert source is not a VALUES list, left unmodified");
                return Ok(());
            }
        };
        if rows.iter().any(|row| row.len() != width) {
            debug!("insert row width differs from its column list, left unmodified");
            return Ok(());
        }

        // A column is only paired when every row supplies a value the engine understands.
        let slots: Vec<Slot<'_>> = sensitive
            .into_iter()
            .filter(|slot| {
                let supported =
                    rows.iter().all(|row| Operand::of(&row[slot.position]).is_supported());
                if !supported {
                    debug!(
                        column = %slot.column.source_column,
                        "unsupported value expression, column left unmodified"
                    );
                }
                supported
            })
            .collect();
        if slots.is_empty() {
            return Ok(());
        }

        let write_source = self.options.write_source;
        for row in rows.iter_mut() {
            *row =
                splice(mem::take(row), &slots, write_source, |expr, _| self.derive_pair(expr))?;
        }
        let columns = mem::take(&mut insert.columns);
        insert.columns = splice(columns, &slots, write_source, |ident, slot| {
            let column = slot.column;
            Ok((renamed(ident, &column.target_column), renamed(ident, &column.index_column)))
        })?;
        Ok(())
    }

    pub(super) fn rewrite_assignments(
        &mut self,
        assignments: &mut Vec<Assignment>,
    ) -> Result<(), Error> {
        let active = self.active;
        if assignments.iter().filter_map(assignment_column).any(|ident| active.is_derived(ident)) {
            debug!("assignments already target derived columns, left unmodified");
            return Ok(());
        }
        let slots: Vec<Slot<'_>> = assignments
            .iter()
            .enumerate()
            .filter_map(|(position, assignment)| {
                let column = active.get(assignment_column(assignment)?)?;
                if Operand::of(&assignment.value).is_supported() {
                    Some(Slot { position, column })
                } else {
                    debug!(
                        column = %column.source_column,
                        "unsupported value expression, assignment left unmodified"
                    );
                    None
                }
            })
            .collect();
        if slots.is_empty() {
            return Ok(());
        }

        let write_source = self.options.write_source;
        *assignments = splice(mem::take(assignments), &slots, write_source, |assignment, slot| {
            let (target, index) = self.derive_pair(&assignment.value)?;
            Ok((
                retargeted(assignment, &slot.column.target_column, target),
                retargeted(assignment, &slot.column.index_column, index),
            ))
        })?;
        Ok(())
    }

    /// Ciphertext and index expressions for a value written to a sensitive column.
    ///
    /// Placeholders get two new bindings right after the original one, which
    /// is dropped unless the source column is kept. Literals are replaced in
    /// place. `NULL` stays `NULL`.
    fn derive_pair(&mut self, expr: &Expr) -> Result<(Expr, Expr), Error> {
        match Operand::of(expr) {
            Operand::Placeholder(ordinal) => {
                let (target, index) = match plain_text(&self.original_value(ordinal)?)? {
                    Some(plain) => (
                        Value::String(self.handler.encrypt(&plain)?),
                        Value::String(self.handler.index(&plain)?),
                    ),
                    None => (Value::Null, Value::Null),
                };
                let anchor = Anchor::Origin(ordinal);
                let added = self.params.add_param_after(fresh_property_name(), target, anchor, 0)
                    && self.params.add_param_after(fresh_property_name(), index, anchor, 1);
                if !added {
                    return Err(Error::transform(format!("placeholder {ordinal} has no mapping")));
                }
                if !self.options.write_source {
                    self.params.remove_param(anchor);
                }
                Ok((placeholder(), placeholder()))
            }
            Operand::Literal(plain) => Ok((
                string_literal(self.handler.encrypt(&plain)?),
                string_literal(self.handler.index(&plain)?),
            )),
            Operand::Null => Ok((null(), null())),
            Operand::Unsupported => Err(Error::transform("unsupported value expression")),
        }
    }
}
