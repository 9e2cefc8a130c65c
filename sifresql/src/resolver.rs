//! Finds the configured sensitive columns a statement can touch.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::ops::ControlFlow;

use sqlparser::ast::{
    visit_relations, Ident, Insert, ObjectName, Statement, TableFactor, TableObject,
    TableWithJoins,
};

use crate::config::{ColumnSecurityConfig, ColumnsByTable};

/// Canonical form of an identifier used for every name comparison.
///
/// Strips one pair of surrounding quotes (`"`, `` ` `` or `[]`) and
/// lowercases ASCII letters.
#[must_use]
pub fn normalize_identifier(name: &str) -> String {
    let name = name.trim();
    let unquoted = [('"', '"'), ('`', '`'), ('[', ']')]
        .iter()
        .find_map(|(open, close)| name.strip_prefix(*open)?.strip_suffix(*close))
        .unwrap_or(name);
    unquoted.to_ascii_lowercase()
}

/// Normalized form of an already parsed identifier (quotes are gone).
pub(crate) fn normalize_ident(ident: &Ident) -> String {
    ident.value.to_ascii_lowercase()
}

/// Lookup keys for a table name: the full dotted name and, for qualified
/// names, the bare table name.
pub(crate) fn table_keys(name: &ObjectName) -> Vec<String> {
    let parts: Vec<String> =
        name.0.iter().filter_map(|part| part.as_ident()).map(normalize_ident).collect();
    let mut keys = Vec::with_capacity(2);
    if let Some(last) = parts.last() {
        if parts.len() > 1 {
            keys.push(parts.join("."));
        }
        keys.push(last.clone());
    }
    keys
}

/// Table names appearing anywhere in `statement` (subqueries included), in first-seen order.
#[must_use]
pub fn referenced_tables(statement: &Statement) -> Vec<ObjectName> {
    let mut names: Vec<ObjectName> = Vec::new();
    let mut push = |name: &ObjectName| {
        if !names.contains(name) {
            names.push(name.clone());
        }
    };
    if let Statement::Insert(Insert { table: TableObject::TableName(name), .. }) = statement {
        push(name);
    }
    let _ = visit_relations(statement, |name| {
        push(name);
        ControlFlow::<()>::Continue(())
    });
    names
}

/// Base tables named directly in a FROM list, following joins and
/// parenthesized joins but not derived tables.
pub(crate) fn base_tables(from: &[TableWithJoins]) -> Vec<&ObjectName> {
    fn collect<'a>(factor: &'a TableFactor, out: &mut Vec<&'a ObjectName>) {
        match factor {
            TableFactor::Table { name, .. } => out.push(name),
            TableFactor::NestedJoin { table_with_joins, .. } => {
                collect(&table_with_joins.relation, out);
                for join in &table_with_joins.joins {
                    collect(&join.relation, out);
                }
            }
            _ => {}
        }
    }

    let mut out = Vec::new();
    for table in from {
        collect(&table.relation, &mut out);
        for join in &table.joins {
            collect(&join.relation, &mut out);
        }
    }
    out
}

/// Sensitive columns active for one statement: the union over every
/// configured table the statement references.
#[derive(Debug, Clone, Default)]
pub struct ActiveColumns {
    tables: BTreeSet<String>,
    /// Candidates per source column name, in table reference order.
    by_source: HashMap<String, Vec<ColumnSecurityConfig>>,
    derived: HashSet<String>,
}

impl ActiveColumns {
    /// Resolves the active columns of `statement`.
    ///
    /// Every referenced table configuring a source column name is kept as a
    /// candidate; see [`ActiveColumns::get_in`] for how one is picked.
    #[must_use]
    pub fn resolve(statement: &Statement, columns_by_table: &ColumnsByTable) -> Self {
        let mut active = Self::default();
        for name in referenced_tables(statement) {
            let Some((key, columns)) = table_keys(&name)
                .into_iter()
                .find_map(|key| columns_by_table.get(&key).map(|columns| (key, columns)))
            else {
                continue;
            };
            if !active.tables.insert(key) {
                continue;
            }
            for (source, column) in columns {
                active.derived.insert(column.target_column.to_ascii_lowercase());
                active.derived.insert(column.index_column.to_ascii_lowercase());
                active.by_source.entry(source.clone()).or_default().push(column.clone());
            }
        }
        active
    }

    /// `true` when no referenced table is configured (the fast path).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_source.is_empty()
    }

    /// Normalized names of the configured tables the statement references.
    #[must_use]
    pub fn tables(&self) -> &BTreeSet<String> {
        &self.tables
    }

    /// Configuration of the sensitive column named `ident`, if any. With
    /// several candidates the table referenced first wins.
    #[must_use]
    pub fn get(&self, ident: &Ident) -> Option<&ColumnSecurityConfig> {
        self.by_source.get(&normalize_ident(ident))?.first()
    }

    /// Like [`ActiveColumns::get`], but prefers a candidate configured for
    /// one of the `scope` tables, the FROM clause of the enclosing select.
    #[must_use]
    pub fn get_in(&self, ident: &Ident, scope: &HashSet<String>) -> Option<&ColumnSecurityConfig> {
        let candidates = self.by_source.get(&normalize_ident(ident))?;
        candidates
            .iter()
            .find(|column| scope.contains(&column.table))
            .or_else(|| candidates.first())
    }

    /// `true` if `ident` names one of the target or index columns.
    #[must_use]
    pub fn is_derived(&self, ident: &Ident) -> bool {
        self.derived.contains(&normalize_ident(ident))
    }
}
