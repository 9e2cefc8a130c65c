//! SELECT rewriting: projections read ciphertext columns under the source
//! column's name, and every nested select is visited.

use std::mem;

use sqlparser::ast::{Expr, Ident, Query, Select, SelectItem, SetExpr, TableFactor};

use super::{column_ident, rename_column, Rewriter};
use crate::config::ColumnSecurityConfig;
use crate::error::Error;
use crate::resolver::{base_tables, normalize_ident, normalize_identifier, table_keys};

impl<'a> Rewriter<'a> {
    pub(super) fn rewrite_query(&mut self, query: &mut Query) -> Result<(), Error> {
        if let Some(with) = &mut query.with {
            for cte in &mut with.cte_tables {
                self.rewrite_query(&mut cte.query)?;
            }
        }
        self.rewrite_set_expr(&mut query.body)
    }

    fn rewrite_set_expr(&mut self, body: &mut SetExpr) -> Result<(), Error> {
        match body {
            SetExpr::Select(select) => self.rewrite_select(select),
            SetExpr::Query(query) => self.rewrite_query(query),
            SetExpr::SetOperation { left, right, .. } => {
                self.rewrite_set_expr(left)?;
                self.rewrite_set_expr(right)
            }
            _ => Ok(()),
        }
    }

    /// Rewrites `select` with its own FROM tables as the column scope.
    fn rewrite_select(&mut self, select: &mut Select) -> Result<(), Error> {
        let scope = base_tables(&select.from).into_iter().flat_map(table_keys).collect();
        let outer = mem::replace(&mut self.scope, scope);
        let result = self.rewrite_scoped_select(select);
        self.scope = outer;
        result
    }

    fn rewrite_scoped_select(&mut self, select: &mut Select) -> Result<(), Error> {
        if self.options.overwrite_source_by_target && !self.scope.is_empty() {
            self.rewrite_projection(&mut select.projection);
        }
        for table in &mut select.from {
            self.rewrite_table_factor(&mut table.relation)?;
            for join in &mut table.joins {
                self.rewrite_table_factor(&mut join.relation)?;
            }
        }
        if let Some(selection) = &mut select.selection {
            self.rewrite_filter(selection)?;
        }
        Ok(())
    }

    fn rewrite_table_factor(&mut self, factor: &mut TableFactor) -> Result<(), Error> {
        match factor {
            TableFactor::Derived { subquery, .. } => self.rewrite_query(subquery),
            TableFactor::NestedJoin { table_with_joins, .. } => {
                self.rewrite_table_factor(&mut table_with_joins.relation)?;
                for join in &mut table_with_joins.joins {
                    self.rewrite_table_factor(&mut join.relation)?;
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Sensitive column projected by `expr` and configured for one of the
    /// tables named in the select's own FROM clause.
    fn projected_column(&self, expr: &Expr) -> Option<&'a ColumnSecurityConfig> {
        self.sensitive_column(expr).filter(|column| self.scope.contains(&column.table))
    }

    /// Reads sensitive columns from their ciphertext column, aliased so the
    /// result keeps the original column name. Wildcards are left alone.
    fn rewrite_projection(&mut self, projection: &mut [SelectItem]) {
        for item in projection.iter_mut() {
            let replacement = match item {
                SelectItem::UnnamedExpr(expr) => {
                    let Some(column) = self.projected_column(expr) else {
                        continue;
                    };
                    let Some(alias) = column_ident(expr).cloned() else {
                        continue;
                    };
                    let mut renamed = expr.clone();
                    rename_column(&mut renamed, &column.target_column);
                    self.record_alias(&alias);
                    Some(SelectItem::ExprWithAlias { expr: renamed, alias })
                }
                SelectItem::ExprWithAlias { expr, alias } => {
                    let Some(column) = self.projected_column(expr) else {
                        continue;
                    };
                    rename_column(expr, &column.target_column);
                    let alias = alias.clone();
                    self.record_alias(&alias);
                    None
                }
                _ => None,
            };
            if let Some(replacement) = replacement {
                *item = replacement;
            }
        }
    }

    /// Records `alias -> property`, the property coming from the declared
    /// result mappings or defaulting to the normalized alias.
    fn record_alias(&mut self, alias: &Ident) {
        let normalized = normalize_ident(alias);
        let property = self
            .result_maps
            .iter()
            .flat_map(|map| &map.mappings)
            .find(|mapping| normalize_identifier(&mapping.column) == normalized)
            .map_or_else(|| normalized.clone(), |mapping| mapping.property.clone());
        self.column_properties.insert(alias.value.clone(), property);
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::*;
    use super::super::RewriteOptions;
    use crate::config::{ColumnSecurityConfig, SecurityConfig};
    use crate::statement::{BoundStatement, ResultMap};
    use serde_json::json;

    fn select(sql: &str, result_maps: &[ResultMap]) -> super::super::Rewritten {
        let bound = BoundStatement::new(sql);
        rewrite_in("generic", &columns(), &bound, OVERWRITE, result_maps).unwrap()
    }

    #[test]
    fn test_projection_aliases_source_name() {
        let rewritten = select("SELECT id, ssn, u.email AS mail FROM users u", &[]);

        assert_eq!(
            rewritten.bound.sql,
            canonical("SELECT id, ssn_enc AS ssn, u.email_enc AS mail FROM users u")
        );
        assert_eq!(rewritten.column_properties.property("ssn"), Some("ssn"));
        assert_eq!(rewritten.column_properties.property("mail"), Some("mail"));
    }

    #[test]
    fn test_projection_uses_result_map_property() {
        let result_map = ResultMap::new("userMap").with_mapping("`SSN`", "userSsn");
        let rewritten = select("SELECT ssn FROM users", &[result_map]);

        assert_eq!(rewritten.column_properties.property("ssn"), Some("userSsn"));
    }

    #[test]
    fn test_wildcards_are_left_alone() {
        let rewritten = select("SELECT *, u.* FROM users u", &[]);

        assert_eq!(rewritten.bound.sql, canonical("SELECT *, u.* FROM users u"));
        assert!(rewritten.column_properties.is_empty());
    }

    #[test]
    fn test_select_where_and_projection() {
        let bound = BoundStatement::new("SELECT ssn FROM users WHERE ssn = ?")
            .with_mapping("ssn")
            .with_parameter_object(json!("123"));
        let rewritten = rewrite(&bound, OVERWRITE);

        assert_eq!(
            rewritten.bound.sql,
            canonical("SELECT ssn_enc AS ssn FROM users WHERE ssn_idx = ?")
        );
        assert_eq!(bound_values(&rewritten.bound), vec![json!("idx(123)")]);
    }

    #[test]
    fn test_union_and_cte_branches() {
        let rewritten = select(
            "WITH a AS (SELECT iban FROM accounts) \
             SELECT ssn FROM users UNION ALL SELECT iban FROM a",
            &[],
        );

        assert_eq!(
            rewritten.bound.sql,
            canonical(
                "WITH a AS (SELECT iban_enc AS iban FROM accounts) \
                 SELECT ssn_enc AS ssn FROM users UNION ALL SELECT iban FROM a"
            )
        );
    }

    #[test]
    fn test_derived_table_and_joins() {
        let bound = BoundStatement::new(
            "SELECT t.ssn FROM (SELECT ssn FROM users WHERE ssn = ?) t \
             JOIN (accounts a JOIN (SELECT iban FROM accounts) b ON a.id = b.id) ON true",
        )
        .with_mapping("ssn")
        .with_parameter_object(json!({"ssn": "1"}));
        let rewritten = rewrite(&bound, OVERWRITE);

        assert_eq!(
            rewritten.bound.sql,
            canonical(
                "SELECT t.ssn FROM (SELECT ssn_enc AS ssn FROM users WHERE ssn_idx = ?) t \
                 JOIN (accounts a JOIN (SELECT iban_enc AS iban FROM accounts) b \
                 ON a.id = b.id) ON true"
            )
        );
        assert_eq!(rewritten.column_properties.property("ssn"), Some("ssn"));
        assert_eq!(rewritten.column_properties.len(), 2);
    }

    #[test]
    fn test_shared_source_name_resolved_per_select() {
        let columns = SecurityConfig::new("marker")
            .with_column(ColumnSecurityConfig::new("users", "ssn", "ssn_enc", "ssn_idx"))
            .with_column(ColumnSecurityConfig::new("accounts", "ssn", "acc_enc", "acc_idx"))
            .columns_by_table();
        let bound = BoundStatement::new(
            "WITH u AS (SELECT ssn FROM users) SELECT ssn FROM accounts WHERE ssn = ?",
        )
        .with_mapping("ssn")
        .with_parameter_object(json!({"ssn": "9"}));

        let rewritten = rewrite_in("generic", &columns, &bound, OVERWRITE, &[]).unwrap();

        assert_eq!(
            rewritten.bound.sql,
            canonical(
                "WITH u AS (SELECT ssn_enc AS ssn FROM users) \
                 SELECT acc_enc AS ssn FROM accounts WHERE acc_idx = ?"
            )
        );
        assert_eq!(bound_values(&rewritten.bound), vec![json!("idx(9)")]);
    }

    #[test]
    fn test_projection_untouched_without_overwrite() {
        let bound = BoundStatement::new("SELECT ssn FROM users");
        let rewritten = rewrite(&bound, RewriteOptions::default());

        assert_eq!(rewritten.bound.sql, canonical(&bound.sql));
        assert!(rewritten.column_properties.is_empty());
    }

    #[test]
    fn test_subquery_in_where_is_not_rewritten() {
        let rewritten =
            select("SELECT id FROM users WHERE id IN (SELECT id FROM users WHERE ssn = 'x')", &[]);

        assert_eq!(
            rewritten.bound.sql,
            canonical("SELECT id FROM users WHERE id IN (SELECT id FROM users WHERE ssn = 'x')")
        );
    }
}
