//! Row decryptor: restores plaintext in result rows after execution.

use std::collections::BTreeSet;

use serde_json::{Map, Value};
use tracing::warn;

use crate::context::ColumnPropertyMap;
use crate::handler::SecurityHandler;
use crate::property;
use crate::statement::QueryResult;

/// Outcome counters of one decryption pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecryptReport {
    pub decrypted: usize,
    /// Properties left as ciphertext because the handler failed.
    pub failed: usize,
}

/// Decrypts recorded properties in list-shaped results.
///
/// A failing decrypt leaves that property's ciphertext in place, logs a
/// warning and moves on to the next property; rows are never dropped.
pub struct RowDecryptor<'a> {
    handler: &'a dyn SecurityHandler,
    map_underscore_to_camel_case: bool,
}

impl<'a> RowDecryptor<'a> {
    #[must_use]
    pub fn new(handler: &'a dyn SecurityHandler) -> Self {
        Self { handler, map_underscore_to_camel_case: false }
    }

    /// Also match `user_ssn` against a `userSsn` row key.
    #[must_use]
    pub const fn map_underscore_to_camel_case(mut self, enabled: bool) -> Self {
        self.map_underscore_to_camel_case = enabled;
        self
    }

    /// Decrypts every recorded property of every row in `result`.
    ///
    /// Scalar and unit results, and an empty map, are left untouched.
    pub fn decrypt(
        &self,
        properties: &ColumnPropertyMap,
        result: &mut QueryResult,
    ) -> DecryptReport {
        let mut report = DecryptReport::default();
        let QueryResult::Rows(rows) = result else {
            return report;
        };
        // Several aliases may resolve to one property; decrypt it once per row.
        let properties: BTreeSet<&str> = properties.properties().collect();
        if properties.is_empty() {
            return report;
        }
        for row in rows.iter_mut() {
            for &property in &properties {
                let Some(slot) = self.find_property(row, property) else {
                    continue;
                };
                let cipher = match &*slot {
                    Value::Null => continue,
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                match self.handler.decrypt(&cipher) {
                    Ok(plain) => {
                        *slot = Value::String(plain);
                        report.decrypted += 1;
                    }
                    Err(e) => {
                        warn!(property, error = %e, "decryption failed, ciphertext kept");
                        report.failed += 1;
                    }
                }
            }
        }
        report
    }

    fn find_property<'v>(&self, row: &'v mut Value, property: &str) -> Option<&'v mut Value> {
        if property.contains(['.', '[']) {
            return property::get_mut(row, property);
        }
        let Value::Object(map) = row else {
            return None;
        };
        let key = find_key(map, property, self.map_underscore_to_camel_case)?;
        map.get_mut(&key)
    }
}

/// Row key holding `property`: exact match, then case-insensitive, then
/// (when enabled) ignoring underscores.
fn find_key(
    map: &Map<String, Value>,
    property: &str,
    underscore_to_camel: bool,
) -> Option<String> {
    if map.contains_key(property) {
        return Some(property.to_string());
    }
    let wanted =
        if underscore_to_camel { property.replace('_', "") } else { property.to_string() };
    map.keys()
        .find(|key| key.eq_ignore_ascii_case(property) || key.eq_ignore_ascii_case(&wanted))
        .cloned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::testing::MarkerHandler;
    use serde_json::json;

    fn ssn_map() -> ColumnPropertyMap {
        let mut map = ColumnPropertyMap::new();
        map.insert("ssn", "ssn");
        map
    }

    #[test]
    fn test_decrypts_each_row() {
        let handler = MarkerHandler::default();
        let mut result = QueryResult::Rows(vec![
            json!({"id": 1, "ssn": "enc(111)"}),
            json!({"id": 2, "ssn": "enc(222)"}),
            json!({"id": 3, "ssn": null}),
        ]);

        let report = RowDecryptor::new(&handler).decrypt(&ssn_map(), &mut result);

        assert_eq!(report, DecryptReport { decrypted: 2, failed: 0 });
        assert_eq!(
            result,
            QueryResult::Rows(vec![
                json!({"id": 1, "ssn": "111"}),
                json!({"id": 2, "ssn": "222"}),
                json!({"id": 3, "ssn": null}),
            ])
        );
    }

    #[test]
    fn test_failure_keeps_ciphertext_and_continues() {
        let handler = MarkerHandler::failing_on("enc(bad)");
        let mut map = ssn_map();
        map.insert("email", "email");
        let mut result =
            QueryResult::Rows(vec![json!({"ssn": "enc(bad)", "email": "enc(a@x)"})]);

        let report = RowDecryptor::new(&handler).decrypt(&map, &mut result);

        assert_eq!(report, DecryptReport { decrypted: 1, failed: 1 });
        assert_eq!(result, QueryResult::Rows(vec![json!({"ssn": "enc(bad)", "email": "a@x"})]));
    }

    #[test]
    fn test_shared_property_decrypted_once() {
        let handler = MarkerHandler::default();
        let mut map = ssn_map();
        map.insert("SSN", "ssn");
        let mut result = QueryResult::Rows(vec![json!({"ssn": "enc(111)"})]);

        let report = RowDecryptor::new(&handler).decrypt(&map, &mut result);

        assert_eq!(report, DecryptReport { decrypted: 1, failed: 0 });
        assert_eq!(result, QueryResult::Rows(vec![json!({"ssn": "111"})]));
    }

    #[test]
    fn test_scalar_and_unit_results_bypass() {
        let handler = MarkerHandler::default();
        let decryptor = RowDecryptor::new(&handler);

        let mut scalar = QueryResult::Scalar(json!("enc(1)"));
        let mut unit = QueryResult::Unit;

        assert_eq!(decryptor.decrypt(&ssn_map(), &mut scalar), DecryptReport::default());
        assert_eq!(decryptor.decrypt(&ssn_map(), &mut unit), DecryptReport::default());
        assert_eq!(scalar, QueryResult::Scalar(json!("enc(1)")));
    }

    #[test]
    fn test_empty_map_is_noop() {
        let handler = MarkerHandler::default();
        let mut result = QueryResult::Rows(vec![json!({"ssn": "enc(1)"})]);

        RowDecryptor::new(&handler).decrypt(&ColumnPropertyMap::new(), &mut result);
        assert_eq!(result, QueryResult::Rows(vec![json!({"ssn": "enc(1)"})]));
    }

    #[test]
    fn test_property_lookup_rules() {
        let handler = MarkerHandler::default();
        let mut map = ColumnPropertyMap::new();
        map.insert("user_ssn", "user_ssn");
        map.insert("EMAIL", "EMAIL");

        let mut strict =
            QueryResult::Rows(vec![json!({"userSsn": "enc(1)", "email": "enc(a)"})]);
        RowDecryptor::new(&handler).decrypt(&map, &mut strict);
        assert_eq!(strict, QueryResult::Rows(vec![json!({"userSsn": "enc(1)", "email": "a"})]));

        let mut camel = QueryResult::Rows(vec![json!({"userSsn": "enc(1)"})]);
        RowDecryptor::new(&handler).map_underscore_to_camel_case(true).decrypt(&map, &mut camel);
        assert_eq!(camel, QueryResult::Rows(vec![json!({"userSsn": "1"})]));
    }

    #[test]
    fn test_nested_property() {
        let handler = MarkerHandler::default();
        let mut map = ColumnPropertyMap::new();
        map.insert("ssn", "owner.ids[0]");
        let mut result = QueryResult::Rows(vec![json!({"owner": {"ids": ["enc(7)"]}})]);

        RowDecryptor::new(&handler).decrypt(&map, &mut result);
        assert_eq!(result, QueryResult::Rows(vec![json!({"owner": {"ids": ["7"]}})]));
    }
}
