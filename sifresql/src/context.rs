//! Per-invocation context carried from the rewrite of a select statement to
//! the decryption of its result rows.

use std::collections::BTreeMap;

/// Result properties that hold ciphertext, keyed by the column alias the
/// rewritten projection produces.
///
/// # Example
///
/// ```
/// use sifresql::context::ColumnPropertyMap;
///
/// let mut map = ColumnPropertyMap::new();
/// map.insert("ssn", "userSsn");
///
/// assert_eq!(map.property("ssn"), Some("userSsn"));
/// assert_eq!(map.properties().collect::<Vec<_>>(), ["userSsn"]);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnPropertyMap {
    entries: BTreeMap<String, String>,
}

impl ColumnPropertyMap {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that `alias` carries ciphertext for `property`.
    pub fn insert(&mut self, alias: impl Into<String>, property: impl Into<String>) {
        self.entries.insert(alias.into(), property.into());
    }

    #[must_use]
    pub fn property(&self, alias: &str) -> Option<&str> {
        self.entries.get(alias).map(String::as_str)
    }

    /// Properties to decrypt, one per recorded alias.
    pub fn properties(&self) -> impl Iterator<Item = &str> {
        self.entries.values().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(alias, property)| (alias.as_str(), property.as_str()))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// State of one statement invocation between `prepare` and `fetch`.
///
/// Owned by the caller and consumed by
/// [`SecurityInterceptor::fetch`](crate::interceptor::SecurityInterceptor::fetch),
/// so concurrent invocations never share it and a map cannot leak into a
/// later result.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Invocation {
    statement_id: String,
    column_properties: ColumnPropertyMap,
}

impl Invocation {
    /// Invocation with nothing to decrypt.
    #[must_use]
    pub fn passthrough(statement_id: impl Into<String>) -> Self {
        Self { statement_id: statement_id.into(), column_properties: ColumnPropertyMap::new() }
    }

    #[must_use]
    pub fn new(statement_id: impl Into<String>, column_properties: ColumnPropertyMap) -> Self {
        Self { statement_id: statement_id.into(), column_properties }
    }

    #[must_use]
    pub fn statement_id(&self) -> &str {
        &self.statement_id
    }

    #[must_use]
    pub const fn column_properties(&self) -> &ColumnPropertyMap {
        &self.column_properties
    }

    /// `true` when the result of this invocation needs decryption.
    #[must_use]
    pub fn needs_decryption(&self) -> bool {
        !self.column_properties.is_empty()
    }
}
