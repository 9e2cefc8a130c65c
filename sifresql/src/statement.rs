//! Host boundary types: the statement metadata, its bound SQL and parameters,
//! and the shape of an execution result.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Error;

/// Command type of a mapped statement, as declared by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatementKind {
    Insert,
    Update,
    Select,
    Delete,
    /// Anything else (DDL, stored procedure calls, ...). Never rewritten.
    Unknown,
}

impl StatementKind {
    /// Returns `true` for the four kinds the rewrite engine handles.
    #[must_use]
    pub const fn is_rewritable(self) -> bool {
        !matches!(self, Self::Unknown)
    }
}

impl FromStr for StatementKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "insert" => Ok(Self::Insert),
            "update" => Ok(Self::Update),
            "select" => Ok(Self::Select),
            "delete" => Ok(Self::Delete),
            "unknown" => Ok(Self::Unknown),
            other => Err(Error::configuration(format!("unknown statement kind `{other}`"))),
        }
    }
}

impl fmt::Display for StatementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Insert => "insert",
            Self::Update => "update",
            Self::Select => "select",
            Self::Delete => "delete",
            Self::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// One declared `column -> property` pair of a result map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultMapping {
    pub column: String,
    pub property: String,
}

/// Declared result mappings of a select statement.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultMap {
    pub id: String,
    #[serde(default)]
    pub mappings: Vec<ResultMapping>,
}

impl ResultMap {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into(), mappings: Vec::new() }
    }

    /// Adds a `column -> property` mapping.
    #[must_use]
    pub fn with_mapping(mut self, column: impl Into<String>, property: impl Into<String>) -> Self {
        self.mappings.push(ResultMapping { column: column.into(), property: property.into() });
        self
    }
}

/// Static metadata of a statement: its identifier, kind and result maps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappedStatement {
    pub id: String,
    pub kind: StatementKind,
    #[serde(default)]
    pub result_maps: Vec<ResultMap>,
}

impl MappedStatement {
    #[must_use]
    pub fn new(id: impl Into<String>, kind: StatementKind) -> Self {
        Self { id: id.into(), kind, result_maps: Vec::new() }
    }

    #[must_use]
    pub fn with_result_map(mut self, result_map: ResultMap) -> Self {
        self.result_maps.push(result_map);
        self
    }
}

/// Direction of a bound parameter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParameterMode {
    #[default]
    In,
    Out,
    InOut,
}

/// Declared type of a bound parameter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    /// Resolved by the host from the runtime value.
    #[default]
    Any,
    Text,
    Integer,
    Float,
    Boolean,
    Bytes,
}

/// Binding between one positional `?` placeholder and a named value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterMapping {
    pub property: String,
    #[serde(default)]
    pub mode: ParameterMode,
    #[serde(default)]
    pub value_type: ValueType,
}

impl ParameterMapping {
    /// An `IN` mapping resolved by type at bind time.
    #[must_use]
    pub fn new(property: impl Into<String>) -> Self {
        Self { property: property.into(), mode: ParameterMode::In, value_type: ValueType::Any }
    }

    /// An `IN` mapping holding text, used for every value the engine introduces.
    #[must_use]
    pub fn text(property: impl Into<String>) -> Self {
        Self { property: property.into(), mode: ParameterMode::In, value_type: ValueType::Text }
    }
}

/// SQL text plus everything needed to bind its placeholders.
///
/// `parameter_mappings[i]` binds the `i`-th `?` of `sql`, in text order.
/// Values are looked up in `additional_parameters` first, then in
/// `parameter_object`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BoundStatement {
    pub sql: String,
    #[serde(default)]
    pub parameter_mappings: Vec<ParameterMapping>,
    #[serde(default)]
    pub parameter_object: Value,
    #[serde(default)]
    pub additional_parameters: BTreeMap<String, Value>,
}

impl BoundStatement {
    #[must_use]
    pub fn new(sql: impl Into<String>) -> Self {
        Self { sql: sql.into(), ..Self::default() }
    }

    /// Appends a mapping for the next placeholder.
    #[must_use]
    pub fn with_mapping(mut self, property: impl Into<String>) -> Self {
        self.parameter_mappings.push(ParameterMapping::new(property));
        self
    }

    #[must_use]
    pub fn with_parameter_object(mut self, parameter_object: Value) -> Self {
        self.parameter_object = parameter_object;
        self
    }

    #[must_use]
    pub fn with_additional_parameter(mut self, name: impl Into<String>, value: Value) -> Self {
        self.additional_parameters.insert(name.into(), value);
        self
    }
}

/// Outcome of executing a statement.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryResult {
    /// List-shaped result: one JSON object per row. The only shape that is decrypted.
    Rows(Vec<Value>),
    /// A single value (count, generated key, ...).
    Scalar(Value),
    /// Nothing returned.
    Unit,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_statement_kind_parse_and_display() {
        assert_eq!("SELECT".parse::<StatementKind>().unwrap(), StatementKind::Select);
        assert_eq!(StatementKind::Delete.to_string(), "delete");
        assert!("merge".parse::<StatementKind>().is_err());
        assert!(!StatementKind::Unknown.is_rewritable());
    }

    #[test]
    fn test_bound_statement_from_json() {
        let bound: BoundStatement = serde_json::from_value(json!({
            "sql": "SELECT id FROM users WHERE ssn = ?",
            "parameter_mappings": [{"property": "ssn"}],
            "parameter_object": {"ssn": "123-45-6789"}
        }))
        .unwrap();

        assert_eq!(bound.parameter_mappings, vec![ParameterMapping::new("ssn")]);
        assert_eq!(bound.parameter_mappings[0].mode, ParameterMode::In);
        assert!(bound.additional_parameters.is_empty());
    }
}
