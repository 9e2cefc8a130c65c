//! Integration tests for the interceptor with the built-in vault handler.

use proptest::prelude::*;
use serde_json::{json, Value};
use sifresql::prelude::*;
use sifresql_key_file::FileKeyProvider;
use std::sync::Mutex;
use tempfile::TempDir;

/// A single-table store executing the handful of statement shapes used below.
#[derive(Default)]
struct UserTable {
    rows: Mutex<Vec<(i64, String, String)>>,
}

fn bound_value(bound: &BoundStatement, position: usize) -> Value {
    let property = &bound.parameter_mappings[position].property;
    bound
        .additional_parameters
        .get(property)
        .or_else(|| bound.parameter_object.get(property))
        .cloned()
        .unwrap_or(Value::Null)
}

impl UserTable {
    fn execute(&self, bound: &BoundStatement) -> Result<QueryResult, String> {
        let mut rows = self.rows.lock().map_err(|e| e.to_string())?;
        match bound.sql.as_str() {
            "INSERT INTO users (id, ssn_enc, ssn_idx) VALUES (?, ?, ?)" => {
                let id = bound_value(bound, 0).as_i64().ok_or("id")?;
                let text = |i| bound_value(bound, i).as_str().map(str::to_string).ok_or("text");
                rows.push((id, text(1)?, text(2)?));
                Ok(QueryResult::Scalar(json!(1)))
            }
            "SELECT id, ssn_enc AS ssn FROM users WHERE ssn_idx = ?" => {
                let index = bound_value(bound, 0);
                Ok(QueryResult::Rows(
                    rows.iter()
                        .filter(|(_, _, idx)| index.as_str() == Some(idx.as_str()))
                        .map(|(id, enc, _)| json!({"id": id, "ssn": enc}))
                        .collect(),
                ))
            }
            other => Err(format!("unexpected statement: {other}")),
        }
    }
}

fn config() -> SecurityConfig {
    let mut config = SecurityConfig::new(sifresql::handler::VAULT_HANDLER)
        .with_handler_option("masterKey", "11".repeat(32))
        .with_handler_option("pepper", "22".repeat(32))
        .with_statement_prefix("user.")
        .with_column(ColumnSecurityConfig::new("users", "ssn", "ssn_enc", "ssn_idx"));
    config.overwrite_source_by_target = true;
    config
}

fn insert(interceptor: &SecurityInterceptor, table: &UserTable, id: i64, ssn: &str) {
    let statement = MappedStatement::new("user.insert", StatementKind::Insert);
    let bound = BoundStatement::new("INSERT INTO users (id, ssn) VALUES (?, ?)")
        .with_mapping("id")
        .with_mapping("ssn")
        .with_parameter_object(json!({"id": id, "ssn": ssn}));
    interceptor.intercept(&statement, &bound, |b| table.execute(b)).expect("insert failed");
}

fn find_by_ssn(interceptor: &SecurityInterceptor, table: &UserTable, ssn: &str) -> QueryResult {
    let statement = MappedStatement::new("user.findBySsn", StatementKind::Select);
    let bound = BoundStatement::new("SELECT id, ssn FROM users WHERE ssn = ?")
        .with_mapping("ssn")
        .with_parameter_object(json!(ssn));
    interceptor.intercept(&statement, &bound, |b| table.execute(b)).expect("select failed")
}

#[test]
fn test_insert_then_search_by_index() {
    let interceptor = SecurityInterceptor::new(&config(), &HandlerRegistry::default()).unwrap();
    let table = UserTable::default();

    insert(&interceptor, &table, 1, "123-45-6789");
    insert(&interceptor, &table, 2, "987-65-4321");
    insert(&interceptor, &table, 3, "123-45-6789");

    for (_, enc, _) in table.rows.lock().unwrap().iter() {
        assert!(!enc.contains("-45-") && !enc.contains("-65-"));
    }

    let result = find_by_ssn(&interceptor, &table, "123-45-6789");
    assert_eq!(
        result,
        QueryResult::Rows(vec![
            json!({"id": 1, "ssn": "123-45-6789"}),
            json!({"id": 3, "ssn": "123-45-6789"}),
        ])
    );

    assert_eq!(find_by_ssn(&interceptor, &table, "000-00-0000"), QueryResult::Rows(vec![]));
}

#[test]
fn test_statement_outside_prefixes_is_untouched() {
    let interceptor = SecurityInterceptor::new(&config(), &HandlerRegistry::default()).unwrap();
    let statement = MappedStatement::new("audit.insert", StatementKind::Insert);
    let bound = BoundStatement::new("INSERT INTO users (id, ssn) VALUES (?, ?)")
        .with_mapping("id")
        .with_mapping("ssn");

    let prepared = interceptor.prepare(&statement, &bound);
    assert!(!prepared.rewritten);
    assert_eq!(prepared.bound, bound);
}

#[test]
fn test_update_with_file_provider() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let provider = FileKeyProvider::init(temp_dir.path()).expect("Failed to initialize keys");
    let vault = VaultHandler::new(provider).unwrap();
    let interceptor =
        SecurityInterceptor::with_handler(&config(), Box::new(vault.clone())).unwrap();

    let statement = MappedStatement::new("user.update", StatementKind::Update);
    let bound = BoundStatement::new("UPDATE users SET ssn = ? WHERE id = ? AND ssn = ?")
        .with_mapping("user.ssn")
        .with_mapping("user.id")
        .with_mapping("oldSsn")
        .with_parameter_object(json!({"user": {"id": 7, "ssn": "new"}, "oldSsn": "old"}));

    let prepared = interceptor.prepare(&statement, &bound);
    assert_eq!(
        prepared.bound.sql,
        "UPDATE users SET ssn_enc = ?, ssn_idx = ? WHERE id = ? AND ssn_idx = ?"
    );
    let values: Vec<Value> = (0..prepared.bound.parameter_mappings.len())
        .map(|i| bound_value(&prepared.bound, i))
        .collect();
    assert_eq!(values.len(), 4);
    assert_eq!(vault.decrypt(values[0].as_str().unwrap()).unwrap(), "new");
    assert_eq!(values[1], json!(vault.index("new").unwrap()));
    assert_eq!(prepared.bound.parameter_mappings[2].property, "user.id");
    assert_eq!(values[3], json!(vault.index("old").unwrap()));
}

#[test]
fn test_config_loaded_from_toml_file() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("sifresql.toml");
    std::fs::write(
        &path,
        format!(
            r#"
enabled = true
overwriteSourceByTarget = true
handlerClass = "vault"
statementIdPrefixes = ["user."]

[handlerOptions]
masterKey = "{}"
pepper = "{}"

[[columnSecurityConfig]]
table = "users"
sourceColumn = "ssn"
targetColumn = "ssn_enc"
indexColumn = "ssn_idx"
"#,
            "33".repeat(32),
            "44".repeat(32)
        ),
    )
    .unwrap();

    let config = SecurityConfig::load(&path).unwrap();
    let interceptor = SecurityInterceptor::new(&config, &HandlerRegistry::default()).unwrap();
    let table = UserTable::default();

    insert(&interceptor, &table, 1, "555");
    assert_eq!(
        find_by_ssn(&interceptor, &table, "555"),
        QueryResult::Rows(vec![json!({"id": 1, "ssn": "555"})])
    );
}

#[test]
fn test_tampered_ciphertext_is_kept() {
    let interceptor = SecurityInterceptor::new(&config(), &HandlerRegistry::default()).unwrap();
    let statement = MappedStatement::new("user.list", StatementKind::Select);
    let prepared = interceptor.prepare(&statement, &BoundStatement::new("SELECT ssn FROM users"));

    let mut result = QueryResult::Rows(vec![json!({"ssn": "k1:AAAA"})]);
    let report = interceptor.fetch(prepared.invocation, &mut result);

    assert_eq!(report.failed, 1);
    assert_eq!(result, QueryResult::Rows(vec![json!({"ssn": "k1:AAAA"})]));
}

proptest! {
    #[test]
    fn prop_index_is_deterministic_and_round_trips(value in ".{0,64}") {
        let provider = StaticKeyProvider::new("k1", vec![5u8; 32]).unwrap()
            .with_pepper(vec![6u8; 32]).unwrap();
        let vault = VaultHandler::new(provider).unwrap();

        prop_assert_eq!(vault.index(&value).unwrap(), vault.index(&value).unwrap());
        let cipher = vault.encrypt(&value).unwrap();
        prop_assert_eq!(vault.decrypt(&cipher).unwrap(), value);
    }
}
