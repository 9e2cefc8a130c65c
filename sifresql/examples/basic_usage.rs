//! Basic usage example for `SifreSQL`.

use serde_json::json;
use sifresql::prelude::*;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("SifreSQL Basic Usage Example");
    println!("============================\n");

    let mut config = SecurityConfig::new("vault")
        .with_handler_option("masterKey", "01".repeat(32))
        .with_handler_option("pepper", "02".repeat(32))
        .with_statement_prefix("user.")
        .with_column(ColumnSecurityConfig::new("users", "email", "email_enc", "email_idx"));
    config.overwrite_source_by_target = true;
    let interceptor = SecurityInterceptor::new(&config, &HandlerRegistry::default())?;

    let insert = MappedStatement::new("user.insert", StatementKind::Insert);
    let bound = BoundStatement::new("INSERT INTO users (id, email) VALUES (?, ?)")
        .with_mapping("id")
        .with_mapping("email")
        .with_parameter_object(json!({"id": 1, "email": "alice@example.com"}));
    let prepared = interceptor.prepare(&insert, &bound);
    println!("INSERT rewritten to:\n  {}", prepared.bound.sql);
    for mapping in &prepared.bound.parameter_mappings {
        let value = prepared.bound.additional_parameters.get(&mapping.property);
        println!("  {} = {}", mapping.property, value.unwrap_or(&json!("<from parameter object>")));
    }

    let select = MappedStatement::new("user.findByEmail", StatementKind::Select);
    let bound = BoundStatement::new("SELECT id, email FROM users WHERE email = ?")
        .with_mapping("email")
        .with_parameter_object(json!("alice@example.com"));
    let prepared = interceptor.prepare(&select, &bound);
    println!("\nSELECT rewritten to:\n  {}", prepared.bound.sql);

    // Pretend the database returned the row written above.
    let stored = VaultHandler::new(
        StaticKeyProvider::from_hex("k1", &"01".repeat(32))?.with_pepper(vec![2u8; 32])?,
    )?
    .encrypt("alice@example.com")?;
    let mut result = QueryResult::Rows(vec![json!({"id": 1, "email": stored})]);
    let report = interceptor.fetch(prepared.invocation, &mut result);

    println!("\nDecrypted {} value(s): {result:?}", report.decrypted);
    Ok(())
}
