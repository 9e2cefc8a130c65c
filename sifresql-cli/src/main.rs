//! `SifreSQL` CLI tool for key management and statement dry runs.

#![warn(clippy::pedantic, clippy::nursery)]

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use sifresql::prelude::*;
use sifresql_key_file::FileKeyProvider;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "sifresql")]
#[command(about = "SifreSQL searchable encryption CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a key directory with a fresh key and pepper
    Keygen {
        /// Output directory for keys
        #[arg(short, long, default_value = "./keys")]
        output: PathBuf,
    },
    /// Add a new current key to a key directory
    Rotate {
        /// Key directory created by `keygen`
        #[arg(long, default_value = "./keys")]
        key_dir: PathBuf,
    },
    /// Show how a statement is rewritten, without executing it
    Rewrite {
        /// Security configuration file (.toml or .json)
        #[arg(short, long)]
        config: PathBuf,
        /// Statement id, matched against `statementIdPrefixes`
        #[arg(long)]
        statement_id: String,
        /// insert, update, select, delete or unknown
        #[arg(long, default_value = "select")]
        kind: StatementKind,
        /// SQL with `?` placeholders
        #[arg(long)]
        sql: String,
        /// Property bound by each placeholder, in order
        #[arg(long = "mapping", value_delimiter = ',')]
        mappings: Vec<String>,
        /// Parameter object as JSON
        #[arg(long, default_value = "{}")]
        params: String,
        /// Result map entries as `column=property`
        #[arg(long = "result-map", value_delimiter = ',')]
        result_map: Vec<String>,
    },
    /// Decrypt JSON rows as the interceptor would after a select
    Decrypt {
        /// Security configuration file (.toml or .json)
        #[arg(short, long)]
        config: PathBuf,
        /// JSON array of row objects
        #[arg(long)]
        rows: String,
        /// Encrypted properties as `alias=property`
        #[arg(long, value_delimiter = ',', required = true)]
        columns: Vec<String>,
    },
}

fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Keygen { output } => {
            let provider = FileKeyProvider::init(&output)
                .with_context(|| format!("failed to initialize {}", output.display()))?;
            let key_id = provider.current_key_id()?;
            println!("Initialized key directory {} with key {key_id}", output.display());
        }
        Commands::Rotate { key_dir } => {
            let provider = FileKeyProvider::new(&key_dir)?;
            let key_id = provider.rotate()?;
            println!("Current key is now {key_id}");
        }
        Commands::Rewrite { config, statement_id, kind, sql, mappings, params, result_map } => {
            let interceptor = load_interceptor(&config)?;
            let mut map = ResultMap::new("cli");
            for (column, property) in pairs(&result_map)? {
                map = map.with_mapping(column, property);
            }
            let statement = MappedStatement::new(statement_id, kind).with_result_map(map);
            let parameter_object: Value =
                serde_json::from_str(&params).context("--params is not valid JSON")?;
            let bound = mappings
                .iter()
                .fold(BoundStatement::new(sql), |bound, property| bound.with_mapping(property))
                .with_parameter_object(parameter_object);

            let prepared = interceptor.prepare(&statement, &bound);
            let output = json!({
                "rewritten": prepared.rewritten,
                "sql": prepared.bound.sql,
                "parameters": prepared
                    .bound
                    .parameter_mappings
                    .iter()
                    .map(|m| m.property.as_str())
                    .collect::<Vec<_>>(),
                "additionalParameters": prepared.bound.additional_parameters,
                "decrypt": prepared
                    .invocation
                    .column_properties()
                    .iter()
                    .map(|(alias, property)| (alias.to_string(), Value::from(property)))
                    .collect::<serde_json::Map<_, _>>(),
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        Commands::Decrypt { config, rows, columns } => {
            let interceptor = load_interceptor(&config)?;
            let rows: Vec<Value> =
                serde_json::from_str(&rows).context("--rows must be a JSON array")?;
            let mut properties = ColumnPropertyMap::new();
            for (alias, property) in pairs(&columns)? {
                properties.insert(alias, property);
            }

            let mut result = QueryResult::Rows(rows);
            let report = interceptor.fetch(Invocation::new("cli.decrypt", properties), &mut result);
            if let QueryResult::Rows(rows) = result {
                println!("{}", serde_json::to_string_pretty(&rows)?);
            }
            if report.failed > 0 {
                bail!("{} value(s) could not be decrypted", report.failed);
            }
        }
    }

    Ok(())
}

fn load_interceptor(path: &Path) -> Result<SecurityInterceptor> {
    let config = SecurityConfig::load(path)
        .with_context(|| format!("failed to load {}", path.display()))?;
    let mut registry = HandlerRegistry::default();
    sifresql_key_file::register(&mut registry);
    let interceptor = SecurityInterceptor::new(&config, &registry)?;
    if !interceptor.is_enabled() {
        bail!("{} has encryption disabled", path.display());
    }
    Ok(interceptor)
}

fn pairs(entries: &[String]) -> Result<Vec<(&str, &str)>> {
    entries
        .iter()
        .map(|entry| {
            entry
                .split_once('=')
                .map(|(left, right)| (left.trim(), right.trim()))
                .with_context(|| format!("expected `name=property`, got `{entry}`"))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pairs() {
        let entries = vec!["ssn=userSsn".to_string(), " email = email ".to_string()];
        assert_eq!(pairs(&entries).unwrap(), vec![("ssn", "userSsn"), ("email", "email")]);
        assert!(pairs(&["ssn".to_string()]).is_err());
    }

    #[test]
    fn test_cli_parses_rewrite() {
        let cli = Cli::try_parse_from([
            "sifresql",
            "rewrite",
            "--config",
            "sifresql.toml",
            "--statement-id",
            "user.find",
            "--kind",
            "SELECT",
            "--sql",
            "SELECT ssn FROM users WHERE id = ?",
            "--mapping",
            "id",
        ])
        .unwrap();

        let Commands::Rewrite { kind, mappings, .. } = cli.command else {
            panic!("expected rewrite");
        };
        assert_eq!(kind, StatementKind::Select);
        assert_eq!(mappings, vec!["id".to_string()]);
    }

    #[test]
    fn test_load_interceptor_with_key_directory() {
        let dir = tempfile::TempDir::new().unwrap();
        let keys = dir.path().join("keys");
        FileKeyProvider::init(&keys).unwrap();
        let config = dir.path().join("sifresql.json");
        let body = json!({
            "enabled": true,
            "handlerClass": "vault-file",
            "handlerOptions": {"keyDir": keys.display().to_string()},
            "statementIdPrefixes": ["user."],
            "columnSecurityConfig": [
                {
                    "table": "users",
                    "sourceColumn": "ssn",
                    "targetColumn": "ssn_enc",
                    "indexColumn": "ssn_idx"
                }
            ]
        });
        std::fs::write(&config, body.to_string()).unwrap();

        assert!(load_interceptor(&config).unwrap().is_enabled());
    }
}
