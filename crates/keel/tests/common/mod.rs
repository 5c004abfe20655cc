#![allow(dead_code)]

use std::sync::Once;

use chrono::Utc;
use tracing_subscriber::EnvFilter;

use keel::prelude::*;

static INIT_TRACING: Once = Once::new();

/// Route ledger logs to the test output. Set `RUST_LOG` to see them.
pub fn init_tracing() {
    INIT_TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
            )
            .with_test_writer()
            .try_init();
    });
}

/// Fresh in-memory SQLite database. A single connection keeps every query
/// on the same database.
pub async fn memory_db() -> Database {
    init_tracing();
    let config = DatabaseConfig {
        url: "sqlite::memory:".to_string(),
        pool_size: 1,
        ..Default::default()
    };
    Database::from_config(&config).await.unwrap()
}

pub async fn table_exists(db: &Database, name: &str) -> bool {
    let row: Option<(String,)> =
        sqlx::query_as("SELECT name FROM sqlite_master WHERE type = 'table' AND name = $1")
            .bind(name)
            .fetch_optional(db.pool())
            .await
            .unwrap();
    row.is_some()
}

pub async fn column_exists(db: &Database, table: &str, column: &str) -> bool {
    let (count,): (i64,) = sqlx::query_as(&format!(
        "SELECT COUNT(*) FROM pragma_table_info('{}') WHERE name = $1",
        table
    ))
    .bind(column)
    .fetch_one(db.pool())
    .await
    .unwrap();
    count > 0
}

/// Write a ledger row directly, as another build of the program would.
pub async fn insert_ledger_row(db: &Database, table: &str, version: i64, offset_ms: i64) {
    sqlx::query(&format!(
        "INSERT INTO {} (version, name, applied_at) VALUES ($1, $2, $3)",
        table
    ))
    .bind(version)
    .bind("from_elsewhere")
    .bind(Utc::now().timestamp_millis() + offset_ms)
    .execute(db.pool())
    .await
    .unwrap();
}

pub async fn applied_versions(ledger: &Ledger) -> Vec<i64> {
    ledger
        .applied()
        .await
        .unwrap()
        .into_iter()
        .map(|m| m.version.as_i64())
        .collect()
}

pub fn versions(values: &[i64]) -> Vec<Version> {
    values.iter().copied().map(Version::new).collect()
}
