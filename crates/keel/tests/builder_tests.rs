mod common;

use std::fs;

use keel::prelude::*;
use tempfile::TempDir;

use common::{applied_versions, column_exists, memory_db, table_exists, versions};

fn write_migrations(dir: &TempDir) {
    fs::write(
        dir.path().join("20230112115726_create_teams.up.sql"),
        "-- teams owned by a user\nCREATE TABLE teams (id INTEGER PRIMARY KEY, name TEXT NOT NULL);",
    )
    .unwrap();
    fs::write(
        dir.path().join("20230112115726_create_teams.down.sql"),
        "DROP TABLE teams;",
    )
    .unwrap();
    fs::write(
        dir.path().join("20230113090000_add_self_service.up.sql"),
        "ALTER TABLE teams ADD COLUMN self_service BOOLEAN NOT NULL DEFAULT FALSE;\n\
         CREATE INDEX idx_teams_self_service ON teams (self_service);",
    )
    .unwrap();
    fs::write(dir.path().join("README.md"), "not a migration").unwrap();
}

#[tokio::test]
async fn test_sql_directory_end_to_end() {
    let dir = TempDir::new().unwrap();
    write_migrations(&dir);

    let db = memory_db().await;
    let ledger = KeelBuilder::new()
        .migrations_dir(dir.path())
        .require_timestamps()
        .owner("test-node")
        .build(db.clone())
        .unwrap();

    let applied = ledger.migrate_up(None).await.unwrap();
    assert_eq!(applied, versions(&[20230112115726, 20230113090000]));
    assert!(column_exists(&db, "teams", "self_service").await);

    let records: Vec<MigrationRecord> = ledger.status().await.unwrap().iter().collect();
    assert_eq!(records[0].name, "create_teams");
    assert_eq!(records[1].name, "add_self_service");

    // The second unit has no down file, so reverting it only drops the record.
    ledger.migrate_down(1).await.unwrap();
    assert!(column_exists(&db, "teams", "self_service").await);
    assert_eq!(applied_versions(&ledger).await, vec![20230112115726]);

    ledger.migrate_down(1).await.unwrap();
    assert!(!table_exists(&db, "teams").await);
}

#[tokio::test]
async fn test_connect_from_toml_config() {
    common::init_tracing();
    let config = KeelConfig::parse_toml(
        r#"
[database]
url = "sqlite::memory:"
pool_size = 1

[ledger]
table = "data_migrations"
lock_ttl_secs = 30
"#,
    )
    .unwrap();

    let ledger = KeelBuilder::new()
        .config(config)
        .migration(MigrationUnit::sql(
            Version::new(1),
            "create_flags",
            "CREATE TABLE flags (name TEXT PRIMARY KEY)",
        ))
        .connect()
        .await
        .unwrap();

    assert_eq!(ledger.config().table, "data_migrations");
    assert_eq!(ledger.migrate_up(None).await.unwrap(), versions(&[1]));
    assert_eq!(ledger.check().await.unwrap(), MigrationStatus::AllMigrationsCompleted);
}

#[tokio::test]
async fn test_builder_rejects_non_timestamp_files() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("1_first.up.sql"), "SELECT 1;").unwrap();

    let result = KeelBuilder::new()
        .migrations_dir(dir.path())
        .require_timestamps()
        .build(memory_db().await);
    assert!(matches!(result, Err(KeelError::InvalidVersion(_))));
}
