use std::sync::Once;
use std::time::Duration;

use sqlx::any::AnyPoolOptions;
use sqlx::AnyPool;

use keel_core::config::DatabaseConfig;
use keel_core::error::{KeelError, Result};

static INSTALL_DRIVERS: Once = Once::new();

/// Database handle used by the ledger.
///
/// Wraps a sqlx `Any` pool so the same ledger runs against PostgreSQL in
/// production and SQLite in tests.
#[derive(Debug, Clone)]
pub struct Database {
    pool: AnyPool,
}

impl Database {
    /// Create a new database connection from configuration.
    pub async fn from_config(config: &DatabaseConfig) -> Result<Self> {
        if config.url.is_empty() {
            return Err(KeelError::Config("database.url is not set".into()));
        }
        install_drivers();

        let pool = AnyPoolOptions::new()
            .max_connections(config.pool_size.max(1))
            .acquire_timeout(Duration::from_secs(config.pool_timeout_secs))
            .connect(&config.url)
            .await
            .map_err(|e| KeelError::Database(format!("Failed to connect: {}", e)))?;

        Ok(Self { pool })
    }

    /// Wrap an existing pool.
    pub fn from_pool(pool: AnyPool) -> Self {
        Self { pool }
    }

    /// Get the underlying pool.
    pub fn pool(&self) -> &AnyPool {
        &self.pool
    }

    /// Check database connectivity.
    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| KeelError::Database(format!("Health check failed: {}", e)))?;
        Ok(())
    }

    /// Whether `table` exists, without creating anything.
    ///
    /// Unquoted identifiers are case-insensitive on both backends, so the
    /// lookup is too.
    pub async fn table_exists(&self, table: &str) -> Result<bool> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| KeelError::Database(format!("Failed to acquire connection: {}", e)))?;

        let sql = if conn.backend_name().eq_ignore_ascii_case("sqlite") {
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = $1 COLLATE NOCASE"
        } else {
            "SELECT COUNT(*) FROM information_schema.tables \
             WHERE table_schema = current_schema() AND table_name = lower($1)"
        };

        let (count,): (i64,) = sqlx::query_as(sql)
            .bind(table)
            .fetch_one(&mut *conn)
            .await
            .map_err(|e| KeelError::Database(format!("Failed to look up table {}: {}", table, e)))?;
        Ok(count > 0)
    }

    /// Close all connections gracefully.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

/// Register the compiled-in sqlx drivers with the `Any` driver.
pub fn install_drivers() {
    INSTALL_DRIVERS.call_once(sqlx::any::install_default_drivers);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_empty_url_rejected() {
        let config = DatabaseConfig::default();
        let result = Database::from_config(&config).await;
        assert!(matches!(result, Err(KeelError::Config(_))));
    }

    #[tokio::test]
    async fn test_sqlite_memory_health_check() {
        let config = DatabaseConfig {
            url: "sqlite::memory:".to_string(),
            pool_size: 1,
            ..Default::default()
        };

        let db = Database::from_config(&config).await.unwrap();
        db.health_check().await.unwrap();
        db.close().await;
    }

    #[tokio::test]
    async fn test_table_exists() {
        let config = DatabaseConfig {
            url: "sqlite::memory:".to_string(),
            pool_size: 1,
            ..Default::default()
        };
        let db = Database::from_config(&config).await.unwrap();

        assert!(!db.table_exists("teams").await.unwrap());
        sqlx::query("CREATE TABLE teams (id INTEGER)")
            .execute(db.pool())
            .await
            .unwrap();
        assert!(db.table_exists("teams").await.unwrap());
    }
}
