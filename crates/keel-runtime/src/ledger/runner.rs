use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Utc;
use sqlx::{Any, AnyConnection, Transaction};
use tracing::{debug, info, warn};

use keel_core::config::{KeelConfig, LedgerConfig};
use keel_core::error::{KeelError, Result};
use keel_core::registry::MigrationRegistry;
use keel_core::status::{AppliedMigration, MigrationStatus, StatusReport};
use keel_core::unit::MigrationUnit;
use keel_core::version::Version;

use super::lock::{millis_to_datetime, LedgerLock, LockOwner};
use crate::db::Database;

/// Applies and reverts registered units against one ledger table.
///
/// Every unit runs in its own transaction together with the write to the
/// ledger table, so a unit is recorded if and only if its body committed.
/// Runs are serialized across processes by a [`LedgerLock`].
#[derive(Debug, Clone)]
pub struct Ledger {
    db: Database,
    registry: Arc<MigrationRegistry>,
    config: LedgerConfig,
    lock: LedgerLock,
}

impl Ledger {
    /// Create a ledger over `db` for the units in `registry`.
    pub fn new(db: Database, registry: Arc<MigrationRegistry>, config: LedgerConfig) -> Result<Self> {
        config.validate()?;
        let lock = Self::build_lock(&db, &config, LockOwner::new());
        Ok(Self {
            db,
            registry,
            config,
            lock,
        })
    }

    /// Connect using `config` and create a ledger for `registry`.
    pub async fn from_config(config: &KeelConfig, registry: Arc<MigrationRegistry>) -> Result<Self> {
        let db = Database::from_config(&config.database).await?;
        Self::new(db, registry, config.ledger.clone())
    }

    /// Use a fixed lock owner id instead of a random one.
    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.lock = Self::build_lock(&self.db, &self.config, LockOwner::named(owner));
        self
    }

    fn build_lock(db: &Database, config: &LedgerConfig, owner: LockOwner) -> LedgerLock {
        LedgerLock::new(
            db.pool().clone(),
            config.lock_table.clone(),
            config.lock_name(),
            owner,
            config.lock_ttl(),
        )
    }

    pub fn registry(&self) -> &Arc<MigrationRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    pub fn lock(&self) -> &LedgerLock {
        &self.lock
    }

    /// Create the ledger and lock tables if they do not exist.
    pub async fn ensure_tables(&self) -> Result<()> {
        let sql = format!(
            "CREATE TABLE IF NOT EXISTS {} (
                version BIGINT PRIMARY KEY,
                name VARCHAR(255) NOT NULL,
                applied_at BIGINT NOT NULL
            )",
            self.config.table
        );
        sqlx::query(&sql)
            .execute(self.db.pool())
            .await
            .map_err(|e| KeelError::Database(format!("Failed to create migrations table: {}", e)))?;

        self.lock.ensure_table().await
    }

    /// Apply every pending unit up to and including `target`.
    ///
    /// Without a target all registered units are considered. Units are
    /// applied in ascending version order, each in its own transaction; the
    /// first failure stops the run with [`KeelError::ApplyFailed`] and later
    /// units are not attempted. Returns the versions applied by this call.
    ///
    /// The lock lease is renewed between units, not while one runs.
    pub async fn migrate_up(&self, target: Option<Version>) -> Result<Vec<Version>> {
        self.ensure_tables().await?;
        self.lock.with_lock(|| self.migrate_up_locked(target)).await
    }

    async fn migrate_up_locked(&self, target: Option<Version>) -> Result<Vec<Version>> {
        let applied = self.applied_versions().await?;
        debug!("Already applied migrations: {:?}", applied);

        let Some(target) = target.or_else(|| self.registry.latest()) else {
            debug!("No migrations registered");
            return Ok(Vec::new());
        };

        let pending: Vec<&MigrationUnit> = self
            .registry
            .all()
            .filter(|unit| unit.version() <= target && !applied.contains(&unit.version()))
            .collect();

        if pending.is_empty() {
            info!(table = %self.config.table, "Migrations are up to date");
            return Ok(Vec::new());
        }

        let mut done = Vec::with_capacity(pending.len());
        for unit in pending {
            self.apply_unit(unit)
                .await
                .map_err(|e| KeelError::ApplyFailed {
                    version: unit.version(),
                    source: Box::new(e),
                })?;
            done.push(unit.version());
            self.lock.refresh().await?;
        }

        info!(table = %self.config.table, count = done.len(), "Applied migrations");
        Ok(done)
    }

    async fn apply_unit(&self, unit: &MigrationUnit) -> Result<()> {
        info!("Applying migration {} ({})", unit.version(), unit.name());

        let mut tx = self.db.pool().begin().await.map_err(|e| {
            KeelError::Database(format!("Failed to begin transaction: {}", e))
        })?;

        if let Err(e) = unit.apply(&mut *tx).await {
            rollback(tx, unit.version()).await;
            return Err(e);
        }
        if let Err(e) = self.insert_record(&mut *tx, unit).await {
            rollback(tx, unit.version()).await;
            return Err(e);
        }

        tx.commit()
            .await
            .map_err(|e| KeelError::Database(format!("Failed to commit migration: {}", e)))?;

        info!("Migration applied: {}", unit.version());
        Ok(())
    }

    async fn insert_record(&self, conn: &mut AnyConnection, unit: &MigrationUnit) -> Result<()> {
        sqlx::query(&format!(
            "INSERT INTO {} (version, name, applied_at) VALUES ($1, $2, $3)",
            self.config.table
        ))
        .bind(unit.version().as_i64())
        .bind(unit.name())
        .bind(Utc::now().timestamp_millis())
        .execute(&mut *conn)
        .await
        .map_err(|e| KeelError::Database(format!("Failed to record migration: {}", e)))?;
        Ok(())
    }

    /// Revert the `steps` most recently applied units.
    ///
    /// Units are reverted newest first, ordered by when they were applied
    /// and then by version. Forward-only units lose their record without
    /// running anything. This is meant for development and tests; reverts
    /// generally cannot restore dropped data.
    pub async fn migrate_down(&self, steps: usize) -> Result<Vec<Version>> {
        self.ensure_tables().await?;
        if steps == 0 {
            return Ok(Vec::new());
        }
        self.lock.with_lock(|| self.migrate_down_locked(steps)).await
    }

    async fn migrate_down_locked(&self, steps: usize) -> Result<Vec<Version>> {
        let rows: Vec<(i64,)> = sqlx::query_as(&format!(
            "SELECT version FROM {} ORDER BY applied_at DESC, version DESC",
            self.config.table
        ))
        .fetch_all(self.db.pool())
        .await
        .map_err(|e| KeelError::Database(format!("Failed to get applied migrations: {}", e)))?;

        // Resolve every unit before touching the database.
        let units = rows
            .into_iter()
            .take(steps)
            .map(|(version,)| {
                let version = Version::new(version);
                self.registry
                    .get(version)
                    .ok_or(KeelError::UnknownVersion(version))
            })
            .collect::<Result<Vec<_>>>()?;

        if units.is_empty() {
            info!(table = %self.config.table, "Nothing to revert");
            return Ok(Vec::new());
        }

        let mut done = Vec::with_capacity(units.len());
        for unit in units {
            self.revert_unit(unit)
                .await
                .map_err(|e| KeelError::RevertFailed {
                    version: unit.version(),
                    source: Box::new(e),
                })?;
            done.push(unit.version());
            self.lock.refresh().await?;
        }

        info!(table = %self.config.table, count = done.len(), "Reverted migrations");
        Ok(done)
    }

    async fn revert_unit(&self, unit: &MigrationUnit) -> Result<()> {
        if unit.is_reversible() {
            info!("Reverting migration {} ({})", unit.version(), unit.name());
        } else {
            warn!(
                "Migration {} ({}) has no revert body, removing its record only",
                unit.version(),
                unit.name()
            );
        }

        let mut tx = self.db.pool().begin().await.map_err(|e| {
            KeelError::Database(format!("Failed to begin transaction: {}", e))
        })?;

        if let Err(e) = unit.revert(&mut *tx).await {
            rollback(tx, unit.version()).await;
            return Err(e);
        }
        if let Err(e) = self.delete_record(&mut *tx, unit.version()).await {
            rollback(tx, unit.version()).await;
            return Err(e);
        }

        tx.commit()
            .await
            .map_err(|e| KeelError::Database(format!("Failed to commit revert: {}", e)))?;

        info!("Migration reverted: {}", unit.version());
        Ok(())
    }

    async fn delete_record(&self, conn: &mut AnyConnection, version: Version) -> Result<()> {
        sqlx::query(&format!("DELETE FROM {} WHERE version = $1", self.config.table))
            .bind(version.as_i64())
            .execute(&mut *conn)
            .await
            .map_err(|e| KeelError::Database(format!("Failed to remove migration record: {}", e)))?;
        Ok(())
    }

    /// Applied ledger rows in ascending version order.
    ///
    /// Read-only: a database whose ledger table was never created reports
    /// no applied rows.
    pub async fn applied(&self) -> Result<Vec<AppliedMigration>> {
        if !self.db.table_exists(&self.config.table).await? {
            return Ok(Vec::new());
        }

        let rows: Vec<(i64, String, i64)> = sqlx::query_as(&format!(
            "SELECT version, name, applied_at FROM {} ORDER BY version",
            self.config.table
        ))
        .fetch_all(self.db.pool())
        .await
        .map_err(|e| KeelError::Database(format!("Failed to get applied migrations: {}", e)))?;

        Ok(rows
            .into_iter()
            .map(|(version, name, applied_at)| AppliedMigration {
                version: Version::new(version),
                name,
                applied_at: millis_to_datetime(applied_at),
            })
            .collect())
    }

    async fn applied_versions(&self) -> Result<BTreeSet<Version>> {
        let rows: Vec<(i64,)> = sqlx::query_as(&format!("SELECT version FROM {}", self.config.table))
            .fetch_all(self.db.pool())
            .await
            .map_err(|e| {
                KeelError::Database(format!("Failed to get applied migrations: {}", e))
            })?;

        Ok(rows.into_iter().map(|(v,)| Version::new(v)).collect())
    }

    /// Per-unit status of every registered unit.
    ///
    /// The ledger is read once; the report can be iterated any number of
    /// times without touching the database again.
    pub async fn status(&self) -> Result<StatusReport> {
        let applied = self.applied().await?;
        Ok(StatusReport::new(self.registry.clone(), applied))
    }

    /// Compare registered and applied versions.
    pub async fn check(&self) -> Result<MigrationStatus> {
        let applied = self.applied().await?;
        let status = MigrationStatus::compare(
            self.registry.versions(),
            applied.iter().map(|m| m.version),
            &self.config.known_unknowns(),
        );
        debug!(table = %self.config.table, ?status, "Checked migration status");
        Ok(status)
    }
}

async fn rollback(tx: Transaction<'static, Any>, version: Version) {
    if let Err(e) = tx.rollback().await {
        warn!("Failed to roll back migration {}: {}", version, e);
    }
}
