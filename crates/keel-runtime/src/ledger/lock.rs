//! Cross-process migration lock.
//!
//! A row in the lock table marks the ledger as busy. The row carries a lease
//! (`expires_at`) so a crashed holder cannot block migrations forever: an
//! expired row is taken over by the next runner.

use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::AnyPool;
use tracing::{debug, info, warn};
use uuid::Uuid;

use keel_core::error::{KeelError, Result};

/// Lock holder identity, unique per ledger instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LockOwner(String);

impl LockOwner {
    /// Generate a new random owner id.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Use a caller-provided owner id, e.g. a hostname.
    pub fn named(owner: impl Into<String>) -> Self {
        Self(owner.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for LockOwner {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for LockOwner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Current holder of a lock row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockHolder {
    pub owner: String,
    pub expires_at: DateTime<Utc>,
}

/// Lease-based lock stored in a table.
#[derive(Debug, Clone)]
pub struct LedgerLock {
    pool: AnyPool,
    table: String,
    name: String,
    owner: LockOwner,
    ttl: Duration,
}

impl LedgerLock {
    /// Create a lock handle. `table` must already be a validated identifier.
    pub fn new(
        pool: AnyPool,
        table: impl Into<String>,
        name: impl Into<String>,
        owner: LockOwner,
        ttl: Duration,
    ) -> Self {
        Self {
            pool,
            table: table.into(),
            name: name.into(),
            owner,
            ttl,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn owner(&self) -> &LockOwner {
        &self.owner
    }

    /// Create the lock table if it does not exist.
    pub async fn ensure_table(&self) -> Result<()> {
        let sql = format!(
            "CREATE TABLE IF NOT EXISTS {} (
                name VARCHAR(255) PRIMARY KEY,
                owner VARCHAR(255) NOT NULL,
                expires_at BIGINT NOT NULL
            )",
            self.table
        );
        sqlx::query(&sql)
            .execute(&self.pool)
            .await
            .map_err(|e| KeelError::Database(format!("Failed to create lock table: {}", e)))?;
        Ok(())
    }

    /// Try to take the lock without waiting.
    ///
    /// Succeeds when the row is free or its lease has expired. A live row is
    /// never shared, not even with a handle carrying the same owner id, so
    /// two runs from one process are serialized too. Otherwise returns
    /// [`KeelError::LockUnavailable`]; callers decide whether to retry later.
    pub async fn acquire(&self) -> Result<()> {
        // A second pass covers a holder releasing between our statements.
        let mut attempts = 0;
        loop {
            attempts += 1;
            let now = Utc::now();
            let expires_at = self.lease_from(now)?;

            let inserted = sqlx::query(&format!(
                "INSERT INTO {} (name, owner, expires_at) VALUES ($1, $2, $3) ON CONFLICT (name) DO NOTHING",
                self.table
            ))
            .bind(&self.name)
            .bind(self.owner.as_str())
            .bind(expires_at)
            .execute(&self.pool)
            .await
            .map_err(|e| KeelError::Database(format!("Failed to acquire migration lock: {}", e)))?;

            if inserted.rows_affected() == 1 {
                debug!(lock = %self.name, owner = %self.owner, "Migration lock acquired");
                return Ok(());
            }

            // Row exists: take it over only if its lease ran out.
            let taken = sqlx::query(&format!(
                "UPDATE {} SET owner = $1, expires_at = $2 WHERE name = $3 AND expires_at < $4",
                self.table
            ))
            .bind(self.owner.as_str())
            .bind(expires_at)
            .bind(&self.name)
            .bind(now.timestamp_millis())
            .execute(&self.pool)
            .await
            .map_err(|e| KeelError::Database(format!("Failed to acquire migration lock: {}", e)))?;

            if taken.rows_affected() == 1 {
                warn!(lock = %self.name, owner = %self.owner, "Took over expired migration lock");
                return Ok(());
            }

            match self.holder().await? {
                Some(holder) => {
                    return Err(KeelError::LockUnavailable {
                        name: self.name.clone(),
                        owner: holder.owner,
                        expires_at: holder.expires_at,
                    })
                }
                None if attempts >= 2 => {
                    return Err(KeelError::Database(format!(
                        "Migration lock '{}' changed hands while acquiring",
                        self.name
                    )))
                }
                None => continue,
            }
        }
    }

    /// Extend the lease. Fails with [`KeelError::LockLost`] if another owner
    /// took the row over in the meantime.
    pub async fn refresh(&self) -> Result<()> {
        let result = sqlx::query(&format!(
            "UPDATE {} SET expires_at = $1 WHERE name = $2 AND owner = $3",
            self.table
        ))
        .bind(self.lease_from(Utc::now())?)
        .bind(&self.name)
        .bind(self.owner.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| KeelError::Database(format!("Failed to refresh migration lock: {}", e)))?;

        if result.rows_affected() == 0 {
            return Err(KeelError::LockLost {
                name: self.name.clone(),
            });
        }
        Ok(())
    }

    /// Release the lock if we still hold it.
    pub async fn release(&self) -> Result<()> {
        sqlx::query(&format!(
            "DELETE FROM {} WHERE name = $1 AND owner = $2",
            self.table
        ))
        .bind(&self.name)
        .bind(self.owner.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| KeelError::Database(format!("Failed to release migration lock: {}", e)))?;

        debug!(lock = %self.name, "Migration lock released");
        Ok(())
    }

    /// Read the current holder, if any.
    pub async fn holder(&self) -> Result<Option<LockHolder>> {
        let row: Option<(String, i64)> = sqlx::query_as(&format!(
            "SELECT owner, expires_at FROM {} WHERE name = $1",
            self.table
        ))
        .bind(&self.name)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| KeelError::Database(format!("Failed to read migration lock: {}", e)))?;

        Ok(row.map(|(owner, expires_at)| LockHolder {
            owner,
            expires_at: millis_to_datetime(expires_at),
        }))
    }

    /// Run `f` while holding the lock; the lock is released on every path.
    pub async fn with_lock<T, F, Fut>(&self, f: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        self.acquire().await?;
        info!(lock = %self.name, owner = %self.owner, "Holding migration lock");

        let result = f().await;

        if let Err(e) = self.release().await {
            warn!("Failed to release migration lock: {}", e);
        }

        result
    }

    fn lease_from(&self, now: DateTime<Utc>) -> Result<i64> {
        chrono::Duration::from_std(self.ttl)
            .ok()
            .and_then(|ttl| now.checked_add_signed(ttl))
            .map(|expires_at| expires_at.timestamp_millis())
            .ok_or_else(|| {
                KeelError::Config(format!(
                    "Lock lease of {}s is out of range",
                    self.ttl.as_secs()
                ))
            })
    }
}

pub(crate) fn millis_to_datetime(millis: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(millis).unwrap_or_default()
}
