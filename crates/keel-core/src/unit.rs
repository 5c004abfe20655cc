use std::fmt;
use std::sync::Arc;

use futures::future::BoxFuture;
use sqlx::AnyConnection;

use crate::error::Result;
use crate::sql::{execute_statements, split_sql_statements};
use crate::version::Version;

/// Body of a migration direction.
///
/// Receives the connection of a transaction opened by the ledger. The body
/// must not commit, roll back or open connections of its own.
pub type MigrationFn =
    Arc<dyn for<'c> Fn(&'c mut AnyConnection) -> BoxFuture<'c, Result<()>> + Send + Sync>;

/// A versioned forward/backward schema change.
#[derive(Clone)]
pub struct MigrationUnit {
    version: Version,
    name: String,
    apply: MigrationFn,
    revert: Option<MigrationFn>,
}

impl MigrationUnit {
    /// Create a forward-only unit from an async body.
    ///
    /// ```ignore
    /// async fn add_self_service(conn: &mut AnyConnection) -> Result<()> {
    ///     sqlx::query("ALTER TABLE teams ADD COLUMN self_service BOOLEAN")
    ///         .execute(conn)
    ///         .await?;
    ///     Ok(())
    /// }
    ///
    /// MigrationUnit::new(Version::new(20230112115726), "add_self_service", |conn| {
    ///     Box::pin(add_self_service(conn))
    /// })
    /// ```
    pub fn new<F>(version: impl Into<Version>, name: impl Into<String>, apply: F) -> Self
    where
        F: for<'c> Fn(&'c mut AnyConnection) -> BoxFuture<'c, Result<()>> + Send + Sync + 'static,
    {
        Self::from_body(version.into(), name.into(), migration_fn(apply))
    }

    /// Create a forward-only unit from a SQL body.
    pub fn sql(version: impl Into<Version>, name: impl Into<String>, up: &str) -> Self {
        Self::from_body(version.into(), name.into(), sql_body(up))
    }

    fn from_body(version: Version, name: String, apply: MigrationFn) -> Self {
        Self {
            version,
            name,
            apply,
            revert: None,
        }
    }

    /// Attach a revert body.
    pub fn with_revert<F>(mut self, revert: F) -> Self
    where
        F: for<'c> Fn(&'c mut AnyConnection) -> BoxFuture<'c, Result<()>> + Send + Sync + 'static,
    {
        self.revert = Some(migration_fn(revert));
        self
    }

    /// Attach a SQL revert body.
    pub fn with_revert_sql(mut self, down: &str) -> Self {
        self.revert = Some(sql_body(down));
        self
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the unit has a revert body.
    ///
    /// Units without one are forward-only; reverting them only removes their
    /// ledger record.
    pub fn is_reversible(&self) -> bool {
        self.revert.is_some()
    }

    /// Run the forward body.
    pub async fn apply(&self, conn: &mut AnyConnection) -> Result<()> {
        (self.apply)(conn).await
    }

    /// Run the revert body. Forward-only units succeed without doing anything.
    pub async fn revert(&self, conn: &mut AnyConnection) -> Result<()> {
        match &self.revert {
            Some(revert) => revert(conn).await,
            None => Ok(()),
        }
    }
}

impl fmt::Debug for MigrationUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MigrationUnit")
            .field("version", &self.version)
            .field("name", &self.name)
            .field("reversible", &self.is_reversible())
            .finish()
    }
}

fn migration_fn<F>(body: F) -> MigrationFn
where
    F: for<'c> Fn(&'c mut AnyConnection) -> BoxFuture<'c, Result<()>> + Send + Sync + 'static,
{
    Arc::new(body)
}

fn sql_body(sql: &str) -> MigrationFn {
    let statements: Arc<[String]> = split_sql_statements(sql).into();
    migration_fn(move |conn| {
        let statements = statements.clone();
        Box::pin(async move { execute_statements(conn, &statements).await })
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn noop(_conn: &mut AnyConnection) -> Result<()> {
        Ok(())
    }

    #[test]
    fn test_new_unit_is_forward_only() {
        let unit = MigrationUnit::new(Version::new(1), "noop", |conn| Box::pin(noop(conn)));
        assert_eq!(unit.version(), Version::new(1));
        assert_eq!(unit.name(), "noop");
        assert!(!unit.is_reversible());
    }

    #[test]
    fn test_sql_unit_with_revert() {
        let unit = MigrationUnit::sql(Version::new(2), "create_t", "CREATE TABLE t (id INTEGER)")
            .with_revert_sql("DROP TABLE t");
        assert!(unit.is_reversible());
        assert!(format!("{:?}", unit).contains("create_t"));
    }
}
