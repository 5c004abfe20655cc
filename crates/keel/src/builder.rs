use std::path::PathBuf;
use std::sync::Arc;

use tracing::debug;

use keel_core::config::{KeelConfig, LedgerConfig};
use keel_core::error::{KeelError, Result};
use keel_core::registry::MigrationRegistry;
use keel_core::unit::MigrationUnit;
use keel_runtime::{load_migrations_from_dir, Database, Ledger};

/// Builder assembling a [`Ledger`] from configuration and migrations.
pub struct KeelBuilder {
    config: Option<KeelConfig>,
    migrations_dir: Option<PathBuf>,
    units: Vec<MigrationUnit>,
    require_timestamps: bool,
    owner: Option<String>,
}

impl KeelBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self {
            config: None,
            migrations_dir: None,
            units: Vec::new(),
            require_timestamps: false,
            owner: None,
        }
    }

    /// Set the configuration.
    pub fn config(mut self, config: KeelConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Load SQL migrations from a directory.
    ///
    /// Files should be named like:
    /// - `20230112115726_create_teams.up.sql`
    /// - `20230112115726_create_teams.down.sql`
    pub fn migrations_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.migrations_dir = Some(path.into());
        self
    }

    /// Add a migration programmatically.
    pub fn migration(mut self, unit: MigrationUnit) -> Self {
        self.units.push(unit);
        self
    }

    /// Add several migrations programmatically.
    pub fn migrations(mut self, units: impl IntoIterator<Item = MigrationUnit>) -> Self {
        self.units.extend(units);
        self
    }

    /// Reject versions that are not `YYYYMMDDhhmmss` timestamps.
    pub fn require_timestamps(mut self) -> Self {
        self.require_timestamps = true;
        self
    }

    /// Set the lock owner id, e.g. the hostname.
    pub fn owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    /// Build the registry from the directory and programmatic units.
    pub fn registry(&self) -> Result<MigrationRegistry> {
        let mut units = match &self.migrations_dir {
            Some(dir) => load_migrations_from_dir(dir)?,
            None => Vec::new(),
        };
        units.extend(self.units.iter().cloned());

        let registry = MigrationRegistry::from_units(units)?;
        if self.require_timestamps {
            registry.validate_timestamps()?;
        }
        debug!("Registered {} migrations", registry.len());
        Ok(registry)
    }

    /// Connect to the configured database and build the ledger.
    pub async fn connect(self) -> Result<Ledger> {
        let config = self
            .config
            .as_ref()
            .ok_or_else(|| KeelError::Config("Configuration is required".to_string()))?;

        // Validate the registry before opening any connection.
        let registry = self.registry()?;
        let db = Database::from_config(&config.database).await?;
        self.finish(db, registry)
    }

    /// Build the ledger over an existing database handle.
    pub fn build(self, db: Database) -> Result<Ledger> {
        let registry = self.registry()?;
        self.finish(db, registry)
    }

    fn finish(self, db: Database, registry: MigrationRegistry) -> Result<Ledger> {
        let ledger_config = self
            .config
            .map(|c| c.ledger)
            .unwrap_or_else(LedgerConfig::default);

        let ledger = Ledger::new(db, Arc::new(registry), ledger_config)?;
        Ok(match self.owner {
            Some(owner) => ledger.with_owner(owner),
            None => ledger,
        })
    }
}

impl Default for KeelBuilder {
    fn default() -> Self {
        Self::new()
    }
}
