use std::collections::BTreeMap;

use tracing::debug;

use crate::error::{KeelError, Result};
use crate::unit::MigrationUnit;
use crate::version::Version;

/// Every migration unit known to the program, ordered by version.
///
/// Built once at startup, then shared read-only with the ledger. Insertion
/// order is irrelevant; application order always follows [`Version`].
#[derive(Debug, Clone, Default)]
pub struct MigrationRegistry {
    units: BTreeMap<Version, MigrationUnit>,
}

impl MigrationRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            units: BTreeMap::new(),
        }
    }

    /// Build a registry from a static list of units.
    ///
    /// Fails on the first version that appears twice.
    pub fn from_units(units: impl IntoIterator<Item = MigrationUnit>) -> Result<Self> {
        let mut registry = Self::new();
        for unit in units {
            registry.register(unit)?;
        }
        debug!("Registered {} migration units", registry.len());
        Ok(registry)
    }

    /// Register a migration unit.
    ///
    /// A version can only be registered once; a second registration is an
    /// authoring defect and is rejected with [`KeelError::DuplicateVersion`].
    pub fn register(&mut self, unit: MigrationUnit) -> Result<()> {
        let version = unit.version();
        if self.units.contains_key(&version) {
            return Err(KeelError::DuplicateVersion(version));
        }
        self.units.insert(version, unit);
        Ok(())
    }

    /// Builder-style variant of [`register`](Self::register).
    pub fn with(mut self, unit: MigrationUnit) -> Result<Self> {
        self.register(unit)?;
        Ok(self)
    }

    /// Check that every version is a `YYYYMMDDhhmmss` timestamp.
    pub fn validate_timestamps(&self) -> Result<()> {
        let invalid: Vec<String> = self
            .units
            .keys()
            .filter(|v| !v.is_timestamp())
            .map(|v| v.to_string())
            .collect();

        if invalid.is_empty() {
            Ok(())
        } else {
            Err(KeelError::InvalidVersion(format!(
                "not a YYYYMMDDhhmmss timestamp: {}",
                invalid.join(", ")
            )))
        }
    }

    /// All units in ascending version order.
    pub fn all(&self) -> impl Iterator<Item = &MigrationUnit> + '_ {
        self.units.values()
    }

    /// All registered versions in ascending order.
    pub fn versions(&self) -> impl Iterator<Item = Version> + '_ {
        self.units.keys().copied()
    }

    /// Get a unit by version.
    pub fn get(&self, version: Version) -> Option<&MigrationUnit> {
        self.units.get(&version)
    }

    /// Check whether a version is registered.
    pub fn contains(&self, version: Version) -> bool {
        self.units.contains_key(&version)
    }

    /// Highest registered version.
    pub fn latest(&self) -> Option<Version> {
        self.units.keys().next_back().copied()
    }

    /// Get the number of registered units.
    pub fn len(&self) -> usize {
        self.units.len()
    }

    /// Check if the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }
}
