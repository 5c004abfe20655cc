//! Ledger status model.
//!
//! [`StatusReport`] is the per-unit diagnostic view; [`MigrationStatus`] is
//! the one-line verdict used at startup to decide whether the program can
//! run against the database.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::registry::MigrationRegistry;
use crate::version::Version;

/// A persisted ledger row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppliedMigration {
    pub version: Version,
    pub name: String,
    pub applied_at: DateTime<Utc>,
}

/// Status of a single registered unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationRecord {
    pub version: Version,
    pub name: String,
    pub applied: bool,
    pub applied_at: Option<DateTime<Utc>>,
}

/// Snapshot of the ledger joined with the registry.
///
/// Iteration is lazy and can be restarted any number of times; the database
/// is read once, when the report is produced.
#[derive(Debug, Clone)]
pub struct StatusReport {
    registry: Arc<MigrationRegistry>,
    applied: BTreeMap<Version, AppliedMigration>,
}

impl StatusReport {
    pub fn new(
        registry: Arc<MigrationRegistry>,
        applied: impl IntoIterator<Item = AppliedMigration>,
    ) -> Self {
        Self {
            registry,
            applied: applied.into_iter().map(|m| (m.version, m)).collect(),
        }
    }

    /// One record per registered unit, ascending by version.
    pub fn iter(&self) -> impl Iterator<Item = MigrationRecord> + '_ {
        self.registry.all().map(move |unit| {
            let applied = self.applied.get(&unit.version());
            MigrationRecord {
                version: unit.version(),
                name: unit.name().to_string(),
                applied: applied.is_some(),
                applied_at: applied.map(|m| m.applied_at),
            }
        })
    }

    /// Registered units not yet applied.
    pub fn pending(&self) -> impl Iterator<Item = Version> + '_ {
        self.registry
            .versions()
            .filter(move |v| !self.applied.contains_key(v))
    }

    /// Applied versions that no registered unit knows about.
    pub fn unknown(&self) -> impl Iterator<Item = &AppliedMigration> + '_ {
        self.applied
            .values()
            .filter(move |m| !self.registry.contains(m.version))
    }

    /// Number of applied ledger rows, including unknown ones.
    pub fn applied_count(&self) -> usize {
        self.applied.len()
    }

    /// Whether every registered unit is applied.
    pub fn is_up_to_date(&self) -> bool {
        self.pending().next().is_none()
    }
}

impl<'a> IntoIterator for &'a StatusReport {
    type Item = MigrationRecord;
    type IntoIter = Box<dyn Iterator<Item = MigrationRecord> + 'a>;

    fn into_iter(self) -> Self::IntoIter {
        Box::new(self.iter())
    }
}

/// Overall verdict comparing registered and applied versions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum MigrationStatus {
    /// The ledger is empty; the database was never migrated.
    NoMigrationsCompleted,
    /// Every registered unit is applied and nothing else is.
    AllMigrationsCompleted,
    /// The database carries versions this program does not know, typically
    /// an older build running against a newer database.
    UnknownMigrations { unknown: Vec<Version> },
    /// Some registered units are not applied yet.
    SomeMigrationsCompleted { missing: Vec<Version> },
}

impl MigrationStatus {
    /// Compute the verdict.
    ///
    /// `known_unknowns` lists applied versions to ignore, e.g. a unit whose
    /// version was renumbered after it had already shipped. Unknown versions
    /// take precedence over missing ones.
    pub fn compare(
        registered: impl IntoIterator<Item = Version>,
        applied: impl IntoIterator<Item = Version>,
        known_unknowns: &BTreeSet<Version>,
    ) -> Self {
        let registered: BTreeSet<Version> = registered.into_iter().collect();
        let applied: BTreeSet<Version> = applied.into_iter().collect();

        if applied.is_empty() {
            return Self::NoMigrationsCompleted;
        }

        let unknown: Vec<Version> = applied
            .difference(&registered)
            .filter(|v| !known_unknowns.contains(v))
            .copied()
            .collect();
        if !unknown.is_empty() {
            return Self::UnknownMigrations { unknown };
        }

        let missing: Vec<Version> = registered.difference(&applied).copied().collect();
        if !missing.is_empty() {
            return Self::SomeMigrationsCompleted { missing };
        }

        Self::AllMigrationsCompleted
    }

    /// Whether the program may start against this database.
    ///
    /// Missing migrations are tolerated only when `allow_missing` is set.
    pub fn is_ready(&self, allow_missing: bool) -> bool {
        match self {
            Self::AllMigrationsCompleted => true,
            Self::UnknownMigrations { .. } => true,
            Self::SomeMigrationsCompleted { .. } => allow_missing,
            Self::NoMigrationsCompleted => false,
        }
    }
}
