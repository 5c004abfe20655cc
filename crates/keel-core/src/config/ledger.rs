use std::collections::BTreeSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{KeelError, Result};
use crate::version::Version;

/// Longest accepted lock lease: one week.
pub const MAX_LOCK_TTL_SECS: u64 = 7 * 24 * 60 * 60;

/// Ledger configuration.
///
/// Several ledgers can share one database as long as their tables differ,
/// e.g. one for schema changes and one for data backfills.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// Table recording applied versions.
    #[serde(default = "default_table")]
    pub table: String,

    /// Table holding cross-process locks.
    #[serde(default = "default_lock_table")]
    pub lock_table: String,

    /// Lock row name. Defaults to the ledger table name.
    #[serde(default)]
    pub lock_name: Option<String>,

    /// Lock lease in seconds, renewed after every unit.
    ///
    /// The lease is not renewed while a unit runs, so it must exceed the
    /// longest single unit; otherwise another runner may take the lock over
    /// mid-unit.
    #[serde(default = "default_lock_ttl")]
    pub lock_ttl_secs: u64,

    /// Applied versions that are expected to be unknown to this program.
    #[serde(default)]
    pub known_unknown_versions: Vec<i64>,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            table: default_table(),
            lock_table: default_lock_table(),
            lock_name: None,
            lock_ttl_secs: default_lock_ttl(),
            known_unknown_versions: Vec::new(),
        }
    }
}

impl LedgerConfig {
    /// Configuration for a ledger stored in `table`.
    pub fn for_table(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            ..Default::default()
        }
    }

    /// Name of the lock row guarding this ledger.
    pub fn lock_name(&self) -> &str {
        self.lock_name.as_deref().unwrap_or(&self.table)
    }

    pub fn lock_ttl(&self) -> Duration {
        Duration::from_secs(self.lock_ttl_secs)
    }

    pub fn known_unknowns(&self) -> BTreeSet<Version> {
        self.known_unknown_versions
            .iter()
            .copied()
            .map(Version::new)
            .collect()
    }

    /// Table names end up in SQL text, so only plain identifiers are allowed.
    pub fn validate(&self) -> Result<()> {
        for (field, value) in [("table", &self.table), ("lock_table", &self.lock_table)] {
            if !is_identifier(value) {
                return Err(KeelError::Config(format!(
                    "ledger.{} must be a plain SQL identifier, got '{}'",
                    field, value
                )));
            }
        }
        if self.table == self.lock_table {
            return Err(KeelError::Config(
                "ledger.table and ledger.lock_table must differ".into(),
            ));
        }
        if self.lock_ttl_secs == 0 || self.lock_ttl_secs > MAX_LOCK_TTL_SECS {
            return Err(KeelError::Config(format!(
                "ledger.lock_ttl_secs must be between 1 and {}, got {}",
                MAX_LOCK_TTL_SECS, self.lock_ttl_secs
            )));
        }
        Ok(())
    }
}

fn is_identifier(value: &str) -> bool {
    let mut chars = value.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    value.len() <= 63 && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn default_table() -> String {
    "schema_migrations".to_string()
}

fn default_lock_table() -> String {
    "ledger_locks".to_string()
}

fn default_lock_ttl() -> u64 {
    600
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_name_defaults_to_table() {
        let config = LedgerConfig::for_table("migration_status_data");
        assert_eq!(config.lock_name(), "migration_status_data");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_identifier_rules() {
        assert!(is_identifier("schema_migrations"));
        assert!(is_identifier("_t1"));
        assert!(!is_identifier("1table"));
        assert!(!is_identifier("bad-name"));
        assert!(!is_identifier("a b"));
        assert!(!is_identifier(""));
    }

    #[test]
    fn test_validate_rejects_shared_table() {
        let config = LedgerConfig {
            lock_table: "schema_migrations".into(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_ttl() {
        let config = LedgerConfig {
            lock_ttl_secs: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_bounds_ttl() {
        let huge = LedgerConfig {
            lock_ttl_secs: 9_000_000_000_000,
            ..Default::default()
        };
        assert!(matches!(huge.validate(), Err(KeelError::Config(_))));

        let week = LedgerConfig {
            lock_ttl_secs: MAX_LOCK_TTL_SECS,
            ..Default::default()
        };
        assert!(week.validate().is_ok());
    }
}
