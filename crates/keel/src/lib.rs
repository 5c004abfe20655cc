//! Keel - versioned schema migrations with a transactional ledger.
//!
//! Units are registered once at startup, applied in version order in one
//! transaction each, and recorded in a ledger table so every process sees
//! the same history. A lease-based lock table keeps concurrent deployments
//! from migrating the same database at once.

mod builder;

#[doc(hidden)]
pub use keel_core;
#[doc(hidden)]
pub use keel_runtime;

pub use builder::KeelBuilder;
pub use keel_core::{
    AppliedMigration, KeelConfig, KeelError, LedgerConfig, MigrationRecord, MigrationRegistry,
    MigrationStatus, MigrationUnit, Result, StatusReport, Version,
};
pub use keel_runtime::{load_migrations_from_dir, Database, Ledger, LedgerLock, LockOwner};

/// Prelude module for common imports.
pub mod prelude {
    pub use chrono::{DateTime, Utc};
    pub use futures::future::BoxFuture;
    pub use sqlx::AnyConnection;

    pub use keel_core::config::{DatabaseConfig, KeelConfig, LedgerConfig};
    pub use keel_core::error::{KeelError, Result};
    pub use keel_core::registry::MigrationRegistry;
    pub use keel_core::status::{MigrationRecord, MigrationStatus, StatusReport};
    pub use keel_core::unit::MigrationUnit;
    pub use keel_core::version::Version;
    pub use keel_runtime::{Database, Ledger};

    pub use crate::KeelBuilder;
}
