pub mod config;
pub mod error;
pub mod registry;
pub mod sql;
pub mod status;
pub mod unit;
pub mod version;

pub use config::{DatabaseConfig, KeelConfig, LedgerConfig};
pub use error::{KeelError, Result};
pub use registry::MigrationRegistry;
pub use status::{AppliedMigration, MigrationRecord, MigrationStatus, StatusReport};
pub use unit::{MigrationFn, MigrationUnit};
pub use version::Version;
