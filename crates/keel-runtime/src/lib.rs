//! Keel runtime: database access, the migration ledger and its lock.

pub mod db;
pub mod ledger;

pub use db::Database;
pub use ledger::{load_migrations_from_dir, Ledger, LedgerLock, LockHolder, LockOwner};
