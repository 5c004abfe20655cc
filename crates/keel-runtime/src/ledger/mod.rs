//! Migration ledger: applies registered units and records them.

mod loader;
mod lock;
mod runner;

pub use loader::load_migrations_from_dir;
pub use lock::{LedgerLock, LockHolder, LockOwner};
pub use runner::Ledger;
