use thiserror::Error;

use crate::version::Version;

/// Core error type for ledger operations.
#[derive(Error, Debug)]
pub enum KeelError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("SQL error: {0}")]
    Sql(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid migration version: {0}")]
    InvalidVersion(String),

    #[error("Duplicate migration version: {0}")]
    DuplicateVersion(Version),

    #[error("Applied migration {0} is not registered")]
    UnknownVersion(Version),

    #[error("Migration {version} failed to apply: {source}")]
    ApplyFailed {
        version: Version,
        #[source]
        source: Box<KeelError>,
    },

    #[error("Migration {version} failed to revert: {source}")]
    RevertFailed {
        version: Version,
        #[source]
        source: Box<KeelError>,
    },

    #[error("Migration lock '{name}' is held by {owner} until {expires_at}")]
    LockUnavailable {
        name: String,
        owner: String,
        expires_at: chrono::DateTime<chrono::Utc>,
    },

    #[error("Migration lock '{name}' was lost during the run")]
    LockLost { name: String },
}

impl KeelError {
    /// Version of the unit that caused a failed run, if any.
    pub fn failed_version(&self) -> Option<Version> {
        match self {
            Self::ApplyFailed { version, .. } | Self::RevertFailed { version, .. } => {
                Some(*version)
            }
            Self::UnknownVersion(version) | Self::DuplicateVersion(version) => Some(*version),
            _ => None,
        }
    }
}

/// Result type alias using KeelError.
pub type Result<T> = std::result::Result<T, KeelError>;
