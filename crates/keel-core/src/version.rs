use std::fmt;
use std::str::FromStr;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::error::KeelError;

const TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";

/// Migration version identifier.
///
/// Versions are usually derived from the authoring timestamp
/// (`20230112115726`), but any non-negative integer is accepted. Ordering is
/// numeric, so `"001"` and `"1"` name the same version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Version(i64);

impl Version {
    /// Create a version from its numeric value.
    pub const fn new(value: i64) -> Self {
        Self(value)
    }

    /// Get the numeric value, as stored in the ledger table.
    pub fn as_i64(&self) -> i64 {
        self.0
    }

    /// Interpret the version as a `YYYYMMDDhhmmss` timestamp.
    pub fn as_timestamp(&self) -> Option<NaiveDateTime> {
        if self.0 < 0 {
            return None;
        }
        let digits = self.0.to_string();
        if digits.len() != 14 {
            return None;
        }
        NaiveDateTime::parse_from_str(&digits, TIMESTAMP_FORMAT).ok()
    }

    /// Whether the version is a well-formed authoring timestamp.
    pub fn is_timestamp(&self) -> bool {
        self.as_timestamp().is_some()
    }
}

impl From<i64> for Version {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Version {
    type Err = KeelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(KeelError::InvalidVersion(format!(
                "'{}' is not a numeric version",
                s
            )));
        }
        s.parse::<i64>()
            .map(Self)
            .map_err(|e| KeelError::InvalidVersion(format!("'{}': {}", s, e)))
    }
}
