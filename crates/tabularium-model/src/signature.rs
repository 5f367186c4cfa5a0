//! Signature dates.
//!
//! A [`SignatureDate`] is a `(user id, timestamp)` pair recording who an
//! operation was validated for and when. Every authenticated call stamps a
//! fresh one, and every replicated mutation carries the stamp of the session
//! that produced it.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A `(user id, timestamp)` pair proving an authentication was validated as
/// of that time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureDate {
    /// The user the signature belongs to. Empty for the unset signature.
    pub id: String,
    /// When the signature was stamped.
    pub date_time: DateTime<Utc>,
}

impl SignatureDate {
    /// Stamp a new signature for `id` at the current instant.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            date_time: Utc::now(),
        }
    }

    /// Build a signature with an explicit timestamp.
    pub fn at(id: impl Into<String>, date_time: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            date_time,
        }
    }

    /// Whether this is the unset signature.
    pub fn is_empty(&self) -> bool {
        self.id.is_empty()
    }
}

impl Default for SignatureDate {
    fn default() -> Self {
        Self {
            id: String::new(),
            date_time: Utc.timestamp_opt(0, 0).single().unwrap_or_default(),
        }
    }
}

impl fmt::Display for SignatureDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.id, self.date_time.to_rfc3339())
    }
}
