//! Stored entry envelope.
//!
//! Every memoized result is written to the backend wrapped in a
//! [`CachedEntry`], which records when it was computed, when it expires, and
//! which dependency generations it was computed against.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::constants::ENTRY_FORMAT_VERSION;
use crate::error::{Result, SmartCacheError};

/// A memoized result as stored in the backend.
///
/// # Format
///
/// ```text
/// {
///   "version": 1,
///   "value": <result as JSON>,
///   "created_at": "2024-01-01T00:00:00Z",
///   "expires_at": "2024-01-01T01:00:00Z" | null,
///   "dependencies": { "<name>": <generation>, ... }
/// }
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CachedEntry {
    /// Envelope format version
    pub version: u8,
    /// The memoized result
    pub value: Value,
    /// When the result was computed
    pub created_at: DateTime<Utc>,
    /// When the entry stops being valid (`None` = never)
    pub expires_at: Option<DateTime<Utc>>,
    /// Dependency generations observed at computation time
    #[serde(default)]
    pub dependencies: BTreeMap<String, u64>,
}

impl CachedEntry {
    /// Wraps a result computed now.
    pub fn new<T: Serialize + ?Sized>(
        value: &T,
        ttl: Option<Duration>,
        dependencies: BTreeMap<String, u64>,
    ) -> Result<Self> {
        Self::new_at(value, ttl, dependencies, Utc::now())
    }

    /// Wraps a result computed at `now`.
    pub fn new_at<T: Serialize + ?Sized>(
        value: &T,
        ttl: Option<Duration>,
        dependencies: BTreeMap<String, u64>,
        now: DateTime<Utc>,
    ) -> Result<Self> {
        let expires_at = match ttl {
            Some(ttl) => {
                let delta = chrono::Duration::from_std(ttl)
                    .map_err(|e| SmartCacheError::ConfigError(format!("TTL out of range: {e}")))?;
                let expires_at = now.checked_add_signed(delta).ok_or_else(|| {
                    SmartCacheError::ConfigError(format!("TTL of {ttl:?} overflows the calendar"))
                })?;
                Some(expires_at)
            }
            None => None,
        };

        Ok(Self {
            version: ENTRY_FORMAT_VERSION,
            value: serde_json::to_value(value)?,
            created_at: now,
            expires_at,
            dependencies,
        })
    }

    /// Returns true once `expires_at` has been reached.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map_or(false, |expires_at| now >= expires_at)
    }

    /// Returns true if any recorded dependency has moved to another generation.
    ///
    /// Dependencies missing from `current` are taken to be at generation 0.
    pub fn is_stale(&self, current: &BTreeMap<String, u64>) -> bool {
        self.dependencies
            .iter()
            .any(|(name, generation)| current.get(name).copied().unwrap_or(0) != *generation)
    }

    /// Returns true if the entry can be served at `now` for the given generations.
    pub fn is_valid(&self, now: DateTime<Utc>, current: &BTreeMap<String, u64>) -> bool {
        !self.is_expired(now) && !self.is_stale(current)
    }

    /// Returns the remaining lifetime at `now`, if the entry expires.
    pub fn remaining_ttl(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.expires_at
            .map(|expires_at| (expires_at - now).to_std().unwrap_or(Duration::ZERO))
    }

    /// Decodes the stored value into `T`.
    pub fn value_as<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(self.value.clone()).map_err(|e| {
            SmartCacheError::CorruptEntry(format!("value does not match the expected type: {e}"))
        })
    }

    /// Serializes the entry for storage.
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Parses stored bytes, rejecting other envelope versions.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let entry: CachedEntry = serde_json::from_slice(bytes)
            .map_err(|e| SmartCacheError::CorruptEntry(e.to_string()))?;

        if entry.version != ENTRY_FORMAT_VERSION {
            return Err(SmartCacheError::VersionMismatch {
                expected: ENTRY_FORMAT_VERSION,
                actual: entry.version,
            });
        }

        Ok(entry)
    }
}
