//! Configuration types

use crate::error::{ConfigError, PgDebugError, PgDebugResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// What the capture store does when a new statement arrives and every slot
/// is taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Refuse the new record; existing records are kept
    Reject,
    /// Drop the record with the lowest id to make room
    EvictOldest,
}

impl OverflowPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            OverflowPolicy::Reject => "reject",
            OverflowPolicy::EvictOldest => "evict_oldest",
        }
    }
}

impl fmt::Display for OverflowPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OverflowPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "reject" => Ok(OverflowPolicy::Reject),
            "evict_oldest" | "evict-oldest" | "evict" => Ok(OverflowPolicy::EvictOldest),
            other => Err(ConfigError::InvalidValue {
                field: "overflow_policy".to_string(),
                value: other.to_string(),
                reason: "expected 'reject' or 'evict_oldest'".to_string(),
            }),
        }
    }
}

/// Capture settings for one store instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureConfig {
    /// Maximum number of live statement records
    pub capacity: usize,
    pub overflow_policy: OverflowPolicy,
    /// Per-snapshot byte limit; `None` keeps snapshots whole
    pub max_snapshot_bytes: Option<usize>,
    /// Write the assigned sequence id into the analyzed form's query id
    pub stamp_query_id: bool,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            capacity: Self::DEFAULT_CAPACITY,
            overflow_policy: OverflowPolicy::Reject,
            max_snapshot_bytes: None,
            stamp_query_id: false,
        }
    }
}

impl CaptureConfig {
    pub const DEFAULT_CAPACITY: usize = 128;

    /// Create from environment variables with fallback to defaults.
    ///
    /// Environment variables:
    /// - `PGDEBUG_CAPACITY`: maximum live records (default: 128)
    /// - `PGDEBUG_OVERFLOW_POLICY`: `reject` or `evict_oldest` (default: reject)
    /// - `PGDEBUG_MAX_SNAPSHOT_BYTES`: per-snapshot limit, 0 for none (default: 0)
    /// - `PGDEBUG_STAMP_QUERY_ID`: `true`/`1` to stamp query ids (default: false)
    ///
    /// Unparseable values fall back to the default for that field.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`CaptureConfig::from_env`] but reading through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        Self {
            capacity: lookup("PGDEBUG_CAPACITY")
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.capacity),
            overflow_policy: lookup("PGDEBUG_OVERFLOW_POLICY")
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.overflow_policy),
            max_snapshot_bytes: match lookup("PGDEBUG_MAX_SNAPSHOT_BYTES")
                .and_then(|s| s.parse::<usize>().ok())
            {
                Some(0) => None,
                Some(limit) => Some(limit),
                None => defaults.max_snapshot_bytes,
            },
            stamp_query_id: lookup("PGDEBUG_STAMP_QUERY_ID")
                .map(|s| s == "true" || s == "1")
                .unwrap_or(defaults.stamp_query_id),
        }
    }

    /// Validate the configuration.
    ///
    /// Validates:
    /// - capacity > 0
    /// - max_snapshot_bytes, when set, > 0
    pub fn validate(&self) -> PgDebugResult<()> {
        if self.capacity == 0 {
            return Err(PgDebugError::Config(ConfigError::InvalidValue {
                field: "capacity".to_string(),
                value: self.capacity.to_string(),
                reason: "capacity must be greater than 0".to_string(),
            }));
        }

        if self.max_snapshot_bytes == Some(0) {
            return Err(PgDebugError::Config(ConfigError::InvalidValue {
                field: "max_snapshot_bytes".to_string(),
                value: "0".to_string(),
                reason: "use None for unbounded snapshots".to_string(),
            }));
        }

        Ok(())
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = CaptureConfig::default();
        assert_eq!(config.capacity, 128);
        assert_eq!(config.overflow_policy, OverflowPolicy::Reject);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_lookup_reads_all_fields() {
        let config = CaptureConfig::from_lookup(lookup_from(&[
            ("PGDEBUG_CAPACITY", "16"),
            ("PGDEBUG_OVERFLOW_POLICY", "evict_oldest"),
            ("PGDEBUG_MAX_SNAPSHOT_BYTES", "4096"),
            ("PGDEBUG_STAMP_QUERY_ID", "1"),
        ]));
        assert_eq!(config.capacity, 16);
        assert_eq!(config.overflow_policy, OverflowPolicy::EvictOldest);
        assert_eq!(config.max_snapshot_bytes, Some(4096));
        assert!(config.stamp_query_id);
    }

    #[test]
    fn test_from_lookup_falls_back_on_garbage() {
        let config = CaptureConfig::from_lookup(lookup_from(&[
            ("PGDEBUG_CAPACITY", "lots"),
            ("PGDEBUG_OVERFLOW_POLICY", "drop_everything"),
            ("PGDEBUG_MAX_SNAPSHOT_BYTES", "0"),
        ]));
        assert_eq!(config, CaptureConfig::default());
    }

    #[test]
    fn test_validate_rejects_zero_capacity() {
        let config = CaptureConfig {
            capacity: 0,
            ..CaptureConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert!(matches!(err, PgDebugError::Config(_)));
        assert!(err.to_string().contains("capacity"));
    }

    #[test]
    fn test_validate_rejects_zero_snapshot_limit() {
        let config = CaptureConfig {
            max_snapshot_bytes: Some(0),
            ..CaptureConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_overflow_policy_parse() {
        assert_eq!("Reject".parse::<OverflowPolicy>(), Ok(OverflowPolicy::Reject));
        assert_eq!(
            "evict-oldest".parse::<OverflowPolicy>(),
            Ok(OverflowPolicy::EvictOldest)
        );
        assert!("lru".parse::<OverflowPolicy>().is_err());
    }
}
