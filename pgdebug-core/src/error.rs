//! Error types for pgdebug operations

use crate::record::SnapshotField;
use crate::SequenceId;
use thiserror::Error;

/// Capture store errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CaptureError {
    #[error("Capture store is full: capacity {capacity} reached")]
    CapacityExceeded { capacity: usize },

    #[error("Statement record not found: {id}")]
    NotFound { id: SequenceId },

    #[error("Statement record already exists: {id}")]
    DuplicateId { id: SequenceId },

    #[error("Invalid sequence id {id}: latest assigned id is {latest}")]
    InvalidSequence { id: SequenceId, latest: SequenceId },

    #[error("Snapshot {field} already set for statement {id}")]
    SnapshotAlreadySet { id: SequenceId, field: SnapshotField },

    #[error("Sequence ids exhausted")]
    SequenceExhausted,

    #[error("Capture store lock poisoned")]
    LockPoisoned,
}

/// Interceptor chain errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum HookError {
    #[error("Interceptor {id} is not installed at {point}")]
    NotInstalled { point: &'static str, id: u64 },
}

/// Query interface errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum QueryError {
    #[error("Set-valued function called in context that cannot accept a set: {reason}")]
    BadCallerContext { reason: String },

    #[error("Invalid statement id filter: {value}")]
    InvalidFilter { value: i64 },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Master error type for all pgdebug errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PgDebugError {
    #[error("Capture error: {0}")]
    Capture(#[from] CaptureError),

    #[error("Hook error: {0}")]
    Hook(#[from] HookError),

    #[error("Query error: {0}")]
    Query(#[from] QueryError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

/// Result type alias for pgdebug operations.
pub type PgDebugResult<T> = Result<T, PgDebugError>;

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capture_error_display_capacity() {
        let err = CaptureError::CapacityExceeded { capacity: 128 };
        let msg = format!("{}", err);
        assert!(msg.contains("full"));
        assert!(msg.contains("128"));
    }

    #[test]
    fn test_capture_error_display_snapshot_already_set() {
        let err = CaptureError::SnapshotAlreadySet {
            id: 7,
            field: SnapshotField::Plan,
        };
        let msg = format!("{}", err);
        assert!(msg.contains("plan"));
        assert!(msg.contains('7'));
    }

    #[test]
    fn test_query_error_display_bad_context() {
        let err = QueryError::BadCallerContext {
            reason: "materialize mode required".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("cannot accept a set"));
        assert!(msg.contains("materialize mode required"));
    }

    #[test]
    fn test_pgdebug_error_from_variants() {
        let capture = PgDebugError::from(CaptureError::LockPoisoned);
        assert!(matches!(capture, PgDebugError::Capture(_)));

        let hook = PgDebugError::from(HookError::NotInstalled {
            point: "planner",
            id: 3,
        });
        assert!(matches!(hook, PgDebugError::Hook(_)));

        let query = PgDebugError::from(QueryError::InvalidFilter { value: -1 });
        assert!(matches!(query, PgDebugError::Query(_)));

        let config = PgDebugError::from(ConfigError::InvalidValue {
            field: "capacity".to_string(),
            value: "0".to_string(),
            reason: "must be positive".to_string(),
        });
        assert!(matches!(config, PgDebugError::Config(_)));
    }
}
