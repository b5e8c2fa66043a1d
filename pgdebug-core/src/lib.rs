//! PGDEBUG Core - Statement Capture Types
//!
//! Pure data structures shared by every pgdebug crate. The capture store,
//! the interceptor chain and the PostgreSQL extension all depend on this.
//! This crate contains ONLY data types, configuration and errors.

pub mod config;
pub mod error;
pub mod record;
pub mod snapshot;

pub use config::{CaptureConfig, OverflowPolicy};
pub use error::{
    CaptureError, ConfigError, HookError, PgDebugError, PgDebugResult, QueryError,
};
pub use record::{CaptureStats, RecordUpdate, SnapshotField, StatementRecord};
pub use snapshot::bound_snapshot;

use chrono::{DateTime, Utc};

// ============================================================================
// IDENTITY TYPES
// ============================================================================

/// Per-statement sequence identifier.
///
/// Assigned at parse stage, strictly increasing, never reused.
pub type SequenceId = u32;

/// Reserved id that is never assigned. The query interface treats it as
/// "no filter".
pub const ALL_STATEMENTS: SequenceId = 0;

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

/// Current time as a [`Timestamp`].
pub fn now() -> Timestamp {
    Utc::now()
}
