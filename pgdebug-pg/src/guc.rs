//! `pg_debug.*` server settings.
//!
//! Read once, when the capture store is created in `_PG_init`, so every
//! setting is postmaster-level: it comes from `postgresql.conf` or the
//! command line and cannot be changed with `SET`. A setting left at its
//! boot value yields to the matching `PGDEBUG_*` environment variable of
//! the server process.

use pgdebug_core::{CaptureConfig, OverflowPolicy};
use pgrx::{GucContext, GucFlags, GucRegistry, GucSetting};

pub static CAPACITY: GucSetting<i32> =
    GucSetting::<i32>::new(CaptureConfig::DEFAULT_CAPACITY as i32);
pub static EVICT_OLDEST: GucSetting<bool> = GucSetting::<bool>::new(false);
pub static MAX_SNAPSHOT_BYTES: GucSetting<i32> = GucSetting::<i32>::new(0);
pub static STAMP_QUERY_ID: GucSetting<bool> = GucSetting::<bool>::new(false);

pub fn register() {
    GucRegistry::define_int_guc(
        c"pg_debug.capacity",
        c"Maximum number of statement records kept per backend.",
        c"Requires a server restart.",
        &CAPACITY,
        1,
        i32::MAX,
        GucContext::Postmaster,
        GucFlags::default(),
    );
    GucRegistry::define_bool_guc(
        c"pg_debug.evict_oldest",
        c"Drop the oldest statement record when the store is full.",
        c"When off, statements arriving at a full store are not captured. Requires a server restart.",
        &EVICT_OLDEST,
        GucContext::Postmaster,
        GucFlags::default(),
    );
    GucRegistry::define_int_guc(
        c"pg_debug.max_snapshot_bytes",
        c"Truncate each captured snapshot to this many bytes (0 keeps them whole).",
        c"Truncated snapshots end with a marker naming the original length. Requires a server restart.",
        &MAX_SNAPSHOT_BYTES,
        0,
        i32::MAX,
        GucContext::Postmaster,
        GucFlags::default(),
    );
    GucRegistry::define_bool_guc(
        c"pg_debug.stamp_query_id",
        c"Store the capture sequence id in each query's queryId.",
        c"Conflicts with other query id consumers such as pg_stat_statements. Requires a server restart.",
        &STAMP_QUERY_ID,
        GucContext::Postmaster,
        GucFlags::default(),
    );
}

/// Current values of the `pg_debug.*` settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GucValues {
    pub capacity: i32,
    pub evict_oldest: bool,
    pub max_snapshot_bytes: i32,
    pub stamp_query_id: bool,
}

impl GucValues {
    pub fn current() -> Self {
        Self {
            capacity: CAPACITY.get(),
            evict_oldest: EVICT_OLDEST.get(),
            max_snapshot_bytes: MAX_SNAPSHOT_BYTES.get(),
            stamp_query_id: STAMP_QUERY_ID.get(),
        }
    }

    /// Values every setting boots with.
    pub fn boot() -> Self {
        Self {
            capacity: CaptureConfig::DEFAULT_CAPACITY as i32,
            evict_oldest: false,
            max_snapshot_bytes: 0,
            stamp_query_id: false,
        }
    }

    /// Apply every setting that differs from its boot value on top of `base`.
    pub fn overlay(&self, base: CaptureConfig) -> CaptureConfig {
        let boot = Self::boot();
        let mut config = base;

        if self.capacity != boot.capacity {
            config.capacity = usize::try_from(self.capacity).unwrap_or(0);
        }
        if self.evict_oldest != boot.evict_oldest {
            config.overflow_policy = OverflowPolicy::EvictOldest;
        }
        if self.max_snapshot_bytes != boot.max_snapshot_bytes {
            config.max_snapshot_bytes = usize::try_from(self.max_snapshot_bytes)
                .ok()
                .filter(|limit| *limit > 0);
        }
        if self.stamp_query_id != boot.stamp_query_id {
            config.stamp_query_id = true;
        }
        config
    }
}

/// Capture settings for a new store: environment first, then settings.
pub fn capture_config() -> CaptureConfig {
    GucValues::current().overlay(CaptureConfig::from_env())
}
