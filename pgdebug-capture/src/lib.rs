//! PGDEBUG Capture - Capture Store Trait and In-Memory Implementation
//!
//! Holds the bounded set of statement records gathered by the interceptors.
//! One store lives per backend process; nothing here is persisted.

use pgdebug_core::{
    bound_snapshot, now, CaptureConfig, CaptureError, CaptureStats, OverflowPolicy,
    PgDebugError, PgDebugResult, RecordUpdate, SequenceId, StatementRecord, ALL_STATEMENTS,
};
use std::collections::BTreeMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

// ============================================================================
// CAPTURE STORE TRAIT
// ============================================================================

/// Storage for statement records.
pub trait CaptureStore: Send + Sync {
    /// Hand out the next sequence id.
    ///
    /// Ids start at 1 and never repeat. Under [`OverflowPolicy::Reject`] a full
    /// store refuses before an id is consumed, so ids stay gap-free.
    fn next_id(&self) -> PgDebugResult<SequenceId>;

    /// Insert the record for a freshly issued id.
    fn create(
        &self,
        id: SequenceId,
        source_text: &str,
        parsed_snapshot: Option<String>,
    ) -> PgDebugResult<()>;

    /// Fill in planning-stage snapshots of an existing record.
    fn update(&self, id: SequenceId, update: RecordUpdate) -> PgDebugResult<()>;

    /// All records in ascending id order when `filter_id` is
    /// [`ALL_STATEMENTS`], otherwise the matching record or nothing.
    fn get(&self, filter_id: SequenceId) -> PgDebugResult<Vec<StatementRecord>>;

    /// Id of the most recently created record, 0 if none.
    fn latest_id(&self) -> PgDebugResult<SequenceId>;

    fn stats(&self) -> PgDebugResult<CaptureStats>;

    /// Drop every record. Issued ids are not handed out again.
    fn clear(&self) -> PgDebugResult<()>;

    fn config(&self) -> &CaptureConfig;
}

// ============================================================================
// IN-MEMORY STORE
// ============================================================================

#[derive(Debug, Default)]
struct StoreState {
    records: BTreeMap<SequenceId, StatementRecord>,
    /// Highest id returned by `next_id`
    issued: SequenceId,
    /// Highest id that made it into `records`
    latest_created: SequenceId,
    /// Statements turned away by a full store
    refused: u64,
}

/// Process-local capture store guarded by a reader-writer lock.
///
/// Readers see a consistent point-in-time view; writers are serialized.
#[derive(Debug)]
pub struct InMemoryCaptureStore {
    config: CaptureConfig,
    state: RwLock<StoreState>,
}

impl Default for InMemoryCaptureStore {
    fn default() -> Self {
        Self::new(CaptureConfig::default())
    }
}

impl InMemoryCaptureStore {
    pub fn new(config: CaptureConfig) -> Self {
        Self {
            config,
            state: RwLock::new(StoreState::default()),
        }
    }

    /// Create a store after validating its configuration.
    pub fn with_validated(config: CaptureConfig) -> PgDebugResult<Self> {
        config.validate()?;
        Ok(Self::new(config))
    }

    /// Number of live records.
    pub fn len(&self) -> PgDebugResult<usize> {
        Ok(self.read()?.records.len())
    }

    pub fn is_empty(&self) -> PgDebugResult<bool> {
        Ok(self.len()? == 0)
    }

    pub fn capacity(&self) -> usize {
        self.config.capacity
    }

    pub fn is_full(&self) -> PgDebugResult<bool> {
        Ok(self.len()? >= self.config.capacity)
    }

    fn read(&self) -> PgDebugResult<RwLockReadGuard<'_, StoreState>> {
        self.state
            .read()
            .map_err(|_| PgDebugError::Capture(CaptureError::LockPoisoned))
    }

    fn write(&self) -> PgDebugResult<RwLockWriteGuard<'_, StoreState>> {
        self.state
            .write()
            .map_err(|_| PgDebugError::Capture(CaptureError::LockPoisoned))
    }

    fn bound(&self, snapshot: Option<String>) -> Option<String> {
        snapshot.map(|s| bound_snapshot(s, self.config.max_snapshot_bytes))
    }
}

impl CaptureStore for InMemoryCaptureStore {
    fn next_id(&self) -> PgDebugResult<SequenceId> {
        let mut state = self.write()?;

        if self.config.overflow_policy == OverflowPolicy::Reject
            && state.records.len() >= self.config.capacity
        {
            state.refused += 1;
            return Err(CaptureError::CapacityExceeded {
                capacity: self.config.capacity,
            }
            .into());
        }

        let next = state
            .issued
            .checked_add(1)
            .ok_or(CaptureError::SequenceExhausted)?;
        state.issued = next;
        Ok(next)
    }

    fn create(
        &self,
        id: SequenceId,
        source_text: &str,
        parsed_snapshot: Option<String>,
    ) -> PgDebugResult<()> {
        let parsed_snapshot = self.bound(parsed_snapshot);
        let mut state = self.write()?;

        if state.records.contains_key(&id) {
            return Err(CaptureError::DuplicateId { id }.into());
        }
        if id == ALL_STATEMENTS || id > state.issued || id <= state.latest_created {
            return Err(CaptureError::InvalidSequence {
                id,
                latest: state.issued,
            }
            .into());
        }

        if state.records.len() >= self.config.capacity {
            match self.config.overflow_policy {
                OverflowPolicy::Reject => {
                    state.refused += 1;
                    return Err(CaptureError::CapacityExceeded {
                        capacity: self.config.capacity,
                    }
                    .into());
                }
                OverflowPolicy::EvictOldest => {
                    if let Some((evicted, _)) = state.records.pop_first() {
                        tracing::debug!(evicted, incoming = id, "evicted oldest statement record");
                    }
                }
            }
        }

        state
            .records
            .insert(id, StatementRecord::new(id, source_text, parsed_snapshot, now()));
        state.latest_created = id;
        Ok(())
    }

    fn update(&self, id: SequenceId, update: RecordUpdate) -> PgDebugResult<()> {
        let update = RecordUpdate {
            prewrite_snapshot: self.bound(update.prewrite_snapshot),
            plan_snapshot: self.bound(update.plan_snapshot),
        };
        let mut state = self.write()?;

        let record = state
            .records
            .get_mut(&id)
            .ok_or(CaptureError::NotFound { id })?;
        record.apply(update, now())?;
        Ok(())
    }

    fn get(&self, filter_id: SequenceId) -> PgDebugResult<Vec<StatementRecord>> {
        let state = self.read()?;

        if filter_id == ALL_STATEMENTS {
            return Ok(state.records.values().cloned().collect());
        }
        Ok(state.records.get(&filter_id).cloned().into_iter().collect())
    }

    fn latest_id(&self) -> PgDebugResult<SequenceId> {
        Ok(self.read()?.latest_created)
    }

    fn stats(&self) -> PgDebugResult<CaptureStats> {
        let state = self.read()?;
        Ok(CaptureStats {
            captured: state.records.len(),
            capacity: self.config.capacity,
            latest_id: state.latest_created,
            completed_plans: state.records.values().filter(|r| r.is_planned()).count(),
            refused: state.refused,
            oldest_captured_at: state.records.values().next().map(|r| r.captured_at),
            last_planned_at: state.records.values().filter_map(|r| r.planned_at).max(),
        })
    }

    fn clear(&self) -> PgDebugResult<()> {
        self.write()?.records.clear();
        Ok(())
    }

    fn config(&self) -> &CaptureConfig {
        &self.config
    }
}

// =============================================================================
// TESTS
// =============================================================================
