//! Read-only query interface over a capture store.

use pgdebug_capture::CaptureStore;
use pgdebug_core::{
    CaptureStats, PgDebugResult, QueryError, SequenceId, StatementRecord,
};
use std::sync::Arc;

/// One result row: `(sql_id, sql_str, parse_tree, rewritten_parse_tree, plan)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatementRow {
    pub sql_id: SequenceId,
    pub sql_str: String,
    pub parse_tree: Option<String>,
    pub rewritten_parse_tree: Option<String>,
    pub plan: Option<String>,
}

impl From<StatementRecord> for StatementRow {
    fn from(record: StatementRecord) -> Self {
        Self {
            sql_id: record.sequence_id,
            sql_str: record.source_text,
            parse_tree: record.parsed_snapshot,
            rewritten_parse_tree: record.prewrite_snapshot,
            plan: record.plan_snapshot,
        }
    }
}

/// What the caller of a set-returning read can accept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallerContext {
    /// Caller consumes a set of rows at all
    pub accepts_set: bool,
    /// Caller allows the result to be materialized up front
    pub materialize_allowed: bool,
}

impl CallerContext {
    /// A caller that takes a fully materialized row set.
    pub fn set_returning() -> Self {
        Self {
            accepts_set: true,
            materialize_allowed: true,
        }
    }

    /// Reject contexts that cannot receive the rows.
    pub fn check(&self) -> Result<(), QueryError> {
        if !self.accepts_set {
            return Err(QueryError::BadCallerContext {
                reason: "caller does not accept a row set".to_string(),
            });
        }
        if !self.materialize_allowed {
            return Err(QueryError::BadCallerContext {
                reason: "materialize mode required, but it is not allowed in this context"
                    .to_string(),
            });
        }
        Ok(())
    }
}

/// Convert a signed SQL filter argument to a sequence id.
pub fn parse_filter(value: i64) -> Result<SequenceId, QueryError> {
    SequenceId::try_from(value).map_err(|_| QueryError::InvalidFilter { value })
}

/// Read side of the capture store.
pub struct QueryInterface<S: CaptureStore + ?Sized> {
    store: Arc<S>,
}

impl<S: CaptureStore + ?Sized> QueryInterface<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Rows for `filter_id` (0 = every record), ascending by id.
    ///
    /// The caller context is checked before the store is touched.
    pub fn sql_info(
        &self,
        caller: &CallerContext,
        filter_id: SequenceId,
    ) -> PgDebugResult<Vec<StatementRow>> {
        caller.check()?;
        let records = self.store.get(filter_id)?;
        Ok(records.into_iter().map(StatementRow::from).collect())
    }

    /// Kept for interface stability; does nothing. Captured records stay
    /// readable after a reset.
    pub fn sql_info_reset(&self) -> PgDebugResult<()> {
        tracing::debug!("sql_info_reset called; capture store left unchanged");
        Ok(())
    }

    pub fn stats(&self) -> PgDebugResult<CaptureStats> {
        self.store.stats()
    }
}

impl<S: CaptureStore + ?Sized> Clone for QueryInterface<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}
