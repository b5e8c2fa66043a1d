//! Capture interceptor: snapshots each statement at parse and plan time.

use crate::chain::{ParseAnalyzeInterceptor, ParseAnalyzeNext, PlannerInterceptor, PlannerNext};
use crate::pipeline::{NodeRenderer, Pipeline};
use pgdebug_capture::CaptureStore;
use pgdebug_core::{CaptureError, PgDebugError, RecordUpdate, SequenceId, ALL_STATEMENTS};
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

/// Records every observed statement into a [`CaptureStore`].
///
/// At post-parse analysis the host (and any interceptor installed before this
/// one) runs first; the analyzed form is then rendered and a new record is
/// created. At planning the incoming form is rendered before delegating and
/// the finished plan after.
///
/// Capture faults never fail the host statement. A full store, an evicted
/// record or a refused update is logged and the statement carries on
/// uncaptured. A full store is reported at warn level once per overflow
/// episode and at debug level afterwards. Delegate failures are returned
/// untouched.
pub struct CaptureInterceptor<P, S, R>
where
    P: Pipeline,
    S: CaptureStore + ?Sized,
    R: NodeRenderer<P>,
{
    store: Arc<S>,
    renderer: R,
    /// Record created by the latest parse, waiting for its planning stage.
    /// `ALL_STATEMENTS` (0) when there is none.
    pending: AtomicU32,
    /// Set once a full store has been reported; cleared by the next capture
    overflow_reported: AtomicBool,
    _pipeline: PhantomData<fn() -> P>,
}

impl<P, S, R> CaptureInterceptor<P, S, R>
where
    P: Pipeline,
    S: CaptureStore + ?Sized,
    R: NodeRenderer<P>,
{
    pub fn new(store: Arc<S>, renderer: R) -> Self {
        Self {
            store,
            renderer,
            pending: AtomicU32::new(ALL_STATEMENTS),
            overflow_reported: AtomicBool::new(false),
            _pipeline: PhantomData,
        }
    }

    /// Id the next planning stage will write to, if any.
    pub fn pending_id(&self) -> Option<SequenceId> {
        match self.pending.load(Ordering::Acquire) {
            ALL_STATEMENTS => None,
            id => Some(id),
        }
    }

    fn record_parse(&self, state: &P::ParseState, query: &mut P::Query) {
        let source_text = P::source_text(state);

        let id = match self.store.next_id() {
            Ok(id) => id,
            Err(e) => {
                self.pending.store(ALL_STATEMENTS, Ordering::Release);
                self.report_uncaptured(&e);
                return;
            }
        };

        let parsed = self.renderer.render_query(query);
        if let Err(e) = self.store.create(id, &source_text, Some(parsed)) {
            self.pending.store(ALL_STATEMENTS, Ordering::Release);
            self.report_uncaptured(&e);
            return;
        }
        self.overflow_reported.store(false, Ordering::Release);

        if self.store.config().stamp_query_id {
            P::stamp_sequence_id(query, id);
        }
        self.pending.store(id, Ordering::Release);
        tracing::debug!(id, bytes = source_text.len(), "captured parse stage");
    }

    fn report_uncaptured(&self, error: &PgDebugError) {
        if let PgDebugError::Capture(CaptureError::CapacityExceeded { capacity }) = error {
            if self.overflow_reported.swap(true, Ordering::AcqRel) {
                tracing::debug!(capacity, "statement not captured: store full");
            } else {
                tracing::warn!(
                    capacity,
                    "capture store full; further statements are not captured"
                );
            }
            return;
        }
        tracing::warn!(error = %error, "statement not captured");
    }

    fn record_planning(&self, id: SequenceId, update: RecordUpdate) {
        match self.store.update(id, update) {
            Ok(()) => {}
            Err(PgDebugError::Capture(CaptureError::NotFound { .. })) => {
                // Evicted, cleared, or never created for this id
                tracing::warn!(id, "planning snapshot has no statement record");
            }
            Err(e) => {
                tracing::warn!(id, error = %e, "planning snapshot not recorded");
            }
        }
    }
}

impl<P, S, R> ParseAnalyzeInterceptor<P> for CaptureInterceptor<P, S, R>
where
    P: Pipeline,
    S: CaptureStore + ?Sized,
    R: NodeRenderer<P>,
{
    fn post_parse_analyze(
        &self,
        state: &P::ParseState,
        query: &mut P::Query,
        next: ParseAnalyzeNext<'_, P>,
    ) -> Result<(), P::Error> {
        next.run(state, query)?;
        self.record_parse(state, query);
        Ok(())
    }
}

impl<P, S, R> PlannerInterceptor<P> for CaptureInterceptor<P, S, R>
where
    P: Pipeline,
    S: CaptureStore + ?Sized,
    R: NodeRenderer<P>,
{
    fn plan(
        &self,
        query: &mut P::Query,
        params: &P::PlanParams,
        next: PlannerNext<'_, P>,
    ) -> Result<P::Plan, P::Error> {
        // Taken, not read: a statement parsed while this one plans gets its
        // own pending id and cannot receive this plan.
        let id = self.pending.swap(ALL_STATEMENTS, Ordering::AcqRel);
        if id != ALL_STATEMENTS {
            self.record_planning(id, RecordUpdate::prewrite(self.renderer.render_query(query)));
        }

        let plan = next.run(query, params)?;

        if id != ALL_STATEMENTS {
            self.record_planning(id, RecordUpdate::plan(self.renderer.render_plan(&plan)));
            tracing::debug!(id, "captured planning stage");
        }
        Ok(plan)
    }
}
