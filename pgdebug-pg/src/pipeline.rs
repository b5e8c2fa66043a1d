//! The PostgreSQL query pipeline as a [`Pipeline`], plus the node dump
//! renderer.

use pgdebug_core::SequenceId;
use pgdebug_hooks::{NodeRenderer, Pipeline};
use pgrx::pg_sys;
use std::convert::Infallible;
use std::ffi::{c_char, c_int, c_void, CStr};

/// Post-parse-analysis and planner hooks of a PostgreSQL backend.
///
/// Server errors raised inside a stage unwind through `pg_guard` instead of
/// coming back as values, hence the `Infallible` error type.
pub struct PgPipeline;

/// Arguments of the post-parse-analysis hook besides the query.
pub struct PgParseState {
    pub pstate: *mut pg_sys::ParseState,
    pub jstate: *mut pg_sys::JumbleState,
}

/// Arguments of the planner hook besides the query.
pub struct PgPlanParams {
    pub query_string: *const c_char,
    pub cursor_options: c_int,
    pub bound_params: pg_sys::ParamListInfo,
}

impl Pipeline for PgPipeline {
    type ParseState = PgParseState;
    type Query = pg_sys::Query;
    type PlanParams = PgPlanParams;
    type Plan = *mut pg_sys::PlannedStmt;
    type Error = Infallible;

    /// Statement text as submitted. Bytes that are not valid UTF-8 (a server
    /// encoding other than UTF8) are replaced with U+FFFD, so non-ASCII text
    /// from such databases is not byte-exact.
    fn source_text(state: &PgParseState) -> String {
        // SAFETY: the hook receives a live ParseState whose p_sourcetext is
        // either null or a NUL-terminated string owned by the caller.
        unsafe {
            match state.pstate.as_ref() {
                Some(pstate) if !pstate.p_sourcetext.is_null() => {
                    CStr::from_ptr(pstate.p_sourcetext).to_string_lossy().into_owned()
                }
                _ => String::new(),
            }
        }
    }

    fn stamp_sequence_id(query: &mut pg_sys::Query, id: SequenceId) {
        query.queryId = id.into();
    }
}

/// `nodeToString` followed by `format_node_dump`.
#[derive(Debug, Clone, Copy, Default)]
pub struct PgRenderer;

impl PgRenderer {
    fn render(node: *const c_void) -> String {
        if node.is_null() {
            return "<>".to_string();
        }
        // SAFETY: node points at a valid Node; both returned strings are
        // palloc'd in the current memory context and freed here.
        unsafe {
            let raw = pg_sys::nodeToString(node);
            let formatted = pg_sys::format_node_dump(raw);
            pg_sys::pfree(raw.cast());
            let text = CStr::from_ptr(formatted).to_string_lossy().into_owned();
            pg_sys::pfree(formatted.cast());
            text
        }
    }
}

impl NodeRenderer<PgPipeline> for PgRenderer {
    fn render_query(&self, query: &pg_sys::Query) -> String {
        Self::render((query as *const pg_sys::Query).cast())
    }

    fn render_plan(&self, plan: &*mut pg_sys::PlannedStmt) -> String {
        Self::render(plan.cast_const().cast())
    }
}

/// Unwrap a result whose error case cannot occur.
pub fn into_ok<T>(result: Result<T, Infallible>) -> T {
    match result {
        Ok(value) => value,
        Err(never) => match never {},
    }
}
