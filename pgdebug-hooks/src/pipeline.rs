//! Host pipeline abstraction

use pgdebug_core::SequenceId;

/// The host query pipeline as seen from the two extension points.
///
/// Implementations only name the host's types; the stages themselves are
/// supplied as terminals when a [`crate::HookRegistry`] dispatches.
pub trait Pipeline: 'static {
    /// Parser state handed to post-parse analysis (carries the source text)
    type ParseState: ?Sized;
    /// Analyzed form of a statement
    type Query: ?Sized;
    /// Everything the planner receives besides the query
    type PlanParams: ?Sized;
    /// Finished plan
    type Plan;
    /// Failure raised by a host stage
    type Error;

    /// Statement text exactly as submitted.
    fn source_text(state: &Self::ParseState) -> String;

    /// Write a sequence id into the analyzed form, if the host has a slot for
    /// one.
    fn stamp_sequence_id(_query: &mut Self::Query, _id: SequenceId) {}
}

/// Renders host tree nodes into stable text.
///
/// Treated as a black box: deterministic and free of side effects.
pub trait NodeRenderer<P: Pipeline>: Send + Sync {
    fn render_query(&self, query: &P::Query) -> String;

    fn render_plan(&self, plan: &P::Plan) -> String;
}
