//! Interceptor chains for the host's extension points.
//!
//! Each extension point holds an ordered list of interceptors. The most
//! recently installed interceptor runs first and decides when to hand control
//! to the rest of the chain through its `Next` continuation; the end of the
//! chain is the host's own behavior (or whatever hook was active before this
//! module loaded), supplied by the caller at dispatch time.
//!
//! # Usage
//!
//! ```ignore
//! let mut registry = HookRegistry::<MyPipeline>::new();
//! let (parse_id, plan_id) = registry.install(Arc::new(capture));
//!
//! let plan = registry.plan(&mut query, &params, &|q, p| standard_planner(q, p))?;
//!
//! registry.uninstall_planner(plan_id)?;
//! registry.uninstall_parse_analyze(parse_id)?;
//! ```

use crate::pipeline::Pipeline;
use pgdebug_core::{HookError, PgDebugResult};
use std::fmt;
use std::sync::Arc;

/// Handle returned by `install`, used to remove the same interceptor later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InterceptorId(u64);

impl fmt::Display for InterceptorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

// ============================================================================
// INTERCEPTOR TRAITS
// ============================================================================

/// Interceptor for the post-parse-analysis point.
pub trait ParseAnalyzeInterceptor<P: Pipeline>: Send + Sync {
    fn post_parse_analyze(
        &self,
        state: &P::ParseState,
        query: &mut P::Query,
        next: ParseAnalyzeNext<'_, P>,
    ) -> Result<(), P::Error>;
}

/// Interceptor for the planning point.
pub trait PlannerInterceptor<P: Pipeline>: Send + Sync {
    fn plan(
        &self,
        query: &mut P::Query,
        params: &P::PlanParams,
        next: PlannerNext<'_, P>,
    ) -> Result<P::Plan, P::Error>;
}

type ParseAnalyzeTerminal<'a, P> =
    dyn Fn(&<P as Pipeline>::ParseState, &mut <P as Pipeline>::Query) -> Result<(), <P as Pipeline>::Error>
        + 'a;

type PlannerTerminal<'a, P> = dyn Fn(
        &mut <P as Pipeline>::Query,
        &<P as Pipeline>::PlanParams,
    ) -> Result<<P as Pipeline>::Plan, <P as Pipeline>::Error>
    + 'a;

/// The remainder of a post-parse-analysis chain.
pub struct ParseAnalyzeNext<'a, P: Pipeline> {
    rest: &'a [(InterceptorId, Arc<dyn ParseAnalyzeInterceptor<P>>)],
    terminal: &'a ParseAnalyzeTerminal<'a, P>,
}

impl<'a, P: Pipeline> ParseAnalyzeNext<'a, P> {
    /// Run the next interceptor, or the terminal once the chain is exhausted.
    pub fn run(self, state: &P::ParseState, query: &mut P::Query) -> Result<(), P::Error> {
        match self.rest.split_first() {
            Some(((_, head), rest)) => head.post_parse_analyze(
                state,
                query,
                ParseAnalyzeNext {
                    rest,
                    terminal: self.terminal,
                },
            ),
            None => (self.terminal)(state, query),
        }
    }
}

/// The remainder of a planning chain.
pub struct PlannerNext<'a, P: Pipeline> {
    rest: &'a [(InterceptorId, Arc<dyn PlannerInterceptor<P>>)],
    terminal: &'a PlannerTerminal<'a, P>,
}

impl<'a, P: Pipeline> PlannerNext<'a, P> {
    /// Run the next interceptor, or the terminal once the chain is exhausted.
    pub fn run(self, query: &mut P::Query, params: &P::PlanParams) -> Result<P::Plan, P::Error> {
        match self.rest.split_first() {
            Some(((_, head), rest)) => head.plan(
                query,
                params,
                PlannerNext {
                    rest,
                    terminal: self.terminal,
                },
            ),
            None => (self.terminal)(query, params),
        }
    }
}

// ============================================================================
// CHAIN
// ============================================================================

/// Ordered interceptors installed at one extension point, outermost first.
pub struct InterceptorChain<I: ?Sized> {
    point: &'static str,
    entries: Vec<(InterceptorId, Arc<I>)>,
    issued: u64,
}

impl<I: ?Sized> InterceptorChain<I> {
    pub fn new(point: &'static str) -> Self {
        Self {
            point,
            entries: Vec::new(),
            issued: 0,
        }
    }

    /// Install `interceptor` on top of whatever is already active.
    pub fn install(&mut self, interceptor: Arc<I>) -> InterceptorId {
        self.issued += 1;
        let id = InterceptorId(self.issued);
        self.entries.insert(0, (id, interceptor));
        tracing::debug!(point = self.point, id = id.0, depth = self.entries.len(), "interceptor installed");
        id
    }

    /// Remove the interceptor installed under `id`.
    ///
    /// Removal out of install order is allowed; the interceptors around it keep
    /// their relative order.
    pub fn uninstall(&mut self, id: InterceptorId) -> PgDebugResult<Arc<I>> {
        let position = self
            .entries
            .iter()
            .position(|(installed, _)| *installed == id)
            .ok_or(HookError::NotInstalled {
                point: self.point,
                id: id.0,
            })?;
        let (_, interceptor) = self.entries.remove(position);
        tracing::debug!(point = self.point, id = id.0, depth = self.entries.len(), "interceptor removed");
        Ok(interceptor)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Installed ids in dispatch order.
    pub fn ids(&self) -> Vec<InterceptorId> {
        self.entries.iter().map(|(id, _)| *id).collect()
    }

    pub fn contains(&self, id: InterceptorId) -> bool {
        self.entries.iter().any(|(installed, _)| *installed == id)
    }
}

impl<I: ?Sized> Clone for InterceptorChain<I> {
    fn clone(&self) -> Self {
        Self {
            point: self.point,
            entries: self.entries.clone(),
            issued: self.issued,
        }
    }
}

impl<I: ?Sized> fmt::Debug for InterceptorChain<I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterceptorChain")
            .field("point", &self.point)
            .field("ids", &self.ids())
            .finish()
    }
}

// ============================================================================
// REGISTRY
// ============================================================================

/// The two extension points this module wraps.
///
/// Cloning is cheap (interceptors are shared), which lets a caller release
/// any lock around the registry before dispatching into host code that may
/// re-enter it.
pub struct HookRegistry<P: Pipeline> {
    parse_analyze: InterceptorChain<dyn ParseAnalyzeInterceptor<P>>,
    planner: InterceptorChain<dyn PlannerInterceptor<P>>,
}

impl<P: Pipeline> HookRegistry<P> {
    pub const PARSE_ANALYZE_POINT: &'static str = "post_parse_analyze";
    pub const PLANNER_POINT: &'static str = "planner";

    pub fn new() -> Self {
        Self {
            parse_analyze: InterceptorChain::new(Self::PARSE_ANALYZE_POINT),
            planner: InterceptorChain::new(Self::PLANNER_POINT),
        }
    }

    /// Install one object at both points.
    pub fn install<I>(&mut self, interceptor: Arc<I>) -> (InterceptorId, InterceptorId)
    where
        I: ParseAnalyzeInterceptor<P> + PlannerInterceptor<P> + 'static,
    {
        let parse_id = self.install_parse_analyze(interceptor.clone());
        let plan_id = self.install_planner(interceptor);
        (parse_id, plan_id)
    }

    pub fn install_parse_analyze(
        &mut self,
        interceptor: Arc<dyn ParseAnalyzeInterceptor<P>>,
    ) -> InterceptorId {
        self.parse_analyze.install(interceptor)
    }

    pub fn install_planner(&mut self, interceptor: Arc<dyn PlannerInterceptor<P>>) -> InterceptorId {
        self.planner.install(interceptor)
    }

    pub fn uninstall_parse_analyze(&mut self, id: InterceptorId) -> PgDebugResult<()> {
        self.parse_analyze.uninstall(id).map(|_| ())
    }

    pub fn uninstall_planner(&mut self, id: InterceptorId) -> PgDebugResult<()> {
        self.planner.uninstall(id).map(|_| ())
    }

    pub fn parse_analyze_chain(&self) -> &InterceptorChain<dyn ParseAnalyzeInterceptor<P>> {
        &self.parse_analyze
    }

    pub fn planner_chain(&self) -> &InterceptorChain<dyn PlannerInterceptor<P>> {
        &self.planner
    }

    /// Dispatch the post-parse-analysis point; `terminal` runs after every
    /// interceptor has delegated.
    pub fn post_parse_analyze(
        &self,
        state: &P::ParseState,
        query: &mut P::Query,
        terminal: &dyn Fn(&P::ParseState, &mut P::Query) -> Result<(), P::Error>,
    ) -> Result<(), P::Error> {
        ParseAnalyzeNext {
            rest: &self.parse_analyze.entries,
            terminal,
        }
        .run(state, query)
    }

    /// Dispatch the planning point; `terminal` is the planner proper.
    pub fn plan(
        &self,
        query: &mut P::Query,
        params: &P::PlanParams,
        terminal: &dyn Fn(&mut P::Query, &P::PlanParams) -> Result<P::Plan, P::Error>,
    ) -> Result<P::Plan, P::Error> {
        PlannerNext {
            rest: &self.planner.entries,
            terminal,
        }
        .run(query, params)
    }
}

impl<P: Pipeline> Default for HookRegistry<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: Pipeline> Clone for HookRegistry<P> {
    fn clone(&self) -> Self {
        Self {
            parse_analyze: self.parse_analyze.clone(),
            planner: self.planner.clone(),
        }
    }
}

impl<P: Pipeline> fmt::Debug for HookRegistry<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookRegistry")
            .field("parse_analyze", &self.parse_analyze)
            .field("planner", &self.planner)
            .finish()
    }
}

// =============================================================================
// TESTS
// =============================================================================
