//! PGDEBUG Test Utilities
//!
//! Centralized test infrastructure for the pgdebug workspace:
//! - A mock host pipeline with parse, rewrite and plan stages
//! - Mock renderer and recording interceptors
//! - Fixtures wiring a capture store into the mock host
//! - Proptest generators for statement text
//! - A tracing layer counting warnings

pub use pgdebug_capture::{CaptureStore, InMemoryCaptureStore};
pub use pgdebug_core::{
    CaptureConfig, CaptureError, OverflowPolicy, PgDebugError, PgDebugResult, RecordUpdate,
    SequenceId, StatementRecord, ALL_STATEMENTS,
};
pub use pgdebug_hooks::{
    CallerContext, CaptureInterceptor, HookRegistry, NodeRenderer, ParseAnalyzeInterceptor,
    ParseAnalyzeNext, Pipeline, PlannerInterceptor, PlannerNext, QueryInterface, StatementRow,
};

use proptest::prelude::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};

// ============================================================================
// MOCK HOST PIPELINE
// ============================================================================

/// Host whose stages operate on plain strings.
#[derive(Debug, Clone, Copy)]
pub struct MockPipeline;

/// Parser state: just the submitted text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockParseState {
    pub source_text: String,
}

/// Analyzed form of a mock statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockQuery {
    pub text: String,
    pub utility: bool,
    pub rewritten: bool,
    pub query_id: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MockPlanParams {
    pub cursor_options: i32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockPlan {
    pub text: String,
    pub query_id: u64,
}

/// Failures raised by the mock host's own stages.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MockError {
    #[error("syntax error at or near \"{0}\"")]
    Syntax(String),

    #[error("planner failed: {0}")]
    Planner(String),
}

impl Pipeline for MockPipeline {
    type ParseState = MockParseState;
    type Query = MockQuery;
    type PlanParams = MockPlanParams;
    type Plan = MockPlan;
    type Error = MockError;

    fn source_text(state: &MockParseState) -> String {
        state.source_text.clone()
    }

    fn stamp_sequence_id(query: &mut MockQuery, id: SequenceId) {
        query.query_id = u64::from(id);
    }
}

/// Statement text containing this marker makes the mock planner fail.
pub const FAIL_PLAN_MARKER: &str = "FAIL_PLAN";

const UTILITY_PREFIXES: &[&str] = &["BEGIN", "COMMIT", "ROLLBACK", "SET ", "SHOW "];

/// Default post-parse analysis of the mock host: nothing to do.
pub fn standard_parse_analyze(_state: &MockParseState, _query: &mut MockQuery) -> Result<(), MockError> {
    Ok(())
}

/// Default planner of the mock host.
pub fn standard_planner(query: &mut MockQuery, params: &MockPlanParams) -> Result<MockPlan, MockError> {
    if query.text.contains(FAIL_PLAN_MARKER) {
        return Err(MockError::Planner(format!("cannot plan \"{}\"", query.text)));
    }
    Ok(MockPlan {
        text: format!("Result (options={}) <- {}", params.cursor_options, query.text),
        query_id: query.query_id,
    })
}

/// Renders mock nodes the way a node dump would: braces and keyword fields.
#[derive(Debug, Clone, Copy, Default)]
pub struct MockRenderer;

impl NodeRenderer<MockPipeline> for MockRenderer {
    fn render_query(&self, query: &MockQuery) -> String {
        format!(
            "{{QUERY :text {:?} :utility {} :rewritten {}}}",
            query.text, query.utility, query.rewritten
        )
    }

    fn render_plan(&self, plan: &MockPlan) -> String {
        format!("{{PLANNEDSTMT :plan {:?}}}", plan.text)
    }
}

/// Mock host: parses, analyzes, rewrites and plans one statement at a time,
/// dispatching its two extension points through a [`HookRegistry`].
#[derive(Debug, Default)]
pub struct MockHost {
    pub registry: HookRegistry<MockPipeline>,
    pub params: MockPlanParams,
}

impl MockHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run one statement through the pipeline.
    ///
    /// Returns `Ok(None)` for utility statements, which are never planned.
    pub fn execute(&self, sql: &str) -> Result<Option<MockPlan>, MockError> {
        let text = sql.trim();
        if text.is_empty() || text.starts_with('!') {
            return Err(MockError::Syntax(text.to_string()));
        }

        let state = MockParseState {
            source_text: sql.to_string(),
        };
        let mut query = MockQuery {
            text: text.to_string(),
            utility: UTILITY_PREFIXES.iter().any(|p| text.starts_with(p)),
            rewritten: false,
            query_id: 0,
        };

        self.registry
            .post_parse_analyze(&state, &mut query, &standard_parse_analyze)?;

        if query.utility {
            return Ok(None);
        }

        query.rewritten = true;
        self.registry
            .plan(&mut query, &self.params, &standard_planner)
            .map(Some)
    }
}

// ============================================================================
// INTERCEPTORS
// ============================================================================

/// Interceptor that logs `name:stage:pre` / `name:stage:post` events.
#[derive(Debug)]
pub struct RecordingInterceptor {
    name: &'static str,
    events: Arc<Mutex<Vec<String>>>,
}

impl RecordingInterceptor {
    pub fn new(name: &'static str, events: Arc<Mutex<Vec<String>>>) -> Arc<Self> {
        Arc::new(Self { name, events })
    }

    fn push(&self, event: String) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

impl ParseAnalyzeInterceptor<MockPipeline> for RecordingInterceptor {
    fn post_parse_analyze(
        &self,
        state: &MockParseState,
        query: &mut MockQuery,
        next: ParseAnalyzeNext<'_, MockPipeline>,
    ) -> Result<(), MockError> {
        self.push(format!("{}:parse:pre", self.name));
        next.run(state, query)?;
        self.push(format!("{}:parse:post", self.name));
        Ok(())
    }
}

impl PlannerInterceptor<MockPipeline> for RecordingInterceptor {
    fn plan(
        &self,
        query: &mut MockQuery,
        params: &MockPlanParams,
        next: PlannerNext<'_, MockPipeline>,
    ) -> Result<MockPlan, MockError> {
        self.push(format!("{}:plan:pre", self.name));
        let plan = next.run(query, params)?;
        self.push(format!("{}:plan:post", self.name));
        Ok(plan)
    }
}

/// Planner interceptor that runs another statement through `inner` while the
/// outer statement is being planned, the way a function body gets parsed and
/// planned during constant folding.
pub struct NestedStatementInterceptor {
    inner: HookRegistry<MockPipeline>,
    sql: String,
}

impl NestedStatementInterceptor {
    pub fn new(inner: HookRegistry<MockPipeline>, sql: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            inner,
            sql: sql.into(),
        })
    }
}

impl PlannerInterceptor<MockPipeline> for NestedStatementInterceptor {
    fn plan(
        &self,
        query: &mut MockQuery,
        params: &MockPlanParams,
        next: PlannerNext<'_, MockPipeline>,
    ) -> Result<MockPlan, MockError> {
        let state = MockParseState {
            source_text: self.sql.clone(),
        };
        let mut nested = MockQuery {
            text: self.sql.clone(),
            utility: false,
            rewritten: true,
            query_id: 0,
        };
        self.inner
            .post_parse_analyze(&state, &mut nested, &standard_parse_analyze)?;
        self.inner.plan(&mut nested, params, &standard_planner)?;

        next.run(query, params)
    }
}

// ============================================================================
// FIXTURES
// ============================================================================

pub type MockCapture = CaptureInterceptor<MockPipeline, InMemoryCaptureStore, MockRenderer>;

/// Mock host with a capture interceptor installed at both points.
pub struct CaptureFixture {
    pub host: MockHost,
    pub store: Arc<InMemoryCaptureStore>,
    pub capture: Arc<MockCapture>,
    pub query: QueryInterface<InMemoryCaptureStore>,
}

impl CaptureFixture {
    pub fn new(config: CaptureConfig) -> Self {
        let store = Arc::new(InMemoryCaptureStore::new(config));
        let capture = Arc::new(CaptureInterceptor::new(store.clone(), MockRenderer));
        let mut host = MockHost::new();
        host.registry.install(capture.clone());

        Self {
            host,
            query: QueryInterface::new(store.clone()),
            store,
            capture,
        }
    }

    /// Every row currently stored.
    pub fn rows(&self) -> Vec<StatementRow> {
        self.query
            .sql_info(&CallerContext::set_returning(), ALL_STATEMENTS)
            .unwrap_or_default()
    }
}

impl Default for CaptureFixture {
    fn default() -> Self {
        Self::new(CaptureConfig::default())
    }
}

// ============================================================================
// LOG CAPTURE
// ============================================================================

/// Counts WARN events seen by the subscriber it is layered on.
#[derive(Debug, Clone, Default)]
pub struct WarnCounter {
    warnings: Arc<AtomicUsize>,
}

impl WarnCounter {
    pub fn count(&self) -> usize {
        self.warnings.load(Ordering::SeqCst)
    }
}

impl<S: Subscriber> Layer<S> for WarnCounter {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        if *event.metadata().level() == Level::WARN {
            self.warnings.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// Run `f` on this thread with a subscriber that counts warnings.
pub fn count_warnings<T>(f: impl FnOnce() -> T) -> (T, usize) {
    let counter = WarnCounter::default();
    let subscriber = tracing_subscriber::registry().with(counter.clone());
    let value = tracing::subscriber::with_default(subscriber, f);
    (value, counter.count())
}

// ============================================================================
// GENERATORS
// ============================================================================

/// Plannable statements.
pub fn arb_select_statement() -> impl Strategy<Value = String> {
    prop_oneof![
        (0i64..10_000).prop_map(|n| format!("SELECT {}", n)),
        ("[a-z][a-z0-9_]{0,10}", "[a-z][a-z0-9_]{0,10}")
            .prop_map(|(col, table)| format!("SELECT {} FROM {}", col, table)),
        "[a-z]{1,8}".prop_map(|name| format!("SELECT '{}'::text -- ünïcode ✓", name)),
    ]
}

/// Statements the mock host never plans.
pub fn arb_utility_statement() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("BEGIN".to_string()),
        Just("COMMIT".to_string()),
        "[a-z_]{1,12}".prop_map(|name| format!("SET {} = on", name)),
    ]
}

/// Any statement the mock host accepts.
pub fn arb_statement() -> impl Strategy<Value = String> {
    prop_oneof![3 => arb_select_statement(), 1 => arb_utility_statement()]
}

pub fn arb_statement_batch(max: usize) -> impl Strategy<Value = Vec<String>> {
    prop::collection::vec(arb_statement(), 1..=max)
}
