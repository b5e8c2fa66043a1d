//! PGDEBUG-PG - PostgreSQL Extension for Statement Capture
//!
//! Loads into a backend, installs itself on the post-parse-analysis and
//! planner hooks, and records every statement's source text, analyzed
//! tree, planner input and finished plan. The history is read back with
//! `pg_debug_sql_info()`.
//!
//! Anything already on those hooks when the library loads keeps running:
//! it becomes the terminal of this extension's interceptor chain.

pub mod guc;
pub mod logging;
pub mod pipeline;

use pgrx::prelude::*;

use pgdebug_capture::{CaptureStore, InMemoryCaptureStore};
use pgdebug_core::{PgDebugResult, SequenceId};
use pgdebug_hooks::{
    parse_filter, CallerContext, CaptureInterceptor, HookRegistry, InterceptorId, QueryInterface,
};
use pipeline::{into_ok, PgParseState, PgPipeline, PgPlanParams, PgRenderer};

use once_cell::sync::Lazy;
use std::convert::Infallible;
use std::ffi::{c_char, c_int};
use std::sync::{Arc, RwLock};

// Initialize pgrx extension
pgrx::pg_module_magic!();

// ============================================================================
// EXTENSION STATE
// ============================================================================

/// Everything this backend knows about capture. One per process.
#[derive(Default)]
struct ExtensionState {
    registry: HookRegistry<PgPipeline>,
    store: Option<Arc<InMemoryCaptureStore>>,
    /// Parse and planner interceptor ids of the capture interceptor
    capture: Option<(InterceptorId, InterceptorId)>,
    prev_post_parse_analyze: pg_sys::post_parse_analyze_hook_type,
    prev_planner: pg_sys::planner_hook_type,
}

static STATE: Lazy<RwLock<ExtensionState>> = Lazy::new(|| RwLock::new(ExtensionState::default()));

/// Safely acquire a read lock on the extension state, handling poisoning.
fn state_read() -> std::sync::RwLockReadGuard<'static, ExtensionState> {
    match STATE.read() {
        Ok(guard) => guard,
        Err(poisoned) => {
            pgrx::warning!("pg_debug: state lock was poisoned, recovering...");
            poisoned.into_inner()
        }
    }
}

/// Safely acquire a write lock on the extension state, handling poisoning.
fn state_write() -> std::sync::RwLockWriteGuard<'static, ExtensionState> {
    match STATE.write() {
        Ok(guard) => guard,
        Err(poisoned) => {
            pgrx::warning!("pg_debug: state lock was poisoned, recovering...");
            poisoned.into_inner()
        }
    }
}

/// Raise a server ERROR for a failed operation.
fn or_error<T>(result: PgDebugResult<T>) -> T {
    match result {
        Ok(value) => value,
        Err(e) => pgrx::error!("pg_debug: {}", e),
    }
}

fn query_interface() -> QueryInterface<InMemoryCaptureStore> {
    match state_read().store.clone() {
        Some(store) => QueryInterface::new(store),
        None => pgrx::error!("pg_debug: capture store is not initialized"),
    }
}

// ============================================================================
// EXTENSION INITIALIZATION
// ============================================================================

/// Extension initialization hook.
/// Registers settings, creates the capture store and takes over both hooks.
#[pg_guard]
pub extern "C-unwind" fn _PG_init() {
    guc::register();
    if let Err(e) = logging::init() {
        pgrx::warning!("pg_debug: tracing subscriber not installed: {}", e);
    }

    let config = guc::capture_config();
    let store = match InMemoryCaptureStore::with_validated(config) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            pgrx::warning!("pg_debug: {}; using default capture settings", e);
            Arc::new(InMemoryCaptureStore::default())
        }
    };
    let capture = Arc::new(CaptureInterceptor::new(store.clone(), PgRenderer));

    let mut state = state_write();
    state.capture = Some(state.registry.install(capture));
    state.store = Some(store.clone());

    // SAFETY: hooks are process-global and only touched from the backend's
    // single thread during library load and unload.
    unsafe {
        state.prev_post_parse_analyze = pg_sys::post_parse_analyze_hook;
        pg_sys::post_parse_analyze_hook = Some(pg_debug_post_parse_analyze);
        state.prev_planner = pg_sys::planner_hook;
        pg_sys::planner_hook = Some(pg_debug_planner);
    }

    let config = store.config();
    pgrx::log!(
        "pg_debug: hooks installed (capacity {}, overflow {})",
        config.capacity,
        config.overflow_policy
    );
}

/// Extension finalization hook.
/// Restores whatever hooks were active before `_PG_init`.
#[pg_guard]
pub extern "C-unwind" fn _PG_fini() {
    let mut state = state_write();

    // SAFETY: see _PG_init.
    unsafe {
        pg_sys::post_parse_analyze_hook = state.prev_post_parse_analyze.take();
        pg_sys::planner_hook = state.prev_planner.take();
    }

    if let Some((parse_id, plan_id)) = state.capture.take() {
        if let Err(e) = state
            .registry
            .uninstall_parse_analyze(parse_id)
            .and_then(|_| state.registry.uninstall_planner(plan_id))
        {
            pgrx::warning!("pg_debug: {}", e);
        }
    }
    pgrx::log!("pg_debug: hooks removed");
}

// ============================================================================
// HOOKS
// ============================================================================

#[pg_guard]
unsafe extern "C-unwind" fn pg_debug_post_parse_analyze(
    pstate: *mut pg_sys::ParseState,
    query: *mut pg_sys::Query,
    jstate: *mut pg_sys::JumbleState,
) {
    // The lock is released before dispatch: planning a statement can parse
    // and plan others, which re-enters this hook.
    let (registry, prev) = {
        let state = state_read();
        (state.registry.clone(), state.prev_post_parse_analyze)
    };

    // SAFETY: the server hands over a valid Query or null.
    let Some(query) = (unsafe { query.as_mut() }) else {
        if let Some(prev) = prev {
            // SAFETY: forwarding the server's own arguments. The boundary turns
            // an ERROR raised by the previous hook into a Rust panic.
            unsafe { pg_sys::ffi::pg_guard_ffi_boundary(|| prev(pstate, query, jstate)) };
        }
        return;
    };

    let terminal = |state: &PgParseState, query: &mut pg_sys::Query| -> Result<(), Infallible> {
        if let Some(prev) = prev {
            let query: *mut pg_sys::Query = query;
            // SAFETY: forwarding the server's own arguments.
            unsafe {
                pg_sys::ffi::pg_guard_ffi_boundary(|| prev(state.pstate, query, state.jstate))
            };
        }
        Ok(())
    };

    into_ok(registry.post_parse_analyze(&PgParseState { pstate, jstate }, query, &terminal));
}

#[pg_guard]
unsafe extern "C-unwind" fn pg_debug_planner(
    parse: *mut pg_sys::Query,
    query_string: *const c_char,
    cursor_options: c_int,
    bound_params: pg_sys::ParamListInfo,
) -> *mut pg_sys::PlannedStmt {
    let (registry, prev) = {
        let state = state_read();
        (state.registry.clone(), state.prev_planner)
    };
    let params = PgPlanParams {
        query_string,
        cursor_options,
        bound_params,
    };

    let terminal = |query: &mut pg_sys::Query,
                    params: &PgPlanParams|
     -> Result<*mut pg_sys::PlannedStmt, Infallible> {
        Ok(delegate_planner(prev, query, params))
    };

    // SAFETY: the server hands over a valid Query or null.
    match unsafe { parse.as_mut() } {
        Some(query) => into_ok(registry.plan(query, &params, &terminal)),
        None => delegate_planner(prev, parse, &params),
    }
}

/// The planner that was active before this extension, or the standard one.
fn delegate_planner(
    prev: pg_sys::planner_hook_type,
    query: *mut pg_sys::Query,
    params: &PgPlanParams,
) -> *mut pg_sys::PlannedStmt {
    // SAFETY: arguments come straight from the planner hook invocation. A
    // previous hook is a raw C pointer, so it runs inside an FFI boundary.
    unsafe {
        match prev {
            Some(prev) => pg_sys::ffi::pg_guard_ffi_boundary(|| {
                prev(
                    query,
                    params.query_string,
                    params.cursor_options,
                    params.bound_params,
                )
            }),
            None => pg_sys::standard_planner(
                query,
                params.query_string,
                params.cursor_options,
                params.bound_params,
            ),
        }
    }
}

// ============================================================================
// SQL FUNCTIONS
// ============================================================================

/// Captured statements, ascending by id. `sql_id = 0` returns all of them.
#[pg_extern]
fn pg_debug_sql_info(
    sql_id: default!(i64, 0),
) -> TableIterator<
    'static,
    (
        name!(sql_id, i64),
        name!(sql_str, String),
        name!(parse_tree, Option<String>),
        name!(rewritten_parse_tree, Option<String>),
        name!(plan, Option<String>),
    ),
> {
    let filter: SequenceId = or_error(parse_filter(sql_id).map_err(Into::into));

    // The set-returning plumbing rejects callers that cannot take a row set
    // before this body runs.
    let rows = or_error(query_interface().sql_info(&CallerContext::set_returning(), filter));

    TableIterator::new(rows.into_iter().map(|row| {
        (
            i64::from(row.sql_id),
            row.sql_str,
            row.parse_tree,
            row.rewritten_parse_tree,
            row.plan,
        )
    }))
}

/// Does nothing; captured statements stay readable.
#[pg_extern]
fn pg_debug_sql_info_reset() {
    or_error(query_interface().sql_info_reset());
}

/// Record counts and settings of this backend's capture store.
#[pg_extern]
fn pg_debug_stats() -> pgrx::JsonB {
    let stats = or_error(query_interface().stats());
    let overflow_policy = state_read()
        .store
        .as_ref()
        .map(|store| store.config().overflow_policy.as_str());

    let mut value = match serde_json::to_value(&stats) {
        Ok(v) => v,
        Err(e) => {
            pgrx::warning!("pg_debug: JSON serialization failed: {}", e);
            serde_json::Value::Null
        }
    };
    if let Some(obj) = value.as_object_mut() {
        obj.insert("overflow_policy".to_string(), serde_json::json!(overflow_policy));
    }
    pgrx::JsonB(value)
}

#[pg_extern]
fn pg_debug_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// Drop every captured statement (for testing). Ids are not reused.
#[cfg(any(feature = "debug", feature = "pg_test"))]
#[pg_extern]
fn pg_debug_clear() -> &'static str {
    pgrx::warning!("DEBUG: pg_debug_clear called - dropping captured statements");
    match state_read().store.clone() {
        Some(store) => {
            or_error(store.clear());
            "cleared"
        }
        None => "not initialized",
    }
}

// ============================================================================
// PGRX INTEGRATION TESTS
// ============================================================================

#[cfg(any(test, feature = "pg_test"))]
#[pgrx::pg_schema]
mod tests {
    use crate::guc::GucValues;
    use pgdebug_core::{CaptureConfig, OverflowPolicy};
    use pgrx::prelude::*;
    use std::ffi::{c_char, c_int};

    type Row = (i64, String, Option<String>, Option<String>, Option<String>);

    fn rows(filter: i64) -> Vec<Row> {
        crate::pg_debug_sql_info(filter).collect()
    }

    fn find(sql: &str) -> Row {
        rows(0)
            .into_iter()
            .rev()
            .find(|row| row.1 == sql)
            .expect("statement was not captured")
    }

    #[pg_test]
    fn test_pg_debug_version() {
        assert_eq!(crate::pg_debug_version(), env!("CARGO_PKG_VERSION"));
    }

    #[pg_test]
    fn test_statement_is_captured_with_every_snapshot() {
        Spi::run("SELECT 41 + 1").unwrap();

        let row = find("SELECT 41 + 1");
        assert!(row.0 > 0);
        assert!(row.2.as_deref().unwrap().contains("QUERY"));
        assert!(row.3.as_deref().unwrap().contains("QUERY"));
        assert!(row.4.as_deref().unwrap().contains("PLANNEDSTMT"));
    }

    #[pg_test]
    fn test_filter_returns_single_row() {
        Spi::run("SELECT 1").unwrap();
        Spi::run("SELECT 2").unwrap();

        let first = find("SELECT 1");
        let second = find("SELECT 2");
        assert!(first.0 < second.0);

        let only = rows(first.0);
        assert_eq!(only.len(), 1);
        assert_eq!(only[0].1, "SELECT 1");
        assert!(rows(i64::from(u32::MAX)).is_empty());
    }

    #[pg_test]
    fn test_all_rows_ascending() {
        Spi::run("SELECT 1").unwrap();
        Spi::run("SELECT 2").unwrap();

        let ids: Vec<i64> = rows(0).into_iter().map(|row| row.0).collect();
        let mut sorted = ids.clone();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(ids, sorted);
    }

    #[pg_test]
    fn test_utility_statement_has_no_plan() {
        Spi::run("SET work_mem = '8MB'").unwrap();

        let row = find("SET work_mem = '8MB'");
        assert!(row.2.is_some());
        assert!(row.4.is_none());
    }

    #[pg_test]
    fn test_reset_is_noop() {
        Spi::run("SELECT 'kept'").unwrap();
        let before = find("SELECT 'kept'");

        crate::pg_debug_sql_info_reset();
        assert_eq!(find("SELECT 'kept'"), before);
    }

    #[pg_test(error = "pg_debug: Query error: Invalid statement id filter: -1")]
    fn test_negative_filter_is_rejected() {
        crate::pg_debug_sql_info(-1).for_each(drop);
    }

    #[pg_test]
    fn test_sql_surface() {
        let count = Spi::get_one::<i64>("SELECT count(*) FROM pg_debug_sql_info()")
            .unwrap()
            .unwrap();
        assert!(count > 0);
    }

    #[pg_test]
    fn test_stats() {
        Spi::run("SELECT 1").unwrap();

        let stats = crate::pg_debug_stats().0;
        assert!(stats["captured"].as_u64().unwrap() > 0);
        assert_eq!(stats["capacity"], CaptureConfig::DEFAULT_CAPACITY);
        assert_eq!(stats["overflow_policy"], "reject");
        assert_eq!(stats["refused"], 0);
        assert!(stats["oldest_captured_at"].is_string());
        assert!(stats["last_planned_at"].is_string());
    }

    #[pg_test]
    fn test_clear_keeps_ids_increasing() {
        Spi::run("SELECT 'before'").unwrap();
        let before = find("SELECT 'before'");

        crate::pg_debug_clear();
        Spi::run("SELECT 'after'").unwrap();

        let after = find("SELECT 'after'");
        assert!(after.0 > before.0);
        assert!(rows(before.0).is_empty());
    }

    #[pg_test]
    fn test_guc_overlay() {
        let base = CaptureConfig {
            capacity: 16,
            ..CaptureConfig::default()
        };
        assert_eq!(GucValues::boot().overlay(base.clone()), base);

        let set = GucValues {
            capacity: 4,
            evict_oldest: true,
            max_snapshot_bytes: 1024,
            stamp_query_id: true,
        };
        let config = set.overlay(base);
        assert_eq!(config.capacity, 4);
        assert_eq!(config.overflow_policy, OverflowPolicy::EvictOldest);
        assert_eq!(config.max_snapshot_bytes, Some(1024));
        assert!(config.stamp_query_id);
    }

    #[pg_test]
    fn test_settings_are_registered() {
        let capacity = Spi::get_one::<String>("SELECT current_setting('pg_debug.capacity')").unwrap().unwrap();
        assert_eq!(capacity, CaptureConfig::DEFAULT_CAPACITY.to_string());
    }

    #[pg_test(error = "parameter \"pg_debug.capacity\" cannot be changed without restarting the server")]
    fn test_capacity_cannot_be_set_per_session() {
        Spi::run("SET pg_debug.capacity = 4").unwrap();
    }

    #[pg_guard]
    unsafe extern "C-unwind" fn failing_post_parse_analyze(
        _pstate: *mut pg_sys::ParseState,
        _query: *mut pg_sys::Query,
        _jstate: *mut pg_sys::JumbleState,
    ) {
        pgrx::error!("previous parse analysis hook failed");
    }

    #[pg_guard]
    unsafe extern "C-unwind" fn failing_planner(
        _parse: *mut pg_sys::Query,
        _query_string: *const c_char,
        _cursor_options: c_int,
        _bound_params: pg_sys::ParamListInfo,
    ) -> *mut pg_sys::PlannedStmt {
        pgrx::error!("previous planner failed");
    }

    #[pg_test(error = "previous parse analysis hook failed")]
    fn test_previous_parse_analyze_error_reaches_client() {
        crate::state_write().prev_post_parse_analyze = Some(failing_post_parse_analyze);
        Spi::run("SELECT 'analyzed'").unwrap();
    }

    #[pg_test(error = "previous planner failed")]
    fn test_previous_planner_error_reaches_client() {
        crate::state_write().prev_planner = Some(failing_planner);
        Spi::run("SELECT 'planned'").unwrap();
    }
}

/// This module is required by `cargo pgrx test` invocations.
/// It must be visible at the root of your extension crate.
#[cfg(test)]
pub mod pg_test {
    pub fn setup(_options: Vec<&str>) {}

    pub fn postgresql_conf_options() -> Vec<&'static str> {
        vec!["shared_preload_libraries = 'pgdebug_pg'"]
    }
}
