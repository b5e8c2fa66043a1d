//! End-to-end capture through the mock host pipeline.

use pgdebug_test_utils::*;
use proptest::prelude::*;
use std::sync::{Arc, Mutex};

fn ids(rows: &[StatementRow]) -> Vec<SequenceId> {
    rows.iter().map(|r| r.sql_id).collect()
}

#[test]
fn test_select_one_then_select_two() {
    let fixture = CaptureFixture::default();
    fixture.host.execute("SELECT 1").unwrap();
    fixture.host.execute("SELECT 2").unwrap();

    let caller = CallerContext::set_returning();
    let first = fixture.query.sql_info(&caller, 1).unwrap();
    assert_eq!(ids(&first), vec![1]);
    assert_eq!(first[0].sql_str, "SELECT 1");

    assert_eq!(ids(&fixture.rows()), vec![1, 2]);
}

#[test]
fn test_completed_statement_has_every_column() {
    let fixture = CaptureFixture::default();
    let sql = "  SELECT 'ünïcode' AS x  ";
    fixture.host.execute(sql).unwrap();

    let row = fixture.rows().remove(0);
    assert_eq!(row.sql_str, sql);
    assert!(row.parse_tree.unwrap().contains(":rewritten false"));
    assert!(row.rewritten_parse_tree.unwrap().contains(":rewritten true"));
    assert!(row.plan.unwrap().starts_with("{PLANNEDSTMT"));
}

#[test]
fn test_failed_planning_leaves_partial_record() {
    let fixture = CaptureFixture::default();
    let err = fixture.host.execute("SELECT FAIL_PLAN").unwrap_err();
    assert!(matches!(err, MockError::Planner(_)));

    let row = fixture.rows().remove(0);
    assert_eq!(row.sql_str, "SELECT FAIL_PLAN");
    assert!(row.parse_tree.is_some());
    assert!(row.rewritten_parse_tree.is_some());
    assert!(row.plan.is_none());
    assert_eq!(fixture.capture.pending_id(), None);

    fixture.host.execute("SELECT 2").unwrap();
    assert!(fixture.rows()[1].plan.is_some());
}

#[test]
fn test_syntax_error_consumes_no_id() {
    let fixture = CaptureFixture::default();
    assert!(fixture.host.execute("!garbage").is_err());
    fixture.host.execute("SELECT 1").unwrap();
    assert_eq!(ids(&fixture.rows()), vec![1]);
}

#[test]
fn test_utility_statement_is_captured_without_plan() {
    let fixture = CaptureFixture::default();
    assert_eq!(fixture.host.execute("BEGIN").unwrap(), None);
    fixture.host.execute("SELECT 1").unwrap();

    let rows = fixture.rows();
    assert_eq!(ids(&rows), vec![1, 2]);
    assert!(rows[0].parse_tree.is_some());
    assert!(rows[0].rewritten_parse_tree.is_none());
    assert!(rows[0].plan.is_none());
    assert!(rows[1].plan.is_some());
}

#[test]
fn test_unassigned_filter_is_empty() {
    let fixture = CaptureFixture::default();
    fixture.host.execute("SELECT 1").unwrap();
    let rows = fixture
        .query
        .sql_info(&CallerContext::set_returning(), 42)
        .unwrap();
    assert!(rows.is_empty());
}

#[test]
fn test_reset_leaves_history_readable() {
    let fixture = CaptureFixture::default();
    fixture.host.execute("SELECT 1").unwrap();
    let before = fixture.rows();

    fixture.query.sql_info_reset().unwrap();
    assert_eq!(fixture.rows(), before);

    fixture.host.execute("SELECT 2").unwrap();
    assert_eq!(ids(&fixture.rows()), vec![1, 2]);
}

#[test]
fn test_capture_does_not_change_plan() {
    let bare = MockHost::new();
    let fixture = CaptureFixture::default();

    let expected = bare.execute("SELECT a FROM t").unwrap();
    let observed = fixture.host.execute("SELECT a FROM t").unwrap();
    assert_eq!(expected, observed);
}

#[test]
fn test_stamp_query_id() {
    let fixture = CaptureFixture::new(CaptureConfig {
        stamp_query_id: true,
        ..CaptureConfig::default()
    });
    fixture.host.execute("SELECT 1").unwrap();
    let plan = fixture.host.execute("SELECT 2").unwrap().unwrap();
    assert_eq!(plan.query_id, 2);

    let plain = CaptureFixture::default();
    let plan = plain.host.execute("SELECT 1").unwrap().unwrap();
    assert_eq!(plan.query_id, 0);
}

#[test]
fn test_reject_policy_keeps_running_statements() {
    let fixture = CaptureFixture::new(CaptureConfig {
        capacity: 2,
        ..CaptureConfig::default()
    });
    for sql in ["SELECT 1", "SELECT 2", "SELECT 3"] {
        assert!(fixture.host.execute(sql).unwrap().is_some());
    }

    assert_eq!(ids(&fixture.rows()), vec![1, 2]);
    assert_eq!(fixture.store.latest_id().unwrap(), 2);
    assert!(fixture.rows().iter().all(|r| r.plan.is_some()));
}

#[test]
fn test_full_store_warns_once() {
    let fixture = CaptureFixture::new(CaptureConfig {
        capacity: 2,
        ..CaptureConfig::default()
    });

    let (_, warnings) = count_warnings(|| {
        for i in 0..1000 {
            fixture.host.execute(&format!("SELECT {}", i)).unwrap();
        }
    });

    assert_eq!(warnings, 1);
    assert_eq!(ids(&fixture.rows()), vec![1, 2]);
    assert_eq!(fixture.query.stats().unwrap().refused, 998);
}

#[test]
fn test_full_store_warns_again_after_room_frees_up() {
    let fixture = CaptureFixture::new(CaptureConfig {
        capacity: 1,
        ..CaptureConfig::default()
    });

    let (_, warnings) = count_warnings(|| {
        fixture.host.execute("SELECT 1").unwrap();
        fixture.host.execute("SELECT 2").unwrap();
        fixture.host.execute("SELECT 3").unwrap();
        fixture.store.clear().unwrap();
        fixture.host.execute("SELECT 4").unwrap();
        fixture.host.execute("SELECT 5").unwrap();
    });

    assert_eq!(warnings, 2);
    assert_eq!(fixture.rows()[0].sql_str, "SELECT 4");
}

#[test]
fn test_evict_oldest_keeps_newest() {
    let fixture = CaptureFixture::new(CaptureConfig {
        capacity: 2,
        overflow_policy: OverflowPolicy::EvictOldest,
        ..CaptureConfig::default()
    });
    for sql in ["SELECT 1", "SELECT 2", "SELECT 3"] {
        fixture.host.execute(sql).unwrap();
    }

    let rows = fixture.rows();
    assert_eq!(ids(&rows), vec![2, 3]);
    assert_eq!(rows[1].sql_str, "SELECT 3");
    assert!(rows[1].plan.is_some());
}

#[test]
fn test_snapshots_are_truncated() {
    let fixture = CaptureFixture::new(CaptureConfig {
        max_snapshot_bytes: Some(24),
        ..CaptureConfig::default()
    });
    let sql = "SELECT a_rather_long_column_name FROM a_rather_long_table_name";
    fixture.host.execute(sql).unwrap();

    let row = fixture.rows().remove(0);
    assert_eq!(row.sql_str, sql);
    assert!(row.parse_tree.unwrap().contains("[truncated,"));
    assert!(row.plan.unwrap().contains("[truncated,"));
}

#[test]
fn test_nested_statement_does_not_steal_outer_plan() {
    let store = Arc::new(InMemoryCaptureStore::default());
    let capture = Arc::new(CaptureInterceptor::new(store.clone(), MockRenderer));

    // What a nested statement runs through
    let mut inner = HookRegistry::<MockPipeline>::new();
    inner.install(capture.clone());

    // The outer statement: the nested one is planned inside capture's delegate
    let mut host = MockHost::new();
    host.registry
        .install_planner(NestedStatementInterceptor::new(inner, "SELECT inner_fn()"));
    host.registry.install(capture.clone());

    host.execute("SELECT outer_fn()").unwrap();

    let rows = QueryInterface::new(store)
        .sql_info(&CallerContext::set_returning(), ALL_STATEMENTS)
        .unwrap();
    assert_eq!(ids(&rows), vec![1, 2]);

    assert_eq!(rows[0].sql_str, "SELECT outer_fn()");
    assert!(rows[0].plan.as_deref().unwrap().contains("outer_fn"));
    assert_eq!(rows[1].sql_str, "SELECT inner_fn()");
    assert!(rows[1].plan.as_deref().unwrap().contains("inner_fn"));
    assert_eq!(capture.pending_id(), None);
}

#[test]
fn test_outer_record_evicted_during_planning_is_skipped() {
    let store = Arc::new(InMemoryCaptureStore::new(CaptureConfig {
        capacity: 1,
        overflow_policy: OverflowPolicy::EvictOldest,
        ..CaptureConfig::default()
    }));
    let capture = Arc::new(CaptureInterceptor::new(store.clone(), MockRenderer));

    let mut inner = HookRegistry::<MockPipeline>::new();
    inner.install(capture.clone());

    let mut host = MockHost::new();
    host.registry
        .install_planner(NestedStatementInterceptor::new(inner, "SELECT inner_fn()"));
    host.registry.install(capture.clone());

    // The nested parse evicts the outer record before its plan is written
    let (plan, warnings) = count_warnings(|| host.execute("SELECT outer_fn()"));

    let plan = plan.unwrap().unwrap();
    assert!(plan.text.contains("outer_fn"));
    assert_eq!(warnings, 1);

    let rows = QueryInterface::new(store)
        .sql_info(&CallerContext::set_returning(), ALL_STATEMENTS)
        .unwrap();
    assert_eq!(ids(&rows), vec![2]);
    assert_eq!(rows[0].sql_str, "SELECT inner_fn()");
    assert!(rows[0].parse_tree.is_some());
    assert!(rows[0].rewritten_parse_tree.is_some());
    assert!(rows[0].plan.as_deref().unwrap().contains("inner_fn"));
    assert_eq!(capture.pending_id(), None);
}

#[test]
fn test_capture_composes_with_other_interceptors() {
    let events = Arc::new(Mutex::new(Vec::new()));
    let mut fixture = CaptureFixture::default();
    let (parse_id, plan_id) = fixture
        .host
        .registry
        .install(RecordingInterceptor::new("outer", events.clone()));

    fixture.host.execute("SELECT 1").unwrap();
    assert_eq!(
        *events.lock().unwrap(),
        vec!["outer:parse:pre", "outer:parse:post", "outer:plan:pre", "outer:plan:post"]
    );
    assert!(fixture.rows()[0].plan.is_some());

    fixture.host.registry.uninstall_parse_analyze(parse_id).unwrap();
    fixture.host.registry.uninstall_planner(plan_id).unwrap();
    fixture.host.execute("SELECT 2").unwrap();
    assert_eq!(events.lock().unwrap().len(), 4);
    assert_eq!(ids(&fixture.rows()), vec![1, 2]);
}

#[test]
fn test_uninstalled_capture_stops_recording() {
    let store = Arc::new(InMemoryCaptureStore::default());
    let capture = Arc::new(CaptureInterceptor::new(store.clone(), MockRenderer));
    let mut host = MockHost::new();
    let (parse_id, plan_id) = host.registry.install(capture);

    host.execute("SELECT 1").unwrap();
    host.registry.uninstall_planner(plan_id).unwrap();
    host.registry.uninstall_parse_analyze(parse_id).unwrap();
    host.execute("SELECT 2").unwrap();

    assert_eq!(store.len().unwrap(), 1);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_ids_are_dense_and_text_exact(batch in arb_statement_batch(32)) {
        let fixture = CaptureFixture::default();
        for sql in &batch {
            fixture.host.execute(sql).unwrap();
        }

        let rows = fixture.rows();
        let expected: Vec<SequenceId> = (1..=batch.len() as SequenceId).collect();
        prop_assert_eq!(ids(&rows), expected);
        for (row, sql) in rows.iter().zip(&batch) {
            prop_assert_eq!(&row.sql_str, sql);
            prop_assert!(row.parse_tree.is_some());
        }
    }

    #[test]
    fn prop_planned_statements_have_plans(batch in prop::collection::vec(arb_select_statement(), 1..16)) {
        let fixture = CaptureFixture::default();
        for sql in &batch {
            fixture.host.execute(sql).unwrap();
        }

        let stats = fixture.query.stats().unwrap();
        prop_assert_eq!(stats.completed_plans, batch.len());
        prop_assert_eq!(stats.latest_id as usize, batch.len());
    }
}
