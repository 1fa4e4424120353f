//! Comparison and reconciliation through a live session.

use super::{ids, one, ready, ready_with, version};
use shadow_compare::testing::{ScriptedBackend, Step};
use shadow_core::{
    Classification, ComparePolicy, ErrorEquivalence, Failure, OrderingMode, Outcome,
    ReconcilePolicy, ResultSet, Role, StatementKind,
};

#[tokio::test]
async fn test_select_one_matches() {
    let mut h = ready(
        ScriptedBackend::new("mysql").on("SELECT 1", Step::reply(one())),
        ScriptedBackend::new("tidb").on("SELECT 1", Step::reply(one())),
    )
    .await;

    let outcome = h.session.handle_query("SELECT 1").await.unwrap();
    assert_eq!(outcome, Outcome::Rows(one()));

    let reports = h.sink.reports();
    assert_eq!(reports.len(), 1);
    assert!(reports[0].is_match());
    assert_eq!(reports[0].session_id, 7);
    assert_eq!(reports[0].kind, StatementKind::Query);
    assert_eq!(reports[0].statement, "SELECT 1");
}

#[tokio::test]
async fn test_version_mismatch_returns_reference_value() {
    let mut h = ready(
        ScriptedBackend::new("mysql").on("SELECT version()", Step::reply(version("8.0.36"))),
        ScriptedBackend::new("tidb").on(
            "SELECT version()",
            Step::reply(version("8.0.11-TiDB-v7.5.0")),
        ),
    )
    .await;

    let outcome = h.session.handle_query("SELECT version()").await.unwrap();
    assert_eq!(outcome, Outcome::Rows(version("8.0.36")));

    let reports = h.sink.reports();
    assert_eq!(reports.len(), 1);
    assert_eq!(
        reports[0].classification,
        Classification::ValueMismatch { row: 0, column: 0 }
    );
    assert_eq!(reports[0].candidate, Outcome::Rows(version("8.0.11-TiDB-v7.5.0")));
}

#[tokio::test]
async fn test_statements_reach_both_backends_in_order() {
    let mut h = ready(ScriptedBackend::new("mysql"), ScriptedBackend::new("tidb")).await;

    for sql in ["INSERT INTO t VALUES (1)", "UPDATE t SET a = 2", "DELETE FROM t"] {
        h.session.handle_query(sql).await.unwrap();
    }
    let expected = vec![
        "INSERT INTO t VALUES (1)",
        "UPDATE t SET a = 2",
        "DELETE FROM t",
    ];
    assert_eq!(h.reference.statements(), expected);
    assert_eq!(h.candidate.statements(), expected);
    assert_eq!(h.sink.len(), 3);
}

#[tokio::test]
async fn test_affected_rows_mismatch() {
    let mut h = ready(
        ScriptedBackend::new("mysql").on("DELETE FROM t", Step::reply(ResultSet::ok(3))),
        ScriptedBackend::new("tidb").on("DELETE FROM t", Step::reply(ResultSet::ok(2))),
    )
    .await;

    let outcome = h.session.handle_query("DELETE FROM t").await.unwrap();
    assert_eq!(outcome, Outcome::Rows(ResultSet::ok(3)));
    assert_eq!(
        h.sink.reports()[0].classification,
        Classification::RowCountMismatch {
            reference: 3,
            candidate: 2
        }
    );
}

#[tokio::test]
async fn test_unordered_mode_ignores_row_order() {
    let policy = ComparePolicy {
        ordering: OrderingMode::Unordered,
        ..Default::default()
    };
    let mut h = ready_with(
        ScriptedBackend::new("mysql").on("SELECT id FROM t", Step::reply(ids(&[1, 2, 3]))),
        ScriptedBackend::new("tidb").on("SELECT id FROM t", Step::reply(ids(&[3, 1, 2]))),
        policy,
    )
    .await;
    assert_eq!(h.session.ordering(), OrderingMode::Unordered);

    let outcome = h.session.handle_query("SELECT id FROM t").await.unwrap();
    // The client still sees the reference order
    assert_eq!(outcome, Outcome::Rows(ids(&[1, 2, 3])));
    assert!(h.sink.reports()[0].is_match());

    h.session.set_ordering(OrderingMode::Ordered);
    h.session.handle_query("SELECT id FROM t").await.unwrap();
    let reports = h.sink.reports();
    assert_eq!(reports[1].ordering, OrderingMode::Ordered);
    assert_eq!(
        reports[1].classification,
        Classification::ValueMismatch { row: 0, column: 0 }
    );
}

#[tokio::test]
async fn test_candidate_error_is_reported_but_not_returned() {
    let mut h = ready(
        ScriptedBackend::new("mysql").on("SELECT * FROM t", Step::reply(ids(&[1]))),
        ScriptedBackend::new("tidb").on(
            "SELECT * FROM t",
            Step::reply(Failure::statement(1146, "Table 'test.t' doesn't exist")),
        ),
    )
    .await;

    let outcome = h.session.handle_query("SELECT * FROM t").await.unwrap();
    assert_eq!(outcome, Outcome::Rows(ids(&[1])));
    assert_eq!(
        h.sink.reports()[0].classification,
        Classification::OneSideFailed {
            failed: Role::Candidate
        }
    );
}

#[tokio::test]
async fn test_prefer_success_returns_candidate_rows() {
    let policy = ComparePolicy {
        reconcile: ReconcilePolicy::PreferSuccess,
        ..Default::default()
    };
    let mut h = ready_with(
        ScriptedBackend::new("mysql").on(
            "SELECT * FROM t",
            Step::reply(Failure::statement(1146, "Table 'test.t' doesn't exist")),
        ),
        ScriptedBackend::new("tidb").on("SELECT * FROM t", Step::reply(ids(&[1]))),
        policy,
    )
    .await;

    let outcome = h.session.handle_query("SELECT * FROM t").await.unwrap();
    assert_eq!(outcome, Outcome::Rows(ids(&[1])));
    assert_eq!(
        h.sink.reports()[0].classification,
        Classification::OneSideFailed {
            failed: Role::Reference
        }
    );
}

#[tokio::test]
async fn test_equivalent_error_codes_match() {
    let policy = ComparePolicy {
        error_equivalence: ErrorEquivalence::new([vec![1105, 8001]]),
        ..Default::default()
    };
    let mut h = ready_with(
        ScriptedBackend::new("mysql")
            .on("SELECT f()", Step::reply(Failure::statement(1105, "unknown error")))
            .on("SELECT g()", Step::reply(Failure::statement(1064, "syntax"))),
        ScriptedBackend::new("tidb")
            .on("SELECT f()", Step::reply(Failure::statement(8001, "memory quota")))
            .on("SELECT g()", Step::reply(Failure::statement(1146, "no table"))),
        policy,
    )
    .await;

    let outcome = h.session.handle_query("SELECT f()").await.unwrap();
    assert_eq!(outcome.as_failure().map(|f| f.code), Some(1105));
    h.session.handle_query("SELECT g()").await.unwrap();

    let reports = h.sink.reports();
    assert!(reports[0].is_match());
    assert_eq!(
        reports[1].classification,
        Classification::BothFailedDifferently {
            reference_code: 1064,
            candidate_code: 1146
        }
    );
}
