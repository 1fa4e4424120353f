//! Timeouts, lost connections and degraded backends.

use super::{one, ready, ready_with};
use shadow_compare::session::{SessionError, SessionState};
use shadow_compare::testing::{ScriptedBackend, Step};
use shadow_core::{
    BackendError, Classification, ComparePolicy, FailureKind, Outcome, ReconcilePolicy, Role,
};
use std::time::{Duration, Instant};

fn refused() -> BackendError {
    BackendError::Unreachable {
        endpoint: "scripted".to_string(),
        reason: "connection refused".to_string(),
    }
}

#[tokio::test]
async fn test_hanging_candidate_times_out() {
    let mut h = ready(
        ScriptedBackend::new("mysql").on("SELECT SLEEP(10)", Step::reply(one())),
        ScriptedBackend::new("tidb").on("SELECT SLEEP(10)", Step::Hang),
    )
    .await;

    let started = Instant::now();
    let outcome = h.session.handle_query("SELECT SLEEP(10)").await.unwrap();
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(outcome, Outcome::Rows(one()));

    let report = &h.sink.reports()[0];
    assert_eq!(
        report.classification,
        Classification::OneSideFailed {
            failed: Role::Candidate
        }
    );
    let failure = report.candidate.as_failure().unwrap();
    assert_eq!(failure.kind, FailureKind::Timeout);
    assert_eq!(failure.code, 3024);
    assert_eq!(h.candidate.resets(), 1);
    assert_eq!(h.session.state(), SessionState::Ready);

    // The cancelled connection is replaced before the next statement
    h.session.handle_query("SELECT 1").await.unwrap();
    assert_eq!(h.candidate.connects(), 2);
    assert!(h.sink.reports()[1].is_match());
}

#[tokio::test]
async fn test_lost_connection_reconnects_and_restores_database() {
    let mut h = ready(
        ScriptedBackend::new("mysql"),
        ScriptedBackend::new("tidb").on("SELECT 1", Step::LoseConnection),
    )
    .await;

    h.session.handle_query("USE shop").await.unwrap();
    let outcome = h.session.handle_query("SELECT 1").await.unwrap();
    assert!(!outcome.is_failure());

    let report = &h.sink.reports()[0];
    assert_eq!(
        report.candidate.as_failure().map(|f| f.kind),
        Some(FailureKind::Connection)
    );
    assert_eq!(h.candidate.connects(), 2);
    assert_eq!(
        h.candidate.statements(),
        vec!["USE shop", "SELECT 1", "USE shop"]
    );
    assert_eq!(h.session.state(), SessionState::Ready);
}

#[tokio::test]
async fn test_timeout_reset_restores_session_variables() {
    let mut h = ready(
        ScriptedBackend::new("mysql").on("SELECT SLEEP(10)", Step::reply(one())),
        ScriptedBackend::new("tidb").on("SELECT SLEEP(10)", Step::Hang),
    )
    .await;

    h.session.handle_query("USE shop").await.unwrap();
    h.session.handle_query("SET autocommit = 0").await.unwrap();
    h.session
        .handle_query("SET SESSION sql_mode = 'ANSI'")
        .await
        .unwrap();
    assert!(!h.session.autocommit());

    h.session.handle_query("SELECT SLEEP(10)").await.unwrap();
    h.session
        .handle_query("INSERT INTO t VALUES (1)")
        .await
        .unwrap();

    assert_eq!(h.candidate.connects(), 2);
    assert_eq!(
        h.candidate.statements(),
        vec![
            "USE shop",
            "SET autocommit = 0",
            "SET SESSION sql_mode = 'ANSI'",
            "SELECT SLEEP(10)",
            "USE shop",
            "SET autocommit = 0",
            "SET SESSION sql_mode = 'ANSI'",
            "INSERT INTO t VALUES (1)",
        ]
    );
    // Nothing is replayed on the side that never reconnected
    assert_eq!(h.reference.connects(), 1);
    assert_eq!(h.reference.statements().len(), 5);
}

#[tokio::test]
async fn test_degraded_candidate_keeps_session_serving() {
    let mut h = ready(
        ScriptedBackend::new("mysql"),
        ScriptedBackend::new("tidb").on("SELECT 1", Step::LoseConnection),
    )
    .await;
    h.candidate.fail_connects(refused());

    let outcome = h.session.handle_query("SELECT 1").await.unwrap();
    assert!(!outcome.is_failure());
    assert_eq!(h.session.state(), SessionState::Degraded(Role::Candidate));
    assert!(!h.session.is_terminated());
    // One initial connect plus three reconnect attempts
    assert_eq!(h.candidate.connects(), 4);

    h.session.handle_query("SELECT 2").await.unwrap();
    let reports = h.sink.reports();
    assert_eq!(
        reports[1].candidate.as_failure().map(|f| f.kind),
        Some(FailureKind::Degraded)
    );
    assert_eq!(h.candidate.connects(), 4);
    assert_eq!(h.reference.statements(), vec!["SELECT 1", "SELECT 2"]);
}

#[tokio::test]
async fn test_degraded_reference_terminates_session() {
    let mut h = ready(
        ScriptedBackend::new("mysql").on("SELECT 1", Step::LoseConnection),
        ScriptedBackend::new("tidb"),
    )
    .await;
    h.reference.fail_connects(refused());

    let outcome = h.session.handle_query("SELECT 1").await.unwrap();
    assert_eq!(
        outcome.as_failure().map(|f| f.kind),
        Some(FailureKind::Connection)
    );
    assert!(h.session.is_terminated());

    let err = h.session.handle_query("SELECT 2").await.unwrap_err();
    assert!(matches!(err, SessionError::Terminated(Role::Reference)));
    assert_eq!(h.candidate.statements(), vec!["SELECT 1"]);

    h.session.finalize().await.unwrap();
    assert_eq!(h.session.state(), SessionState::Closed);
}

#[tokio::test]
async fn test_prefer_success_survives_degraded_reference() {
    let policy = ComparePolicy {
        reconcile: ReconcilePolicy::PreferSuccess,
        ..Default::default()
    };
    let mut h = ready_with(
        ScriptedBackend::new("mysql").on("SELECT 1", Step::LoseConnection),
        ScriptedBackend::new("tidb").on("SELECT 1", Step::reply(one())),
        policy,
    )
    .await;
    h.reference.fail_connects(refused());

    let outcome = h.session.handle_query("SELECT 1").await.unwrap();
    assert_eq!(outcome, Outcome::Rows(one()));
    assert!(!h.session.is_terminated());
    assert_eq!(h.session.state(), SessionState::Degraded(Role::Reference));
}
