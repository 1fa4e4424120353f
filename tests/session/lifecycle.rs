//! Session initialization, teardown and session-state commands.

use super::{harness_with, ready};
use shadow_compare::session::{SessionError, SessionState};
use shadow_compare::testing::{ScriptedBackend, Step};
use shadow_core::{Classification, ComparePolicy, Failure, Role, StatementKind};

#[tokio::test]
async fn test_initialize_opens_both_backends() {
    let h = ready(ScriptedBackend::new("mysql"), ScriptedBackend::new("tidb")).await;

    assert_eq!(h.session.state(), SessionState::Ready);
    assert_eq!(h.session.id(), 7);
    assert!(h.session.autocommit());
    assert_eq!(h.session.current_database(), None);
    assert_eq!(h.reference.connects(), 1);
    assert_eq!(h.candidate.connects(), 1);
    assert!(h.reference.is_connected());
    assert!(h.candidate.is_connected());
}

#[tokio::test]
async fn test_broken_candidate_rejects_session_without_report() {
    let mut h = harness_with(
        ScriptedBackend::new("mysql"),
        ScriptedBackend::new("tidb").refuse_connections(),
        ComparePolicy::default(),
    );

    let err = h.session.initialize().await.unwrap_err();
    match err {
        SessionError::ConnectFailure { role, .. } => assert_eq!(role, Role::Candidate),
        other => panic!("unexpected error: {other}"),
    }

    // No half-open session survives
    assert_eq!(h.session.state(), SessionState::Closed);
    assert_eq!(h.reference.closes(), 1);
    assert!(!h.reference.is_connected());
    assert!(h.sink.is_empty());
}

#[tokio::test]
async fn test_broken_reference_rejects_session() {
    let mut h = harness_with(
        ScriptedBackend::new("mysql").refuse_connections(),
        ScriptedBackend::new("tidb"),
        ComparePolicy::default(),
    );

    let err = h.session.initialize().await.unwrap_err();
    assert!(matches!(
        err,
        SessionError::ConnectFailure {
            role: Role::Reference,
            ..
        }
    ));
    assert!(!h.candidate.is_connected());
    assert!(h.sink.is_empty());
}

#[tokio::test]
async fn test_finalize_closes_both_backends_once() {
    let mut h = ready(ScriptedBackend::new("mysql"), ScriptedBackend::new("tidb")).await;

    h.session.finalize().await.unwrap();
    assert_eq!(h.session.state(), SessionState::Closed);
    assert_eq!(h.reference.closes(), 1);
    assert_eq!(h.candidate.closes(), 1);

    h.session.finalize().await.unwrap();
    assert_eq!(h.reference.closes(), 1);
}

#[tokio::test]
async fn test_statement_after_close_is_rejected() {
    let mut h = ready(ScriptedBackend::new("mysql"), ScriptedBackend::new("tidb")).await;
    h.session.finalize().await.unwrap();

    let err = h.session.handle_query("SELECT 1").await.unwrap_err();
    assert!(matches!(err, SessionError::InvalidTransition { .. }));
    assert!(h.reference.statements().is_empty());
}

#[tokio::test]
async fn test_use_tracks_current_database_without_report() {
    let mut h = ready(ScriptedBackend::new("mysql"), ScriptedBackend::new("tidb")).await;

    let outcome = h.session.handle_query("USE shop").await.unwrap();
    assert!(!outcome.is_failure());
    assert_eq!(h.session.current_database(), Some("shop"));
    assert_eq!(h.reference.statements(), vec!["USE shop"]);
    assert_eq!(h.candidate.statements(), vec!["USE shop"]);
    assert!(h.sink.is_empty());
}

#[tokio::test]
async fn test_init_db_rejected_by_candidate_is_reported() {
    let mut h = ready(
        ScriptedBackend::new("mysql"),
        ScriptedBackend::new("tidb").on(
            "USE shop",
            Step::reply(Failure::statement(1049, "Unknown database 'shop'")),
        ),
    )
    .await;

    let outcome = h.session.use_database("shop").await.unwrap();
    // The reference answer stands
    assert!(!outcome.is_failure());
    assert_eq!(h.session.current_database(), Some("shop"));

    let reports = h.sink.reports();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].kind, StatementKind::InitDb);
    assert_eq!(reports[0].statement, "USE `shop`");
    assert_eq!(
        reports[0].classification,
        Classification::OneSideFailed {
            failed: Role::Candidate
        }
    );
}

#[tokio::test]
async fn test_failed_use_keeps_previous_database() {
    let mut h = ready(
        ScriptedBackend::new("mysql").on(
            "USE missing",
            Step::reply(Failure::statement(1049, "Unknown database 'missing'")),
        ),
        ScriptedBackend::new("tidb").on(
            "USE missing",
            Step::reply(Failure::statement(1049, "Unknown database 'missing'")),
        ),
    )
    .await;

    h.session.handle_query("USE shop").await.unwrap();
    let outcome = h.session.handle_query("USE missing").await.unwrap();
    assert_eq!(outcome.as_failure().map(|f| f.code), Some(1049));
    assert_eq!(h.session.current_database(), Some("shop"));
    // Both rejected it the same way
    assert!(h.sink.is_empty());
}

#[tokio::test]
async fn test_set_autocommit_is_tracked() {
    let mut h = ready(ScriptedBackend::new("mysql"), ScriptedBackend::new("tidb")).await;

    h.session.handle_query("SET autocommit = 0").await.unwrap();
    assert!(!h.session.autocommit());
    h.session.handle_query("set @@session.autocommit=ON").await.unwrap();
    assert!(h.session.autocommit());

    h.session.handle_query("SET NAMES utf8mb4").await.unwrap();
    assert!(h.session.autocommit());
    assert_eq!(h.candidate.statements().len(), 3);
    assert!(h.sink.is_empty());
}
