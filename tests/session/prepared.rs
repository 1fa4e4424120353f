//! Prepared statement lifecycle across both backends.

use super::{ids, ready};
use shadow_compare::testing::{ScriptedBackend, Step};
use shadow_core::{
    Classification, ColumnMeta, Failure, Outcome, PreparedShape, Role, StatementKind, Value,
};

const LOOKUP: &str = "SELECT id FROM t WHERE id = ?";

#[tokio::test]
async fn test_prepare_execute_close() {
    let mut h = ready(
        ScriptedBackend::new("mysql").on(LOOKUP, Step::reply(ids(&[1]))),
        ScriptedBackend::new("tidb").on(LOOKUP, Step::reply(ids(&[1]))),
    )
    .await;

    let (id, outcome) = h.session.prepare(LOOKUP).await.unwrap();
    match &outcome {
        Outcome::Prepared(shape) => assert_eq!(shape.param_count, 1),
        other => panic!("expected a prepared statement, got {other:?}"),
    }
    assert_eq!(
        h.session.prepared_statement(id).map(|s| s.sql.as_str()),
        Some(LOOKUP)
    );

    let outcome = h
        .session
        .execute_prepared(id, &[Value::Int(1)])
        .await
        .unwrap();
    assert_eq!(outcome, Outcome::Rows(ids(&[1])));

    let reports = h.sink.reports();
    assert_eq!(reports.len(), 2);
    assert_eq!(reports[0].kind, StatementKind::Prepare);
    assert_eq!(reports[1].kind, StatementKind::Execute);
    assert_eq!(reports[1].statement, LOOKUP);
    assert!(reports.iter().all(|r| r.is_match()));

    h.session.close_prepared(id).await;
    assert!(h.session.prepared_statement(id).is_none());

    // Executing a closed statement never reaches the backends
    let outcome = h.session.execute_prepared(id, &[Value::Int(1)]).await.unwrap();
    assert_eq!(outcome.as_failure().map(|f| f.code), Some(1243));
    assert_eq!(h.sink.len(), 2);
    assert_eq!(
        h.reference.statements(),
        vec![format!("PREPARE {LOOKUP}"), format!("EXECUTE {LOOKUP}")]
    );
}

#[tokio::test]
async fn test_statement_ids_are_session_local_and_increasing() {
    let mut h = ready(ScriptedBackend::new("mysql"), ScriptedBackend::new("tidb")).await;

    let (first, _) = h.session.prepare("SELECT 1").await.unwrap();
    let (second, _) = h.session.prepare("SELECT 2").await.unwrap();
    assert_eq!(first, 1);
    assert_eq!(second, 2);
}

#[tokio::test]
async fn test_prepared_shape_mismatch_is_reported() {
    let shape = |columns: Vec<ColumnMeta>| PreparedShape {
        param_count: 1,
        params: Vec::new(),
        columns,
    };
    let mut h = ready(
        ScriptedBackend::new("mysql").on_prepare(
            LOOKUP,
            Step::reply(shape(vec![ColumnMeta::new("id", "BIGINT")])),
        ),
        ScriptedBackend::new("tidb").on_prepare(
            LOOKUP,
            Step::reply(shape(vec![
                ColumnMeta::new("id", "BIGINT"),
                ColumnMeta::new("name", "VARCHAR"),
            ])),
        ),
    )
    .await;

    let (_, outcome) = h.session.prepare(LOOKUP).await.unwrap();
    assert!(matches!(outcome, Outcome::Prepared(ref s) if s.columns.len() == 1));
    assert!(matches!(
        h.sink.reports()[0].classification,
        Classification::ShapeMismatch { .. }
    ));
}

#[tokio::test]
async fn test_prepare_rejected_by_reference_is_not_registered() {
    let mut h = ready(
        ScriptedBackend::new("mysql").on_prepare(
            "SELEC 1",
            Step::reply(Failure::statement(1064, "You have an error in your SQL syntax")),
        ),
        ScriptedBackend::new("tidb"),
    )
    .await;

    let (id, outcome) = h.session.prepare("SELEC 1").await.unwrap();
    assert_eq!(outcome.as_failure().map(|f| f.code), Some(1064));
    assert!(h.session.prepared_statement(id).is_none());
    assert_eq!(
        h.sink.reports()[0].classification,
        Classification::OneSideFailed {
            failed: Role::Reference
        }
    );
}
