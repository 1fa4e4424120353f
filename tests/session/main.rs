//! Session E2E tests
//!
//! Drive full sessions against scripted in-process backends: lifecycle,
//! comparison and reconciliation, prepared statements, timeouts and
//! reconnection. No database is required.

mod comparison;
mod lifecycle;
mod prepared;
mod resilience;

use shadow_compare::connection::RetryPolicy;
use shadow_compare::session::{Session, SessionConfig};
use shadow_compare::testing::{MemorySink, ScriptHandle, ScriptedBackend};
use shadow_core::{ColumnMeta, ComparePolicy, ResultSet, Value};
use std::sync::Arc;
use std::time::Duration;

/// A session plus handles on everything it touches.
pub struct Harness {
    pub session: Session,
    pub reference: ScriptHandle,
    pub candidate: ScriptHandle,
    pub sink: Arc<MemorySink>,
}

pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter("shadow_compare=debug")
        .try_init()
        .ok();
}

pub fn config(policy: ComparePolicy, sink: Arc<MemorySink>) -> SessionConfig {
    SessionConfig::new(policy, sink)
        .with_statement_timeout(Duration::from_millis(200))
        .with_retry(RetryPolicy {
            max_attempts: 3,
            backoff: Duration::from_millis(1),
        })
}

pub fn harness_with(
    reference: ScriptedBackend,
    candidate: ScriptedBackend,
    policy: ComparePolicy,
) -> Harness {
    init_tracing();
    let sink = Arc::new(MemorySink::new());
    let reference_handle = reference.handle();
    let candidate_handle = candidate.handle();
    let session = Session::new(
        7,
        Box::new(reference),
        Box::new(candidate),
        &config(policy, sink.clone()),
    );
    Harness {
        session,
        reference: reference_handle,
        candidate: candidate_handle,
        sink,
    }
}

/// A harness whose session is already initialized.
pub async fn ready(reference: ScriptedBackend, candidate: ScriptedBackend) -> Harness {
    ready_with(reference, candidate, ComparePolicy::default()).await
}

pub async fn ready_with(
    reference: ScriptedBackend,
    candidate: ScriptedBackend,
    policy: ComparePolicy,
) -> Harness {
    let mut harness = harness_with(reference, candidate, policy);
    harness
        .session
        .initialize()
        .await
        .expect("session should initialize");
    harness
}

pub fn one() -> ResultSet {
    ResultSet::new(
        vec![ColumnMeta::new("1", "BIGINT")],
        vec![vec![Value::Int(1)]],
    )
}

pub fn version(v: &str) -> ResultSet {
    ResultSet::new(
        vec![ColumnMeta::new("version()", "VARCHAR")],
        vec![vec![Value::text(v)]],
    )
}

pub fn ids(values: &[i64]) -> ResultSet {
    ResultSet::new(
        vec![ColumnMeta::new("id", "BIGINT")],
        values.iter().map(|v| vec![Value::Int(*v)]).collect(),
    )
}
