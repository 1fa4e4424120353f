//! Proxy E2E tests
//!
//! A real MySQL client talks to the proxy over TCP while the proxy shadows
//! every statement onto two scripted backends.

use mysql_async::prelude::Queryable;
use mysql_async::{Conn, OptsBuilder};
use shadow_compare::auth::ProxyCredentials;
use shadow_compare::server::{BackendFactory, Proxy};
use shadow_compare::session::SessionConfig;
use shadow_compare::testing::{MemorySink, ScriptHandle, ScriptedBackend, Step};
use shadow_core::{Backend, Classification, ColumnMeta, ComparePolicy, Failure, ResultSet, Role, Value};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::broadcast;

const LOOKUP: &str = "SELECT id FROM t WHERE id = ?";

fn version(v: &str) -> ResultSet {
    ResultSet::new(
        vec![ColumnMeta::new("version()", "VARCHAR")],
        vec![vec![Value::text(v)]],
    )
}

fn ids(values: &[i64]) -> ResultSet {
    ResultSet::new(
        vec![ColumnMeta::new("id", "BIGINT")],
        values.iter().map(|v| vec![Value::Int(*v)]).collect(),
    )
}

/// Hands out a freshly scripted backend per role and keeps their handles.
#[derive(Default)]
struct ScriptedFactory {
    handles: Mutex<Vec<(Role, ScriptHandle)>>,
    candidate_down: bool,
}

impl ScriptedFactory {
    fn handle(&self, role: Role) -> Option<ScriptHandle> {
        self.handles
            .lock()
            .unwrap()
            .iter()
            .find(|(r, _)| *r == role)
            .map(|(_, h)| h.clone())
    }
}

impl BackendFactory for ScriptedFactory {
    fn create(&self, role: Role) -> Box<dyn Backend> {
        let backend = match role {
            Role::Reference => ScriptedBackend::new("mysql")
                .on("SELECT version()", Step::reply(version("8.0.36"))),
            Role::Candidate => ScriptedBackend::new("tidb")
                .on("SELECT version()", Step::reply(version("8.0.11-TiDB"))),
        }
        .on(LOOKUP, Step::reply(ids(&[42])))
        .on(
            "SELECT * FROM missing",
            Step::reply(Failure::statement(1146, "Table 'test.missing' doesn't exist")),
        )
        .on(
            "UPDATE t SET v = v + 1",
            Step::reply(Failure::statement(
                1213,
                "Deadlock found when trying to get lock; try restarting transaction",
            )),
        );
        let backend = if role == Role::Candidate && self.candidate_down {
            backend.refuse_connections()
        } else {
            backend
        };
        self.handles.lock().unwrap().push((role, backend.handle()));
        Box::new(backend)
    }
}

struct Running {
    port: u16,
    factory: Arc<ScriptedFactory>,
    sink: Arc<MemorySink>,
    shutdown: broadcast::Sender<()>,
}

async fn start_proxy() -> Running {
    start_proxy_with(ScriptedFactory::default()).await
}

async fn start_proxy_with(factory: ScriptedFactory) -> Running {
    tracing_subscriber::fmt()
        .with_env_filter("shadow_compare=debug")
        .try_init()
        .ok();

    let factory = Arc::new(factory);
    let sink = Arc::new(MemorySink::new());
    let proxy = Arc::new(Proxy::new(
        factory.clone(),
        ProxyCredentials::new("root", "secret"),
        SessionConfig::new(ComparePolicy::default(), sink.clone()),
    ));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let (shutdown, rx) = broadcast::channel(1);
    tokio::spawn(proxy.serve(listener, rx));

    Running {
        port,
        factory,
        sink,
        shutdown,
    }
}

fn client_opts(port: u16, pass: &str) -> OptsBuilder {
    OptsBuilder::default()
        .ip_or_hostname("127.0.0.1")
        .tcp_port(port)
        .user(Some("root"))
        .pass(Some(pass))
        .prefer_socket(false)
        .max_allowed_packet(Some(16 * 1024 * 1024))
        .wait_timeout(Some(28800))
}

#[tokio::test]
async fn test_client_sees_reference_results() {
    let proxy = start_proxy().await;
    let mut conn = Conn::new(client_opts(proxy.port, "secret")).await.unwrap();

    let version: Option<String> = conn.query_first("SELECT version()").await.unwrap();
    assert_eq!(version.as_deref(), Some("8.0.36"));

    let reports = proxy.sink.reports();
    let report = reports
        .iter()
        .find(|r| r.statement == "SELECT version()")
        .expect("report for SELECT version()");
    assert_eq!(
        report.classification,
        Classification::ValueMismatch { row: 0, column: 0 }
    );

    let candidate = proxy.factory.handle(Role::Candidate).unwrap();
    assert!(candidate
        .statements()
        .contains(&"SELECT version()".to_string()));

    conn.disconnect().await.unwrap();
    proxy.shutdown.send(()).ok();
}

#[tokio::test]
async fn test_prepared_statement_through_proxy() {
    let proxy = start_proxy().await;
    let mut conn = Conn::new(client_opts(proxy.port, "secret")).await.unwrap();

    let id: Option<i64> = conn.exec_first(LOOKUP, (42,)).await.unwrap();
    assert_eq!(id, Some(42));

    let reference = proxy.factory.handle(Role::Reference).unwrap();
    assert!(reference
        .statements()
        .contains(&format!("EXECUTE {LOOKUP}")));

    conn.disconnect().await.unwrap();
    proxy.shutdown.send(()).ok();
}

#[tokio::test]
async fn test_backend_error_is_relayed() {
    let proxy = start_proxy().await;
    let mut conn = Conn::new(client_opts(proxy.port, "secret")).await.unwrap();

    let err = conn
        .query_drop("SELECT * FROM missing")
        .await
        .unwrap_err();
    match err {
        mysql_async::Error::Server(e) => {
            assert_eq!(e.code, 1146);
            assert_eq!(e.message, "Table 'test.missing' doesn't exist");
        }
        other => panic!("unexpected error: {other}"),
    }

    // The connection stays usable
    let version: Option<String> = conn.query_first("SELECT version()").await.unwrap();
    assert_eq!(version.as_deref(), Some("8.0.36"));

    conn.disconnect().await.unwrap();
    proxy.shutdown.send(()).ok();
}

#[tokio::test]
async fn test_deadlock_code_reaches_client() {
    let proxy = start_proxy().await;
    let mut conn = Conn::new(client_opts(proxy.port, "secret")).await.unwrap();

    let err = conn
        .query_drop("UPDATE t SET v = v + 1")
        .await
        .unwrap_err();
    match err {
        mysql_async::Error::Server(e) => {
            assert_eq!(e.code, 1213);
            assert!(e.message.starts_with("Deadlock found"));
        }
        other => panic!("unexpected error: {other}"),
    }

    conn.disconnect().await.unwrap();
    proxy.shutdown.send(()).ok();
}

#[tokio::test]
async fn test_unreachable_candidate_refuses_client() {
    let proxy = start_proxy_with(ScriptedFactory {
        candidate_down: true,
        ..Default::default()
    })
    .await;

    let result = tokio::time::timeout(
        Duration::from_secs(10),
        Conn::new(client_opts(proxy.port, "secret")),
    )
    .await
    .expect("connection attempt should finish");
    assert!(result.is_err());

    let candidate = proxy.factory.handle(Role::Candidate).unwrap();
    assert_eq!(candidate.connects(), 1);
    assert!(candidate.statements().is_empty());
    // The reference side that did connect is closed again
    let reference = proxy.factory.handle(Role::Reference).unwrap();
    assert_eq!(reference.closes(), 1);
    assert!(proxy.sink.reports().is_empty());

    proxy.shutdown.send(()).ok();
}

#[tokio::test]
async fn test_wrong_password_is_rejected() {
    let proxy = start_proxy().await;

    let result = Conn::new(client_opts(proxy.port, "wrong")).await;
    assert!(result.is_err());
    proxy.shutdown.send(()).ok();
}
