//! Docker E2E tests
//!
//! Run a session against a MySQL 8 reference and a MariaDB candidate.
//! Requires Docker; run with `cargo test --test docker -- --ignored`.

use shadow_compare::session::{Session, SessionConfig};
use shadow_compare::testing::MemorySink;
use shadow_core::{Classification, ComparePolicy, OrderingMode, Outcome, Value};
use shadow_mysql_backend::testing::DatabaseContainer;
use shadow_mysql_backend::MySqlBackend;
use std::sync::Arc;
use std::time::Duration;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_mysql_against_mariadb() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter("shadow_compare=debug,shadow_mysql_backend=debug")
        .try_init()
        .ok();

    let reference = DatabaseContainer::mysql("shadow-compare-reference", 13306);
    let candidate = DatabaseContainer::mariadb("shadow-compare-candidate", 13307);
    reference.start()?;
    candidate.start()?;
    reference.wait_until_ready(Duration::from_secs(120)).await?;
    candidate.wait_until_ready(Duration::from_secs(120)).await?;

    let sink = Arc::new(MemorySink::new());
    let config = SessionConfig::new(ComparePolicy::default(), sink.clone());
    let mut session = Session::new(
        1,
        Box::new(MySqlBackend::new(reference.endpoint(), CONNECT_TIMEOUT)),
        Box::new(MySqlBackend::new(candidate.endpoint(), CONNECT_TIMEOUT)),
        &config,
    );
    session.initialize().await?;

    let outcome = session.handle_query("SELECT 1").await?;
    let rows = outcome.as_rows().expect("rows for SELECT 1");
    assert_eq!(rows.rows, vec![vec![Value::Int(1)]]);
    assert!(sink.reports()[0].is_match());

    // MariaDB reports its own version string
    session.handle_query("SELECT version()").await?;
    assert_eq!(
        sink.reports()[1].classification,
        Classification::ValueMismatch { row: 0, column: 0 }
    );

    session
        .handle_query("CREATE TABLE IF NOT EXISTS items (id INT PRIMARY KEY, name VARCHAR(32))")
        .await?;
    session.handle_query("DELETE FROM items").await?;
    let outcome = session
        .handle_query("INSERT INTO items VALUES (1, 'a'), (2, 'b'), (3, 'c')")
        .await?;
    assert_eq!(outcome.as_rows().map(|r| r.affected_rows), Some(3));

    session.set_ordering(OrderingMode::Unordered);
    session.handle_query("SELECT id, name FROM items").await?;
    assert!(sink.reports().last().unwrap().is_match());

    let (id, outcome) = session
        .prepare("SELECT name FROM items WHERE id = ?")
        .await?;
    assert!(matches!(outcome, Outcome::Prepared(_)));
    let outcome = session.execute_prepared(id, &[Value::Int(2)]).await?;
    assert_eq!(
        outcome.as_rows().map(|r| r.rows.clone()),
        Some(vec![vec![Value::text("b")]])
    );
    session.close_prepared(id).await;

    let outcome = session.handle_query("SELECT * FROM no_such_table").await?;
    assert_eq!(outcome.as_failure().map(|f| f.code), Some(1146));

    session.handle_query("DROP TABLE items").await?;
    session.finalize().await?;

    reference.stop()?;
    candidate.stop()?;
    Ok(())
}
