//! Command-line interface for shadow-compare
//!
//! # Usage Examples
//!
//! ```bash
//! # Shadow a MySQL reference with a TiDB candidate
//! shadow-compare \
//!   --port 5001 --user root --pass secret \
//!   --reference-host mysql.internal --reference-pass refpass \
//!   --candidate-host tidb.internal --candidate-port 4000
//!
//! # Unordered comparison, reports appended to a file
//! shadow-compare --ordering unordered --report-file divergences.jsonl
//!
//! # Equivalence tables and defaults from a policy file
//! shadow-compare --policy-file shadow-policy.yaml --reconcile prefer-success
//! ```
//!
//! Set `RUST_LOG=debug` to log every compared statement, not only divergences.

use anyhow::Context;
use clap::Parser;
use shadow_compare::auth::ProxyCredentials;
use shadow_compare::observer::{
    finish_writer, CompositeSink, DivergenceSink, JsonlSink, TracingSink,
};
use shadow_compare::server::{MySqlBackendFactory, Proxy};
use shadow_compare::session::SessionConfig;
use shadow_compare::{CandidateOpts, ListenOpts, ReferenceOpts, ShadowOpts};
use shadow_mysql_backend::BackendEndpoint;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

/// How long shutdown waits for queued reports to reach the report file.
const REPORT_DRAIN_GRACE: Duration = Duration::from_secs(5);

#[derive(Parser)]
#[command(name = "shadow-compare")]
#[command(about = "Run MySQL client traffic against a reference and a candidate database and report divergences")]
#[command(long_about = None)]
struct Cli {
    #[command(flatten)]
    listen: ListenOpts,

    #[command(flatten)]
    reference: ReferenceOpts,

    #[command(flatten)]
    candidate: CandidateOpts,

    #[command(flatten)]
    shadow: ShadowOpts,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = run().await {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
    Ok(())
}

async fn run() -> anyhow::Result<()> {
    // Initialize tracing
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();

    let reference = BackendEndpoint::from(&cli.reference);
    let candidate = BackendEndpoint::from(&cli.candidate);
    for (role, endpoint) in [("reference", &reference), ("candidate", &candidate)] {
        endpoint
            .init_statements()
            .with_context(|| format!("Invalid {role} options '{}'", endpoint.options))?;
    }

    let policy = cli.shadow.compare_policy()?;
    info!(
        "Comparing {} (reference) with {} (candidate), ordering={:?}, reconcile={:?}",
        reference.address(),
        candidate.address(),
        policy.ordering,
        policy.reconcile
    );

    let (sink, writer) = match &cli.shadow.report_file {
        Some(path) => {
            let (jsonl, writer) = JsonlSink::open(path).await?;
            info!("Appending divergence reports to {}", path.display());
            let sink: Arc<dyn DivergenceSink> = Arc::new(
                CompositeSink::new()
                    .with(Arc::new(TracingSink))
                    .with(Arc::new(jsonl)),
            );
            (sink, Some(writer))
        }
        None => {
            let sink: Arc<dyn DivergenceSink> = Arc::new(TracingSink);
            (sink, None)
        }
    };

    let config = SessionConfig::new(policy, sink)
        .with_statement_timeout(cli.shadow.statement_timeout)
        .with_retry(cli.shadow.retry_policy());
    let factory = Arc::new(MySqlBackendFactory {
        reference,
        candidate,
        connect_timeout: cli.shadow.connect_timeout,
    });
    let proxy = Arc::new(Proxy::new(
        factory,
        ProxyCredentials::new(cli.listen.user, cli.listen.pass),
        config,
    ));

    let listener = TcpListener::bind(("0.0.0.0", cli.listen.port))
        .await
        .with_context(|| format!("Failed to bind to port {}", cli.listen.port))?;

    // The proxy owns the only sink handle outside live sessions
    proxy.serve(listener, setup_shutdown_handler()).await?;

    if let Some(writer) = writer {
        match finish_writer(writer, REPORT_DRAIN_GRACE).await {
            Ok(()) => info!("Divergence reports flushed"),
            Err(e) => warn!("{:#}", e),
        }
    }

    info!("Shutdown complete");
    Ok(())
}

/// Sets up a shutdown signal handler
fn setup_shutdown_handler() -> tokio::sync::broadcast::Receiver<()> {
    let (shutdown_tx, shutdown_rx) = tokio::sync::broadcast::channel(1);

    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install CTRL+C signal handler: {}", e);
            return;
        }
        info!("Received interrupt signal (Ctrl+C)");
        let _ = shutdown_tx.send(());
    });

    shutdown_rx
}
