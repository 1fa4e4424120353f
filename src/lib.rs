//! Shadow-compare Library
//!
//! A MySQL-protocol proxy that runs every client statement against a
//! reference backend and a candidate backend at the same time, compares the
//! two outcomes and answers the client with one of them.
//!
//! # Features
//!
//! - Shadow execution: both backends see the same statements in the same order
//! - Result comparison: shape, row counts, values and errors, with
//!   configurable type and error-code equivalences
//! - Divergence reports: one structured report per compared statement
//! - Reconciliation: the client gets the reference outcome, or the first
//!   success under `prefer-success`
//! - Resilience: per-statement timeouts and bounded reconnection per backend
//!
//! # Crates
//!
//! - `shadow_core` - outcome types, comparison policy and the comparator
//! - `shadow_mysql_backend` - `mysql_async` backend driver and test containers
//!
//! # CLI Usage
//!
//! ```bash
//! # Compare a TiDB candidate against a MySQL reference
//! shadow-compare --port 5001 \
//!   --reference-host 127.0.0.1 --reference-port 3306 \
//!   --candidate-host 127.0.0.1 --candidate-port 4000 \
//!   --policy-file shadow-policy.yaml --report-file divergences.jsonl
//!
//! # Clients connect to the proxy as to any MySQL server
//! mysql -h 127.0.0.1 -P 5001 -u root
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use shadow_core::{ComparePolicy, OrderingMode, ReconcilePolicy};
use std::path::PathBuf;
use std::time::Duration;

pub mod auth;
pub mod config;
pub mod connection;
pub mod dispatcher;
pub mod observer;
pub mod reconciler;
pub mod relay;
pub mod server;
pub mod session;
pub mod testing;

pub use shadow_core as core;
pub use shadow_mysql_backend as mysql;

use config::parse_duration;
use shadow_mysql_backend::BackendEndpoint;

/// Where the proxy listens and which credentials clients must present.
#[derive(Parser, Clone, Debug)]
pub struct ListenOpts {
    /// Port to accept MySQL clients on
    #[arg(short = 'P', long, default_value = "5001", env = "SHADOW_PORT")]
    pub port: u16,

    /// User name clients authenticate with
    #[arg(long, default_value = "root", env = "SHADOW_USER")]
    pub user: String,

    /// Password clients authenticate with
    #[arg(long, default_value = "", env = "SHADOW_PASS")]
    pub pass: String,
}

/// Connection to the reference backend.
#[derive(Parser, Clone, Debug)]
pub struct ReferenceOpts {
    /// Reference backend host
    #[arg(long, default_value = "127.0.0.1", env = "REFERENCE_HOST")]
    pub reference_host: String,

    /// Reference backend port
    #[arg(long, default_value = "3306", env = "REFERENCE_PORT")]
    pub reference_port: u16,

    /// Reference backend user
    #[arg(long, default_value = "root", env = "REFERENCE_USER")]
    pub reference_user: String,

    /// Reference backend password
    #[arg(long, default_value = "", env = "REFERENCE_PASS")]
    pub reference_pass: String,

    /// Default database on the reference backend
    #[arg(long, default_value = "", env = "REFERENCE_DATABASE")]
    pub reference_database: String,

    /// `&`-separated `key=value` session options for the reference backend
    #[arg(long, default_value = "charset=utf8mb4", env = "REFERENCE_OPTIONS")]
    pub reference_options: String,
}

/// Connection to the candidate backend.
#[derive(Parser, Clone, Debug)]
pub struct CandidateOpts {
    /// Candidate backend host
    #[arg(long, default_value = "127.0.0.1", env = "CANDIDATE_HOST")]
    pub candidate_host: String,

    /// Candidate backend port
    #[arg(long, default_value = "4000", env = "CANDIDATE_PORT")]
    pub candidate_port: u16,

    /// Candidate backend user
    #[arg(long, default_value = "root", env = "CANDIDATE_USER")]
    pub candidate_user: String,

    /// Candidate backend password
    #[arg(long, default_value = "", env = "CANDIDATE_PASS")]
    pub candidate_pass: String,

    /// Default database on the candidate backend
    #[arg(long, default_value = "", env = "CANDIDATE_DATABASE")]
    pub candidate_database: String,

    /// `&`-separated `key=value` session options for the candidate backend
    #[arg(long, default_value = "charset=utf8mb4", env = "CANDIDATE_OPTIONS")]
    pub candidate_options: String,
}

/// Comparison, timeout and reporting settings.
#[derive(Parser, Clone, Debug)]
pub struct ShadowOpts {
    /// Per-statement timeout for each backend (e.g. "30s", "500ms", "5m")
    #[arg(long, default_value = "30s", value_parser = parse_duration, env = "SHADOW_STATEMENT_TIMEOUT")]
    pub statement_timeout: Duration,

    /// Timeout for establishing a backend connection
    #[arg(long, default_value = "10s", value_parser = parse_duration, env = "SHADOW_CONNECT_TIMEOUT")]
    pub connect_timeout: Duration,

    /// Reconnect attempts before a backend is marked degraded
    #[arg(long, default_value = "3", env = "SHADOW_MAX_RECONNECT_ATTEMPTS")]
    pub max_reconnect_attempts: u32,

    /// Delay before the second reconnect attempt, doubled for each further one
    #[arg(long, default_value = "100ms", value_parser = parse_duration, env = "SHADOW_RECONNECT_BACKOFF")]
    pub reconnect_backoff: Duration,

    /// Row ordering mode (overrides the policy file)
    #[arg(long, value_enum, env = "SHADOW_ORDERING")]
    pub ordering: Option<OrderingMode>,

    /// Which outcome the client receives (overrides the policy file)
    #[arg(long, value_enum, env = "SHADOW_RECONCILE")]
    pub reconcile: Option<ReconcilePolicy>,

    /// YAML or TOML comparison policy
    #[arg(long, env = "SHADOW_POLICY_FILE")]
    pub policy_file: Option<PathBuf>,

    /// Append divergence reports to this JSON-lines file
    #[arg(long, env = "SHADOW_REPORT_FILE")]
    pub report_file: Option<PathBuf>,
}

impl ShadowOpts {
    /// Policy from the policy file (or defaults) with command-line overrides
    /// applied.
    pub fn compare_policy(&self) -> Result<ComparePolicy> {
        let mut policy = match &self.policy_file {
            Some(path) => ComparePolicy::from_file(path)
                .with_context(|| format!("Failed to load policy file {}", path.display()))?,
            None => ComparePolicy::default(),
        };
        if let Some(ordering) = self.ordering {
            policy.ordering = ordering;
        }
        if let Some(reconcile) = self.reconcile {
            policy.reconcile = reconcile;
        }
        Ok(policy)
    }

    pub fn retry_policy(&self) -> connection::RetryPolicy {
        connection::RetryPolicy {
            max_attempts: self.max_reconnect_attempts,
            backoff: self.reconnect_backoff,
        }
    }
}

impl From<&ReferenceOpts> for BackendEndpoint {
    fn from(opts: &ReferenceOpts) -> Self {
        Self {
            host: opts.reference_host.clone(),
            port: opts.reference_port,
            user: opts.reference_user.clone(),
            pass: opts.reference_pass.clone(),
            database: opts.reference_database.clone(),
            options: opts.reference_options.clone(),
        }
    }
}

impl From<&CandidateOpts> for BackendEndpoint {
    fn from(opts: &CandidateOpts) -> Self {
        Self {
            host: opts.candidate_host.clone(),
            port: opts.candidate_port,
            user: opts.candidate_user.clone(),
            pass: opts.candidate_pass.clone(),
            database: opts.candidate_database.clone(),
            options: opts.candidate_options.clone(),
        }
    }
}
