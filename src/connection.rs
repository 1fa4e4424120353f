//! One backend role inside a session: reconnection and degradation.

use shadow_core::{Backend, BackendError, Failure, Outcome, Role, StatementId, Value};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// A single client command as sent to a backend.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Command<'a> {
    /// Plain text statement.
    Query(&'a str),
    /// Switch the default database.
    UseDatabase(&'a str),
    /// `SET` statement; replayed after a reconnect once accepted.
    SetVariable(&'a str),
    /// Prepare a statement under a session-local id.
    Prepare { id: StatementId, sql: &'a str },
    /// Execute a prepared statement.
    Execute {
        id: StatementId,
        params: &'a [Value],
    },
}

/// Bounded reconnection with exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Reconnect attempts before the role is marked degraded.
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles for every further attempt.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_millis(100),
        }
    }
}

impl RetryPolicy {
    /// Delay to wait before the given attempt (1-based). The first attempt is
    /// immediate.
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let factor = 2u32.saturating_pow(attempt - 2);
        self.backoff.saturating_mul(factor)
    }
}

/// Owns the live connection for one role.
///
/// SQL errors come back as [`Outcome::Failure`]; this type never returns an
/// error for a statement. A lost connection is reconnected up to
/// [`RetryPolicy::max_attempts`] times, after which the role is degraded and
/// every later command gets a synthetic failure without touching the backend.
pub struct BackendConnection {
    role: Role,
    backend: Box<dyn Backend>,
    retry: RetryPolicy,
    /// Connection must be re-established before the next command.
    stale: bool,
    degraded: bool,
    last_error: Option<BackendError>,
    /// Database selected on this backend, replayed after a reconnect.
    database: Option<String>,
    /// Accepted `SET` statements in execution order, replayed after the
    /// database.
    settings: Vec<String>,
}

impl BackendConnection {
    pub fn new(role: Role, backend: Box<dyn Backend>, retry: RetryPolicy) -> Self {
        Self {
            role,
            backend,
            retry,
            stale: true,
            degraded: false,
            last_error: None,
            database: None,
            settings: Vec::new(),
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    pub fn last_error(&self) -> Option<&BackendError> {
        self.last_error.as_ref()
    }

    pub fn database(&self) -> Option<&str> {
        self.database.as_deref()
    }

    pub fn settings(&self) -> &[String] {
        &self.settings
    }

    /// Open the initial connection. No retries: a failure here is fatal to
    /// the session.
    pub async fn open(&mut self) -> Result<(), BackendError> {
        match self.backend.connect().await {
            Ok(()) => {
                self.stale = false;
                debug!("{} backend connected to {}", self.role, self.backend.endpoint());
                Ok(())
            }
            Err(e) => {
                self.last_error = Some(e.clone());
                Err(e)
            }
        }
    }

    /// Run one command and return its normalized outcome.
    pub async fn execute(&mut self, command: &Command<'_>) -> Outcome {
        if self.degraded {
            return Outcome::Failure(Failure::degraded(self.role));
        }
        if self.stale && !self.reconnect().await {
            return Outcome::Failure(Failure::degraded(self.role));
        }

        let result = match *command {
            Command::Query(sql) | Command::SetVariable(sql) => self.backend.query(sql).await,
            Command::UseDatabase(database) => self.backend.use_database(database).await,
            Command::Prepare { id, sql } => self.backend.prepare(id, sql).await,
            Command::Execute { id, params } => self.backend.execute(id, params).await,
        };

        match result {
            Ok(outcome) => {
                if !outcome.is_failure() {
                    match *command {
                        Command::UseDatabase(database) => {
                            self.database = Some(database.to_string())
                        }
                        Command::SetVariable(sql) => self.record_setting(sql),
                        _ => {}
                    }
                }
                outcome
            }
            Err(e) => {
                // The interrupted command is not re-executed
                warn!("{} backend connection failed: {}", self.role, e);
                self.last_error = Some(e.clone());
                self.stale = true;
                self.reconnect().await;
                Outcome::Failure(Failure::connection(e.to_string()))
            }
        }
    }

    /// Release a prepared statement. Failures are logged, not reported.
    pub async fn release(&mut self, id: StatementId) {
        if self.degraded || self.stale {
            return;
        }
        if let Err(e) = self.backend.close_statement(id).await {
            warn!("{} backend failed to close statement {}: {}", self.role, id, e);
            self.last_error = Some(e);
            self.stale = true;
        }
    }

    /// Discard the live connection after a cancelled command. The next
    /// command reconnects first.
    pub async fn reset(&mut self) {
        self.backend.reset().await;
        self.stale = true;
    }

    /// Close the connection.
    pub async fn close(&mut self) -> Result<(), BackendError> {
        self.stale = true;
        self.backend.close().await
    }

    /// Reconnect with backoff. Returns `false` (and degrades the role) when
    /// every attempt failed.
    async fn reconnect(&mut self) -> bool {
        for attempt in 1..=self.retry.max_attempts {
            tokio::time::sleep(self.retry.delay_before(attempt)).await;
            match self.backend.connect().await {
                Ok(()) => {
                    self.stale = false;
                    self.replay_database().await;
                    self.replay_settings().await;
                    info!(
                        "{} backend reconnected to {} (attempt {})",
                        self.role,
                        self.backend.endpoint(),
                        attempt
                    );
                    return true;
                }
                Err(e) => {
                    warn!(
                        "{} backend reconnect attempt {}/{} failed: {}",
                        self.role, attempt, self.retry.max_attempts, e
                    );
                    self.last_error = Some(e);
                }
            }
        }

        error!(
            "{} backend degraded after {} reconnect attempts",
            self.role, self.retry.max_attempts
        );
        self.degraded = true;
        false
    }

    fn record_setting(&mut self, sql: &str) {
        let sql = sql.trim();
        self.settings.retain(|s| s != sql);
        self.settings.push(sql.to_string());
    }

    async fn replay_settings(&mut self) {
        for sql in self.settings.clone() {
            if self.stale {
                return;
            }
            match self.backend.query(&sql).await {
                Ok(Outcome::Failure(f)) => {
                    warn!("{} backend could not restore '{}': {}", self.role, sql, f)
                }
                Ok(_) => debug!("{} backend restored '{}'", self.role, sql),
                Err(e) => {
                    warn!("{} backend could not restore '{}': {}", self.role, sql, e);
                    self.stale = true;
                }
            }
        }
    }

    async fn replay_database(&mut self) {
        let Some(database) = self.database.clone() else {
            return;
        };
        match self.backend.use_database(&database).await {
            Ok(Outcome::Failure(f)) => {
                warn!("{} backend could not restore database {}: {}", self.role, database, f)
            }
            Ok(_) => debug!("{} backend restored database {}", self.role, database),
            Err(e) => {
                warn!("{} backend could not restore database {}: {}", self.role, database, e);
                self.stale = true;
            }
        }
    }
}
