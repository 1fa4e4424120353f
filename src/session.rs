//! Per-client session: both backend roles, session state and the lifecycle
//! state machine.
//!
//! ```text
//! Created → Initializing → Ready ⇄ Executing → ... → Closing → Closed
//!                            ↘ Degraded(role) ↗
//! ```
//!
//! Every client command goes through [`Dispatcher`] → [`Comparator`] →
//! [`Reconciler`]; the session only tracks what the command changed.

use crate::connection::{BackendConnection, Command, RetryPolicy};
use crate::dispatcher::Dispatcher;
use crate::observer::DivergenceSink;
use crate::reconciler::Reconciler;
use chrono::{DateTime, Utc};
use shadow_core::{
    Backend, BackendError, Comparator, ComparePolicy, Failure, OrderingMode, Outcome,
    PreparedShape, ReconcilePolicy, Role, StatementId, StatementKind, Value,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// ER_UNKNOWN_STMT_HANDLER
const UNKNOWN_STATEMENT_CODE: u16 = 1243;

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Created,
    Initializing,
    Ready,
    Executing,
    /// The given role exhausted its reconnects.
    Degraded(Role),
    Closing,
    Closed,
}

impl SessionState {
    /// Guard for every state change.
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        match (self, next) {
            (Closing, Closed) => true,
            (Closing | Closed, _) => false,
            (_, Closing) => true,
            (Created, Initializing) => true,
            (Initializing, Ready) => true,
            (Ready | Degraded(_), Executing) => true,
            (Executing, Ready) => true,
            (Ready | Executing | Degraded(_), Degraded(_)) => true,
            _ => false,
        }
    }
}

/// Session errors. Statement failures are never reported here.
#[derive(Error, Debug)]
pub enum SessionError {
    /// A backend could not be opened; the session never became ready.
    #[error("{role} backend connect failed: {source}")]
    ConnectFailure {
        role: Role,
        #[source]
        source: BackendError,
    },

    #[error("Invalid session transition: {from:?} -> {to:?}")]
    InvalidTransition {
        from: SessionState,
        to: SessionState,
    },

    /// The role serving the client is gone.
    #[error("{0} backend is degraded, session terminated")]
    Terminated(Role),

    #[error("Failed to close backends: {}", describe_close_errors(.0))]
    Close(Vec<(Role, BackendError)>),
}

fn describe_close_errors(errors: &[(Role, BackendError)]) -> String {
    errors
        .iter()
        .map(|(role, e)| format!("{role}: {e}"))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Shared settings every session is built from.
#[derive(Clone)]
pub struct SessionConfig {
    pub comparator: Arc<Comparator>,
    pub sink: Arc<dyn DivergenceSink>,
    pub statement_timeout: Duration,
    pub retry: RetryPolicy,
}

impl SessionConfig {
    pub fn new(policy: ComparePolicy, sink: Arc<dyn DivergenceSink>) -> Self {
        Self {
            comparator: Arc::new(Comparator::new(policy)),
            sink,
            statement_timeout: Duration::from_secs(30),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_statement_timeout(mut self, timeout: Duration) -> Self {
        self.statement_timeout = timeout;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

/// A statement prepared on the session's behalf.
#[derive(Debug, Clone)]
pub struct PreparedStatement {
    pub sql: String,
    /// Shape as returned to the client.
    pub shape: PreparedShape,
}

/// How a text statement is routed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatementClass {
    Query,
    /// `USE db`
    UseDatabase(String),
    /// `SET ...`; `autocommit` is set when the statement assigns it.
    Set { autocommit: Option<bool> },
}

/// Classify a text statement by its leading keyword.
pub fn classify_statement(sql: &str) -> StatementClass {
    let sql = skip_leading_comments(sql);
    let keyword_len = sql
        .find(|c: char| !c.is_ascii_alphabetic())
        .unwrap_or(sql.len());
    let (keyword, rest) = sql.split_at(keyword_len);

    if keyword.eq_ignore_ascii_case("USE") {
        return match parse_database_name(rest) {
            Some(database) => StatementClass::UseDatabase(database),
            None => StatementClass::Query,
        };
    }
    if keyword.eq_ignore_ascii_case("SET") {
        return StatementClass::Set {
            autocommit: parse_autocommit(rest),
        };
    }
    StatementClass::Query
}

fn skip_leading_comments(mut sql: &str) -> &str {
    loop {
        sql = sql.trim_start();
        match sql.strip_prefix("/*") {
            // Executable comments (`/*! ... */`) are statement text
            Some(rest) if !rest.starts_with('!') => match rest.find("*/") {
                Some(end) => sql = &rest[end + 2..],
                None => return sql,
            },
            _ => return sql,
        }
    }
}

fn parse_database_name(rest: &str) -> Option<String> {
    let name = rest.trim().trim_end_matches(';').trim_end();
    if let Some(quoted) = name.strip_prefix('`') {
        let inner = quoted.strip_suffix('`')?;
        // A lone backtick inside means the name ended early
        if inner.replace("``", "").contains('`') {
            return None;
        }
        return Some(inner.replace("``", "`"));
    }
    if name.is_empty() || name.contains(char::is_whitespace) {
        return None;
    }
    Some(name.to_string())
}

fn parse_autocommit(rest: &str) -> Option<bool> {
    let assignment = rest.trim().trim_end_matches(';').trim_end().to_ascii_lowercase();
    if assignment.contains(',') {
        return None;
    }
    let target = ["@@session.", "@@local.", "@@", "session ", "local "]
        .iter()
        .find_map(|prefix| assignment.strip_prefix(prefix))
        .unwrap_or(assignment.as_str());
    let value = target.strip_prefix("autocommit")?.trim_start();
    let value = value
        .strip_prefix(":=")
        .or_else(|| value.strip_prefix('='))?
        .trim();
    match value {
        "1" | "on" | "true" => Some(true),
        "0" | "off" | "false" => Some(false),
        _ => None,
    }
}

/// One client connection's view of both backends.
pub struct Session {
    id: u32,
    state: SessionState,
    reference: BackendConnection,
    candidate: BackendConnection,
    dispatcher: Dispatcher,
    comparator: Arc<Comparator>,
    reconciler: Reconciler,
    ordering: OrderingMode,
    current_database: Option<String>,
    autocommit: bool,
    created_at: DateTime<Utc>,
    prepared: HashMap<StatementId, PreparedStatement>,
    last_statement_id: StatementId,
}

impl Session {
    pub fn new(
        id: u32,
        reference: Box<dyn Backend>,
        candidate: Box<dyn Backend>,
        config: &SessionConfig,
    ) -> Self {
        let policy = config.comparator.policy();
        Self {
            id,
            state: SessionState::Created,
            reference: BackendConnection::new(Role::Reference, reference, config.retry),
            candidate: BackendConnection::new(Role::Candidate, candidate, config.retry),
            dispatcher: Dispatcher::new(config.statement_timeout),
            comparator: Arc::clone(&config.comparator),
            reconciler: Reconciler::new(policy.reconcile, Arc::clone(&config.sink)),
            ordering: policy.ordering,
            current_database: None,
            autocommit: true,
            created_at: Utc::now(),
            prepared: HashMap::new(),
            last_statement_id: 0,
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn current_database(&self) -> Option<&str> {
        self.current_database.as_deref()
    }

    pub fn autocommit(&self) -> bool {
        self.autocommit
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn ordering(&self) -> OrderingMode {
        self.ordering
    }

    /// Override the row ordering mode for later statements.
    pub fn set_ordering(&mut self, ordering: OrderingMode) {
        self.ordering = ordering;
    }

    pub fn prepared_statement(&self, id: StatementId) -> Option<&PreparedStatement> {
        self.prepared.get(&id)
    }

    /// Whether the role serving the client is gone and the session must end.
    pub fn is_terminated(&self) -> bool {
        self.terminated_by().is_some()
    }

    fn terminated_by(&self) -> Option<Role> {
        let reference_down = self.reference.is_degraded();
        let candidate_down = self.candidate.is_degraded();
        match self.reconciler.policy() {
            ReconcilePolicy::ReferenceWins if reference_down => Some(Role::Reference),
            ReconcilePolicy::PreferSuccess if reference_down && candidate_down => {
                Some(Role::Reference)
            }
            _ => None,
        }
    }

    fn transition(&mut self, next: SessionState) -> Result<(), SessionError> {
        if !self.state.can_transition_to(next) {
            return Err(SessionError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        debug!("Session {}: {:?} -> {:?}", self.id, self.state, next);
        self.state = next;
        Ok(())
    }

    /// Open both backends. Either both are open and the session is ready, or
    /// neither handle is kept and the session is closed.
    pub async fn initialize(&mut self) -> Result<(), SessionError> {
        self.transition(SessionState::Initializing)?;

        let (reference, candidate) = tokio::join!(self.reference.open(), self.candidate.open());
        let failure = match (reference, candidate) {
            (Err(e), _) => Some((Role::Reference, e)),
            (_, Err(e)) => Some((Role::Candidate, e)),
            _ => None,
        };

        if let Some((role, source)) = failure {
            error!("Session {}: {} backend connect failed: {}", self.id, role, source);
            if let Err(e) = self.finalize().await {
                warn!("Session {}: cleanup after failed connect: {}", self.id, e);
            }
            return Err(SessionError::ConnectFailure { role, source });
        }

        self.transition(SessionState::Ready)?;
        info!("Session {} ready", self.id);
        Ok(())
    }

    /// Close both backends from any state. Errors from either side are
    /// collected; the session ends up closed regardless.
    pub async fn finalize(&mut self) -> Result<(), SessionError> {
        match self.state {
            SessionState::Closed => return Ok(()),
            SessionState::Closing => {}
            _ => self.transition(SessionState::Closing)?,
        }

        self.prepared.clear();
        let (reference, candidate) =
            tokio::join!(self.reference.close(), self.candidate.close());
        let errors: Vec<(Role, BackendError)> = [
            (Role::Reference, reference),
            (Role::Candidate, candidate),
        ]
        .into_iter()
        .filter_map(|(role, result)| result.err().map(|e| (role, e)))
        .collect();

        self.transition(SessionState::Closed)?;
        info!("Session {} closed", self.id);

        if errors.is_empty() {
            Ok(())
        } else {
            Err(SessionError::Close(errors))
        }
    }

    /// Handle a COM_QUERY statement.
    pub async fn handle_query(&mut self, sql: &str) -> Result<Outcome, SessionError> {
        match classify_statement(sql) {
            StatementClass::UseDatabase(database) => {
                let outcome = self
                    .run(
                        sql,
                        StatementKind::SessionState,
                        Command::UseDatabase(&database),
                    )
                    .await?;
                if !outcome.is_failure() {
                    self.current_database = Some(database);
                }
                Ok(outcome)
            }
            StatementClass::Set { autocommit } => {
                let outcome = self
                    .run(sql, StatementKind::SessionState, Command::SetVariable(sql))
                    .await?;
                if let (Some(enabled), false) = (autocommit, outcome.is_failure()) {
                    self.autocommit = enabled;
                }
                Ok(outcome)
            }
            StatementClass::Query => {
                self.run(sql, StatementKind::Query, Command::Query(sql))
                    .await
            }
        }
    }

    /// Handle COM_INIT_DB.
    pub async fn use_database(&mut self, database: &str) -> Result<Outcome, SessionError> {
        let statement = format!("USE `{}`", database.replace('`', "``"));
        let outcome = self
            .run(
                &statement,
                StatementKind::InitDb,
                Command::UseDatabase(database),
            )
            .await?;
        if !outcome.is_failure() {
            self.current_database = Some(database.to_string());
        }
        Ok(outcome)
    }

    /// Prepare a statement on both backends under a new session-local id.
    pub async fn prepare(&mut self, sql: &str) -> Result<(StatementId, Outcome), SessionError> {
        let id = self.next_statement_id();
        let outcome = self
            .run(sql, StatementKind::Prepare, Command::Prepare { id, sql })
            .await?;

        match &outcome {
            Outcome::Prepared(shape) => {
                self.prepared.insert(
                    id,
                    PreparedStatement {
                        sql: sql.to_string(),
                        shape: shape.clone(),
                    },
                );
            }
            _ => {
                // One side may hold the statement even though the client
                // sees an error
                tokio::join!(self.reference.release(id), self.candidate.release(id));
            }
        }
        Ok((id, outcome))
    }

    /// Execute a prepared statement on both backends.
    pub async fn execute_prepared(
        &mut self,
        id: StatementId,
        params: &[Value],
    ) -> Result<Outcome, SessionError> {
        let Some(statement) = self.prepared.get(&id) else {
            return Ok(Outcome::Failure(Failure::statement(
                UNKNOWN_STATEMENT_CODE,
                format!("Unknown prepared statement handler ({id}) given to EXECUTE"),
            )));
        };
        let sql = statement.sql.clone();
        self.run(&sql, StatementKind::Execute, Command::Execute { id, params })
            .await
    }

    /// Release a prepared statement on both backends.
    pub async fn close_prepared(&mut self, id: StatementId) {
        if self.prepared.remove(&id).is_some() {
            tokio::join!(self.reference.release(id), self.candidate.release(id));
        }
    }

    fn next_statement_id(&mut self) -> StatementId {
        self.last_statement_id = self.last_statement_id.wrapping_add(1).max(1);
        self.last_statement_id
    }

    async fn run(
        &mut self,
        statement: &str,
        kind: StatementKind,
        command: Command<'_>,
    ) -> Result<Outcome, SessionError> {
        if let Some(role) = self.terminated_by() {
            return Err(SessionError::Terminated(role));
        }
        self.transition(SessionState::Executing)?;

        let dispatched = self
            .dispatcher
            .dispatch(&mut self.reference, &mut self.candidate, &command)
            .await;
        let report = self
            .comparator
            .compare_with(
                statement,
                kind,
                self.ordering,
                dispatched.timing,
                dispatched.reference,
                dispatched.candidate,
            )
            .for_session(self.id);
        debug!("Session {}: {}", self.id, report.summary());
        let outcome = self.reconciler.reconcile(report);

        self.settle()?;
        Ok(outcome)
    }

    /// Leave `Executing` for `Ready` or the appropriate degraded state.
    fn settle(&mut self) -> Result<(), SessionError> {
        let next = if self.reference.is_degraded() {
            SessionState::Degraded(Role::Reference)
        } else if self.candidate.is_degraded() {
            SessionState::Degraded(Role::Candidate)
        } else {
            SessionState::Ready
        };
        if let SessionState::Degraded(role) = next {
            warn!(
                "Session {}: {} backend degraded (last error: {})",
                self.id,
                role,
                self.connection(role)
                    .last_error()
                    .map(ToString::to_string)
                    .unwrap_or_default()
            );
        }
        self.transition(next)
    }

    fn connection(&self, role: Role) -> &BackendConnection {
        match role {
            Role::Reference => &self.reference,
            Role::Candidate => &self.candidate,
        }
    }
}
