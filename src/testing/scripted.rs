//! Scripted in-process backend.

use async_trait::async_trait;
use shadow_core::{
    Backend, BackendError, Failure, Outcome, PreparedShape, ResultSet, StatementId, Value,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// ER_UNKNOWN_STMT_HANDLER
const UNKNOWN_STATEMENT_CODE: u16 = 1243;

/// What the backend does when it sees a statement.
#[derive(Debug, Clone)]
pub enum Step {
    /// Answer immediately.
    Reply(Outcome),
    /// Answer after a delay.
    Delay(Duration, Outcome),
    /// Never answer.
    Hang,
    /// Drop the connection mid-statement.
    LoseConnection,
}

impl Step {
    pub fn reply(outcome: impl Into<Outcome>) -> Self {
        Step::Reply(outcome.into())
    }

    pub fn delayed(delay: Duration, outcome: impl Into<Outcome>) -> Self {
        Step::Delay(delay, outcome.into())
    }
}

#[derive(Default)]
struct ScriptState {
    steps: HashMap<String, Step>,
    prepare_steps: HashMap<String, Step>,
    connect_error: Option<BackendError>,
    connected: bool,
    connects: u32,
    closes: u32,
    resets: u32,
    statements: Vec<String>,
    prepared: HashMap<StatementId, String>,
}

/// A [`Backend`] driven by a script of canned outcomes.
///
/// Statements without a scripted step succeed with an empty OK result.
pub struct ScriptedBackend {
    name: String,
    state: Arc<Mutex<ScriptState>>,
}

/// Shared view of a [`ScriptedBackend`]'s counters and script.
#[derive(Clone)]
pub struct ScriptHandle {
    state: Arc<Mutex<ScriptState>>,
}

fn lock(state: &Mutex<ScriptState>) -> MutexGuard<'_, ScriptState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ScriptedBackend {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            state: Arc::new(Mutex::new(ScriptState::default())),
        }
    }

    /// Script the response to a statement (matched after trimming).
    pub fn on(self, sql: &str, step: Step) -> Self {
        lock(&self.state).steps.insert(sql.trim().to_string(), step);
        self
    }

    /// Script the response to preparing a statement.
    pub fn on_prepare(self, sql: &str, step: Step) -> Self {
        lock(&self.state)
            .prepare_steps
            .insert(sql.trim().to_string(), step);
        self
    }

    /// Make every connection attempt fail.
    pub fn refuse_connections(self) -> Self {
        let endpoint = self.name.clone();
        lock(&self.state).connect_error = Some(BackendError::Unreachable {
            endpoint,
            reason: "connection refused".to_string(),
        });
        self
    }

    pub fn handle(&self) -> ScriptHandle {
        ScriptHandle {
            state: Arc::clone(&self.state),
        }
    }

    async fn play(&self, step: Option<Step>) -> Result<Outcome, BackendError> {
        match step {
            None => Ok(Outcome::Rows(ResultSet::ok(0))),
            Some(Step::Reply(outcome)) => Ok(outcome),
            Some(Step::Delay(delay, outcome)) => {
                tokio::time::sleep(delay).await;
                Ok(outcome)
            }
            Some(Step::Hang) => Ok(std::future::pending().await),
            Some(Step::LoseConnection) => {
                lock(&self.state).connected = false;
                Err(BackendError::ConnectionLost(format!(
                    "{}: server closed the connection",
                    self.name
                )))
            }
        }
    }

    /// Record a statement and look up its step. Fails when not connected.
    fn begin(&self, record: String, key: &str) -> Result<Option<Step>, BackendError> {
        let mut state = lock(&self.state);
        if !state.connected {
            return Err(BackendError::NotConnected);
        }
        state.statements.push(record);
        Ok(state.steps.get(key).cloned())
    }
}

impl ScriptHandle {
    pub fn connects(&self) -> u32 {
        lock(&self.state).connects
    }

    pub fn closes(&self) -> u32 {
        lock(&self.state).closes
    }

    pub fn resets(&self) -> u32 {
        lock(&self.state).resets
    }

    pub fn is_connected(&self) -> bool {
        lock(&self.state).connected
    }

    /// Statements received so far, in order.
    pub fn statements(&self) -> Vec<String> {
        lock(&self.state).statements.clone()
    }

    /// Fail every later connection attempt with `error`.
    pub fn fail_connects(&self, error: BackendError) {
        lock(&self.state).connect_error = Some(error);
    }

    /// Accept connection attempts again.
    pub fn accept_connects(&self) {
        lock(&self.state).connect_error = None;
    }

    /// Replace the step for a statement.
    pub fn script(&self, sql: &str, step: Step) {
        lock(&self.state)
            .steps
            .insert(sql.trim().to_string(), step);
    }
}

#[async_trait]
impl Backend for ScriptedBackend {
    fn endpoint(&self) -> String {
        format!("scripted:{}", self.name)
    }

    async fn connect(&mut self) -> Result<(), BackendError> {
        let mut state = lock(&self.state);
        state.connects += 1;
        if let Some(e) = &state.connect_error {
            return Err(e.clone());
        }
        state.connected = true;
        Ok(())
    }

    async fn query(&mut self, sql: &str) -> Result<Outcome, BackendError> {
        let step = self.begin(sql.trim().to_string(), sql.trim())?;
        self.play(step).await
    }

    async fn use_database(&mut self, database: &str) -> Result<Outcome, BackendError> {
        let statement = format!("USE {database}");
        let step = self.begin(statement.clone(), &statement)?;
        self.play(step).await
    }

    async fn prepare(&mut self, id: StatementId, sql: &str) -> Result<Outcome, BackendError> {
        let sql = sql.trim().to_string();
        let step = {
            let mut state = lock(&self.state);
            if !state.connected {
                return Err(BackendError::NotConnected);
            }
            state.statements.push(format!("PREPARE {sql}"));
            state.prepare_steps.get(&sql).cloned()
        };
        let outcome = match step {
            Some(step) => self.play(Some(step)).await?,
            None => Outcome::Prepared(PreparedShape {
                param_count: sql.matches('?').count() as u16,
                params: Vec::new(),
                columns: Vec::new(),
            }),
        };
        if matches!(outcome, Outcome::Prepared(_)) {
            lock(&self.state).prepared.insert(id, sql);
        }
        Ok(outcome)
    }

    async fn execute(
        &mut self,
        id: StatementId,
        _params: &[Value],
    ) -> Result<Outcome, BackendError> {
        let sql = lock(&self.state).prepared.get(&id).cloned();
        let Some(sql) = sql else {
            return Ok(Outcome::Failure(Failure::statement(
                UNKNOWN_STATEMENT_CODE,
                format!("Unknown prepared statement handler ({id})"),
            )));
        };
        let step = self.begin(format!("EXECUTE {sql}"), &sql)?;
        self.play(step).await
    }

    async fn close_statement(&mut self, id: StatementId) -> Result<(), BackendError> {
        lock(&self.state).prepared.remove(&id);
        Ok(())
    }

    async fn reset(&mut self) {
        let mut state = lock(&self.state);
        state.resets += 1;
        state.connected = false;
    }

    async fn close(&mut self) -> Result<(), BackendError> {
        let mut state = lock(&self.state);
        state.closes += 1;
        state.connected = false;
        Ok(())
    }
}
