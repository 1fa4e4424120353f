//! The seam between the comparison engine and a concrete backend driver.

use crate::outcome::Outcome;
use crate::values::Value;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Session-local prepared statement identifier.
pub type StatementId = u32;

/// Which side of the comparison a backend plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Ground truth.
    Reference,
    /// System under verification.
    Candidate,
}

impl Role {
    /// Both roles, reference first.
    pub const ALL: [Role; 2] = [Role::Reference, Role::Candidate];

    /// The opposite role.
    pub fn other(self) -> Role {
        match self {
            Role::Reference => Role::Candidate,
            Role::Candidate => Role::Reference,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Reference => write!(f, "reference"),
            Role::Candidate => write!(f, "candidate"),
        }
    }
}

/// Connection-level errors. SQL errors are never reported through this type;
/// they come back as [`Outcome::Failure`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// The backend could not be reached.
    #[error("Failed to connect to {endpoint}: {reason}")]
    Unreachable { endpoint: String, reason: String },

    /// The backend refused the session (bad credentials, unknown database).
    #[error("{endpoint} rejected the connection: ERROR {code}: {message}")]
    Rejected {
        endpoint: String,
        code: u16,
        message: String,
    },

    /// An established connection broke.
    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    /// An operation was attempted without a live connection.
    #[error("Not connected")]
    NotConnected,
}

impl BackendError {
    /// Whether reconnecting may recover from this error.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            BackendError::ConnectionLost(_) | BackendError::NotConnected
        )
    }
}

/// A live session to one backend database.
///
/// Implementations preserve column and row order exactly as the backend
/// returns them and report SQL errors as [`Outcome::Failure`]. An `Err` is
/// only returned for connection-level problems.
#[async_trait]
pub trait Backend: Send {
    /// Endpoint description for logs (never includes credentials).
    fn endpoint(&self) -> String;

    /// Open the connection.
    async fn connect(&mut self) -> Result<(), BackendError>;

    /// Run a plain text statement.
    async fn query(&mut self, sql: &str) -> Result<Outcome, BackendError>;

    /// Switch the default database.
    async fn use_database(&mut self, database: &str) -> Result<Outcome, BackendError>;

    /// Prepare a statement under a session-local id.
    ///
    /// Success is reported as [`Outcome::Prepared`].
    async fn prepare(&mut self, id: StatementId, sql: &str) -> Result<Outcome, BackendError>;

    /// Execute a previously prepared statement with bound parameters.
    async fn execute(&mut self, id: StatementId, params: &[Value])
        -> Result<Outcome, BackendError>;

    /// Release a prepared statement.
    async fn close_statement(&mut self, id: StatementId) -> Result<(), BackendError>;

    /// Discard the live connection after a cancelled operation so the next
    /// call starts from a clean session.
    async fn reset(&mut self);

    /// Close the connection.
    async fn close(&mut self) -> Result<(), BackendError>;
}
