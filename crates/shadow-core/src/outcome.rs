//! Normalized execution outcomes.

use crate::values::{ColumnMeta, Value};
use serde::Serialize;
use std::fmt;

/// MySQL error code reported when a statement exceeds its deadline
/// (`ER_QUERY_TIMEOUT`).
pub const TIMEOUT_ERROR_CODE: u16 = 3024;

/// Client error code used for a role whose connection is unavailable
/// (`CR_SERVER_GONE_ERROR`).
pub const CONNECTION_ERROR_CODE: u16 = 2006;

/// A result set returned by a backend.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultSet {
    /// Columns in backend-declared order.
    pub columns: Vec<ColumnMeta>,
    /// Rows in backend-returned order.
    pub rows: Vec<Vec<Value>>,
    /// Affected rows reported in the OK packet.
    pub affected_rows: u64,
    /// Warning count reported by the backend.
    pub warnings: u16,
    /// Last insert id, when the backend reported one. Not compared.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_insert_id: Option<u64>,
}

impl ResultSet {
    /// Create a result set with rows and no OK-packet counters.
    pub fn new(columns: Vec<ColumnMeta>, rows: Vec<Vec<Value>>) -> Self {
        Self {
            columns,
            rows,
            affected_rows: 0,
            warnings: 0,
            last_insert_id: None,
        }
    }

    /// Result of a statement that returns no columns (DML, DDL, SET...).
    pub fn ok(affected_rows: u64) -> Self {
        Self {
            affected_rows,
            ..Self::new(Vec::new(), Vec::new())
        }
    }

    /// Set the affected row count.
    pub fn with_affected_rows(mut self, affected_rows: u64) -> Self {
        self.affected_rows = affected_rows;
        self
    }

    /// Set the warning count.
    pub fn with_warnings(mut self, warnings: u16) -> Self {
        self.warnings = warnings;
        self
    }

    /// Set the last insert id.
    pub fn with_last_insert_id(mut self, id: Option<u64>) -> Self {
        self.last_insert_id = id;
        self
    }

    /// True when the statement produced no result columns.
    pub fn is_ok_packet(&self) -> bool {
        self.columns.is_empty()
    }
}

/// Why a failure outcome was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The backend rejected the statement.
    Statement,
    /// The statement exceeded the per-statement deadline.
    Timeout,
    /// The connection dropped while the statement was in flight.
    Connection,
    /// The role is degraded and the statement was never sent.
    Degraded,
}

/// A failed execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Failure {
    /// Backend (or synthetic) error code.
    pub code: u16,
    /// SQLSTATE, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sql_state: Option<String>,
    /// Error message text.
    pub message: String,
    /// Failure origin.
    pub kind: FailureKind,
}

impl Failure {
    /// A SQL-level rejection reported by the backend.
    pub fn statement(code: u16, message: impl Into<String>) -> Self {
        Self {
            code,
            sql_state: None,
            message: message.into(),
            kind: FailureKind::Statement,
        }
    }

    /// Synthetic failure for a statement that ran past its deadline.
    pub fn timeout(after_ms: u128) -> Self {
        Self {
            code: TIMEOUT_ERROR_CODE,
            sql_state: Some("HY000".to_string()),
            message: format!("Statement timed out after {after_ms} ms"),
            kind: FailureKind::Timeout,
        }
    }

    /// Failure for a statement interrupted by a lost connection.
    pub fn connection(message: impl Into<String>) -> Self {
        Self {
            code: CONNECTION_ERROR_CODE,
            sql_state: Some("HY000".to_string()),
            message: message.into(),
            kind: FailureKind::Connection,
        }
    }

    /// Synthetic failure substituted for a degraded role.
    pub fn degraded(role: impl fmt::Display) -> Self {
        Self {
            code: CONNECTION_ERROR_CODE,
            sql_state: Some("HY000".to_string()),
            message: format!("{role} backend is unavailable"),
            kind: FailureKind::Degraded,
        }
    }

    /// Attach a SQLSTATE.
    pub fn with_sql_state(mut self, state: impl Into<String>) -> Self {
        self.sql_state = Some(state.into());
        self
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.sql_state {
            Some(state) => write!(f, "ERROR {} ({}): {}", self.code, state, self.message),
            None => write!(f, "ERROR {}: {}", self.code, self.message),
        }
    }
}

/// Shape of a prepared statement as reported by one backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PreparedShape {
    /// Number of `?` placeholders.
    pub param_count: u16,
    /// Parameter metadata, when the backend reports it.
    pub params: Vec<ColumnMeta>,
    /// Result columns the statement will produce.
    pub columns: Vec<ColumnMeta>,
}

/// Normalized outcome of running one command on one backend.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    /// Statement succeeded (with or without rows).
    Rows(ResultSet),
    /// Statement was prepared.
    Prepared(PreparedShape),
    /// Statement failed.
    Failure(Failure),
}

impl Outcome {
    /// Check if this outcome is a failure.
    pub fn is_failure(&self) -> bool {
        matches!(self, Outcome::Failure(_))
    }

    /// Borrow the failure, if any.
    pub fn as_failure(&self) -> Option<&Failure> {
        match self {
            Outcome::Failure(f) => Some(f),
            _ => None,
        }
    }

    /// Borrow the result set, if any.
    pub fn as_rows(&self) -> Option<&ResultSet> {
        match self {
            Outcome::Rows(rs) => Some(rs),
            _ => None,
        }
    }
}

impl From<ResultSet> for Outcome {
    fn from(rs: ResultSet) -> Self {
        Outcome::Rows(rs)
    }
}

impl From<Failure> for Outcome {
    fn from(f: Failure) -> Self {
        Outcome::Failure(f)
    }
}

impl From<PreparedShape> for Outcome {
    fn from(shape: PreparedShape) -> Self {
        Outcome::Prepared(shape)
    }
}
