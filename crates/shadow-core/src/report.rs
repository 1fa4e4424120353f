//! Divergence report types.

use crate::compare::Classification;
use crate::outcome::Outcome;
use crate::policy::OrderingMode;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

/// Which client command produced a report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StatementKind {
    /// COM_QUERY carrying an ordinary statement.
    Query,
    /// COM_QUERY carrying a session-state statement (`USE`, `SET`).
    SessionState,
    /// COM_INIT_DB.
    InitDb,
    /// COM_STMT_PREPARE.
    Prepare,
    /// COM_STMT_EXECUTE.
    Execute,
}

impl StatementKind {
    /// Session-state commands only produce a report when exactly one side
    /// rejected them.
    pub fn is_session_state(self) -> bool {
        matches!(self, StatementKind::SessionState | StatementKind::InitDb)
    }
}

impl fmt::Display for StatementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StatementKind::Query => "query",
            StatementKind::SessionState => "session_state",
            StatementKind::InitDb => "init_db",
            StatementKind::Prepare => "prepare",
            StatementKind::Execute => "execute",
        };
        write!(f, "{name}")
    }
}

/// Wall-clock time each backend took for the statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct SideTiming {
    /// Reference elapsed milliseconds.
    pub reference_ms: u64,
    /// Candidate elapsed milliseconds.
    pub candidate_ms: u64,
}

/// The record produced for one client statement.
///
/// Reports are built once by the comparator and only handed out by shared
/// reference afterwards.
#[derive(Debug, Clone, Serialize)]
pub struct DivergenceReport {
    /// Client session that issued the statement (0 outside a session).
    pub session_id: u32,
    /// Statement text as received from the client.
    pub statement: String,
    /// Command kind.
    pub kind: StatementKind,
    /// Ordering mode used for the comparison.
    pub ordering: OrderingMode,
    /// Comparison verdict.
    pub classification: Classification,
    /// Reference outcome.
    pub reference: Outcome,
    /// Candidate outcome.
    pub candidate: Outcome,
    /// Per-side latency.
    pub timing: SideTiming,
    /// When the comparison finished.
    pub timestamp: DateTime<Utc>,
}

impl DivergenceReport {
    /// Create a report stamped with the current time.
    pub fn new(
        statement: &str,
        kind: StatementKind,
        ordering: OrderingMode,
        classification: Classification,
        reference: Outcome,
        candidate: Outcome,
        timing: SideTiming,
    ) -> Self {
        Self {
            session_id: 0,
            statement: statement.to_string(),
            kind,
            ordering,
            classification,
            reference,
            candidate,
            timing,
            timestamp: Utc::now(),
        }
    }

    /// Attribute the report to a session.
    pub fn for_session(mut self, session_id: u32) -> Self {
        self.session_id = session_id;
        self
    }

    /// Check if the outcomes matched.
    pub fn is_match(&self) -> bool {
        self.classification.is_match()
    }

    /// Get a one-line summary.
    pub fn summary(&self) -> String {
        format!(
            "[session {}] {} {}: {} (reference {} ms, candidate {} ms)",
            self.session_id,
            self.kind,
            truncate(&self.statement, 120),
            self.classification,
            self.timing.reference_ms,
            self.timing.candidate_ms
        )
    }
}

fn truncate(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}
