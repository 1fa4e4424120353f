//! Picks the outcome returned to the client and routes reports.

use crate::observer::DivergenceSink;
use shadow_core::{DivergenceReport, Outcome, ReconcilePolicy};
use std::sync::Arc;

/// Chooses the canonical outcome for a compared statement and hands the
/// report to the sink.
#[derive(Clone)]
pub struct Reconciler {
    policy: ReconcilePolicy,
    sink: Arc<dyn DivergenceSink>,
}

impl Reconciler {
    pub fn new(policy: ReconcilePolicy, sink: Arc<dyn DivergenceSink>) -> Self {
        Self { policy, sink }
    }

    pub fn policy(&self) -> ReconcilePolicy {
        self.policy
    }

    /// Whether a report is handed to the sink.
    ///
    /// Session-state commands are only reported when exactly one backend
    /// rejected them.
    pub fn should_emit(report: &DivergenceReport) -> bool {
        !report.kind.is_session_state() || report.classification.is_one_side_failed()
    }

    /// Emit the report (unless exempt) and return the client's outcome.
    ///
    /// The report is emitted whichever outcome is chosen.
    pub fn reconcile(&self, report: DivergenceReport) -> Outcome {
        if Self::should_emit(&report) {
            self.sink.emit(&report);
        }
        let DivergenceReport {
            reference,
            candidate,
            ..
        } = report;
        self.choose(reference, candidate)
    }

    fn choose(&self, reference: Outcome, candidate: Outcome) -> Outcome {
        match self.policy {
            ReconcilePolicy::ReferenceWins => reference,
            ReconcilePolicy::PreferSuccess if reference.is_failure() && !candidate.is_failure() => {
                candidate
            }
            ReconcilePolicy::PreferSuccess => reference,
        }
    }
}
