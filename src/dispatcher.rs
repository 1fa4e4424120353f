//! Concurrent fan-out of one command to both roles.

use crate::connection::{BackendConnection, Command};
use shadow_core::{Failure, Outcome, SideTiming};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Both outcomes of one dispatched command.
#[derive(Debug, Clone)]
pub struct Dispatched {
    pub reference: Outcome,
    pub candidate: Outcome,
    pub timing: SideTiming,
}

/// Runs a command on both roles concurrently, each under its own deadline.
#[derive(Debug, Clone, Copy)]
pub struct Dispatcher {
    timeout: Duration,
}

impl Dispatcher {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Execute `command` on both connections and wait for both outcomes.
    ///
    /// A side that misses the deadline is cancelled, its connection is reset,
    /// and it yields a timeout failure. Latency is bounded by the slower side
    /// (or the deadline).
    pub async fn dispatch(
        &self,
        reference: &mut BackendConnection,
        candidate: &mut BackendConnection,
        command: &Command<'_>,
    ) -> Dispatched {
        let ((reference, reference_ms), (candidate, candidate_ms)) = tokio::join!(
            self.run_one(reference, command),
            self.run_one(candidate, command)
        );
        Dispatched {
            reference,
            candidate,
            timing: SideTiming {
                reference_ms,
                candidate_ms,
            },
        }
    }

    async fn run_one(&self, conn: &mut BackendConnection, command: &Command<'_>) -> (Outcome, u64) {
        let start = Instant::now();
        let outcome = match tokio::time::timeout(self.timeout, conn.execute(command)).await {
            Ok(outcome) => outcome,
            Err(_) => {
                warn!(
                    "{} backend timed out after {:?}, resetting connection",
                    conn.role(),
                    self.timeout
                );
                conn.reset().await;
                Outcome::Failure(Failure::timeout(self.timeout.as_millis()))
            }
        };
        let elapsed = start.elapsed().as_millis() as u64;
        debug!("{} backend finished in {} ms", conn.role(), elapsed);
        (outcome, elapsed)
    }
}
