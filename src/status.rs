//! Run observation: stage transitions, per-turn updates, and a pollable
//! status snapshot.
//!
//! Inject an [`Arc<dyn RunObserver>`] via
//! [`crate::orchestrator::Orchestrator::with_observer`] to receive events as
//! the state machine advances. The callback approach is the least-invasive
//! integration point: callers can forward events to a progress bar, a
//! WebSocket, or a database record without the library knowing anything about
//! how the host application communicates.
//!
//! For the common "poll the run from outside" case, [`StatusCell`] is a
//! ready-made observer that retains the latest [`RunStatusSnapshot`] behind a
//! lock — the status-polling surface without a server.

use std::sync::{Arc, RwLock};

use serde::Serialize;
use serde_json::Value;

use crate::agent::AgentRole;
use crate::error::WorkflowError;
use crate::run::{RunOutcome, Stage};

/// Called by the orchestrator as the run advances.
///
/// Implementations must be `Send + Sync`. All methods have default no-op
/// implementations so callers only override what they care about. Methods are
/// invoked from the run's single control task, never concurrently.
pub trait RunObserver: Send + Sync {
    /// Called on every state-machine transition.
    fn on_stage(&self, stage: Stage) {
        let _ = stage;
    }

    /// Called for out-of-band status notes (e.g. a swallowed audit failure).
    fn on_note(&self, note: &str) {
        let _ = note;
    }

    /// Called after each completed agent turn with the cumulative token
    /// count and the turn's response value.
    fn on_turn(&self, role: AgentRole, tokens_consumed: u64, response: &Value) {
        let _ = (role, tokens_consumed, response);
    }

    /// Called once when the run reaches `Completed`.
    fn on_completed(&self, outcome: &RunOutcome) {
        let _ = outcome;
    }

    /// Called once when the run reaches `Failed`.
    fn on_failed(&self, error: &WorkflowError) {
        let _ = error;
    }
}

/// A no-op implementation for callers that don't need run events.
///
/// This is the default when no observer is configured.
pub struct NoopRunObserver;

impl RunObserver for NoopRunObserver {}

/// Convenience alias matching the type the orchestrator stores.
pub type ObserverHandle = Arc<dyn RunObserver>;

/// Coarse run state for external observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

/// Point-in-time view of a run, retained by [`StatusCell`].
#[derive(Debug, Clone, Serialize)]
pub struct RunStatusSnapshot {
    pub status: RunStatus,
    /// The most recently entered stage, with its human-readable text.
    pub stage: Option<Stage>,
    /// Cumulative tokens across all completed agent turns.
    pub tokens_consumed: u64,
    /// The latest agent response, if any turn has completed.
    pub latest_response: Option<Value>,
    /// The persisted artifact name, once the run completes.
    pub artifact: Option<String>,
    /// The failure description, once the run fails.
    pub error: Option<String>,
}

impl Default for RunStatusSnapshot {
    fn default() -> Self {
        Self {
            status: RunStatus::Running,
            stage: None,
            tokens_consumed: 0,
            latest_response: None,
            artifact: None,
            error: None,
        }
    }
}

/// Observer that retains the latest snapshot for polling.
#[derive(Default)]
pub struct StatusCell {
    inner: RwLock<RunStatusSnapshot>,
}

impl StatusCell {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// The latest snapshot.
    pub fn snapshot(&self) -> RunStatusSnapshot {
        self.inner.read().expect("lock").clone()
    }
}

impl RunObserver for StatusCell {
    fn on_stage(&self, stage: Stage) {
        let mut s = self.inner.write().expect("lock");
        s.stage = Some(stage);
    }

    fn on_turn(&self, _role: AgentRole, tokens_consumed: u64, response: &Value) {
        let mut s = self.inner.write().expect("lock");
        s.tokens_consumed = tokens_consumed;
        s.latest_response = Some(response.clone());
    }

    fn on_completed(&self, outcome: &RunOutcome) {
        let mut s = self.inner.write().expect("lock");
        s.status = RunStatus::Completed;
        s.artifact = Some(outcome.artifact.clone());
        s.tokens_consumed = outcome.tokens_consumed;
    }

    fn on_failed(&self, error: &WorkflowError) {
        let mut s = self.inner.write().expect("lock");
        s.status = RunStatus::Failed;
        s.error = Some(error.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::run::RunId;
    use serde_json::json;

    #[test]
    fn noop_observer_does_not_panic() {
        let cb = NoopRunObserver;
        cb.on_stage(Stage::Extraction);
        cb.on_note("a note");
        cb.on_turn(AgentRole::Analyst, 10, &json!({}));
        cb.on_failed(&WorkflowError::Internal("x".into()));
    }

    #[test]
    fn status_cell_tracks_progress_and_completion() {
        let cell = StatusCell::new();
        assert_eq!(cell.snapshot().status, RunStatus::Running);

        cell.on_stage(Stage::Analyze);
        cell.on_turn(AgentRole::Analyst, 120, &json!({"total": 9.5}));

        let snap = cell.snapshot();
        assert_eq!(snap.stage, Some(Stage::Analyze));
        assert_eq!(snap.tokens_consumed, 120);
        assert_eq!(snap.latest_response, Some(json!({"total": 9.5})));

        cell.on_completed(&RunOutcome {
            run_id: RunId::new("r"),
            artifact: "doc.json".into(),
            tokens_consumed: 300,
            iterations: 2,
            responses: vec![],
            extract: json!({}),
        });
        let snap = cell.snapshot();
        assert_eq!(snap.status, RunStatus::Completed);
        assert_eq!(snap.artifact.as_deref(), Some("doc.json"));
        assert_eq!(snap.tokens_consumed, 300);
    }

    #[test]
    fn status_cell_records_failure() {
        let cell = StatusCell::new();
        cell.on_stage(Stage::ContainerCheck);
        cell.on_failed(&WorkflowError::Internal("boom".into()));

        let snap = cell.snapshot();
        assert_eq!(snap.status, RunStatus::Failed);
        assert!(snap.error.as_deref().unwrap().contains("boom"));
    }
}
