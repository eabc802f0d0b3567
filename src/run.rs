//! Run identity, stage names, and the run's externally visible outputs.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::agent::AgentRole;

/// Opaque identifier for one end-to-end run.
///
/// Ids are supplied by the caller (or generated at the trigger edge via
/// [`RunId::generate`]). The orchestrator itself never creates one — its
/// control logic must stay replayable, and a freshly rolled id on restart
/// would split a run from its journal and audit record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(String);

impl RunId {
    /// Wrap a caller-supplied id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh random id. Call this at the trigger boundary only.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The orchestrator's state-machine stages.
///
/// `Analyze` and `Review` are the two sub-states of the feedback loop; every
/// other stage runs at most once per run. `Failed` is reachable from any
/// non-terminal stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Stage {
    Initializing,
    ContainerCheck,
    SourceDiscovery,
    Extraction,
    Analyze,
    Review,
    Format,
    Persist,
    Completed,
    Failed,
}

impl Stage {
    /// Human-readable status line for observers and dashboards.
    pub fn describe(&self) -> &'static str {
        match self {
            Stage::Initializing => "Initializing run",
            Stage::ContainerCheck => "Checked intermediate processing containers",
            Stage::SourceDiscovery => "Retrieved source files",
            Stage::Extraction => "Extracted OCR content and page images",
            Stage::Analyze => "Analyst agent extracting fields",
            Stage::Review => "Reviewer agent evaluating extract",
            Stage::Format => "Formatter agent producing final schema",
            Stage::Persist => "Persisting final extract",
            Stage::Completed => "Completed",
            Stage::Failed => "Failed",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.describe())
    }
}

/// One entry in a run's append-only agent-response log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageResponse {
    /// Which agent produced the response.
    pub role: AgentRole,
    /// The response value — structured JSON, or a plain string when the
    /// agent's reply did not parse (see [`crate::agent::AgentReply`]).
    pub response: serde_json::Value,
    /// Tokens consumed by this turn.
    pub tokens: u64,
}

/// The result of a completed run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunOutcome {
    pub run_id: RunId,
    /// Name of the artifact written to the processed-results container.
    pub artifact: String,
    /// Total tokens consumed across all agent turns.
    pub tokens_consumed: u64,
    /// Number of Analyze/Review iterations performed.
    pub iterations: u32,
    /// Ordered log of every agent response in the run.
    pub responses: Vec<StageResponse>,
    /// The final (formatted) extract.
    pub extract: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_are_unique() {
        assert_ne!(RunId::generate(), RunId::generate());
    }

    #[test]
    fn run_id_serialises_as_plain_string() {
        let id = RunId::new("run-42");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"run-42\"");
        let back: RunId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn stage_descriptions_are_distinct() {
        let stages = [
            Stage::Initializing,
            Stage::ContainerCheck,
            Stage::SourceDiscovery,
            Stage::Extraction,
            Stage::Analyze,
            Stage::Review,
            Stage::Format,
            Stage::Persist,
            Stage::Completed,
            Stage::Failed,
        ];
        let mut seen = std::collections::HashSet::new();
        for s in stages {
            assert!(seen.insert(s.describe()), "duplicate description: {s}");
        }
    }
}
