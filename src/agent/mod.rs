//! Agent roles, conversation threads, and the agent-service seam.
//!
//! Three conversational personas cooperate on every run: the **Analyst**
//! drafts and refines the extract, the **Reviewer** critiques it and decides
//! when it is complete, and the **Formatter** converts the converged extract
//! into the output template. Each role gets its own thread, created once per
//! run, so conversational context accumulates across turns.
//!
//! [`AgentService`] is the seam to the remote service: thin enough to wrap a
//! real thread/run HTTP API ([`HttpAgentService`]) and thin enough to script
//! in tests.

pub mod client;
pub mod prompts;
pub mod turn;

pub use client::{AgentEndpoint, HttpAgentService};
pub use turn::{TurnContext, TurnOutput};

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ActivityError;
use crate::pipeline::raster::PageImage;

/// The three agent personas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentRole {
    Analyst,
    Reviewer,
    Formatter,
}

impl AgentRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentRole::Analyst => "analyst",
            AgentRole::Reviewer => "reviewer",
            AgentRole::Formatter => "formatter",
        }
    }

    /// Whether this role's turns carry the page images. The Formatter works
    /// from structured text only.
    pub fn attaches_images(&self) -> bool {
        !matches!(self, AgentRole::Formatter)
    }
}

impl fmt::Display for AgentRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Handle to one conversation thread on the agent service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ThreadId(String);

impl ThreadId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A parsed agent reply.
///
/// Agents are instructed to answer in JSON, but models drift: a reply that
/// fails to parse is carried verbatim as [`AgentReply::Raw`] rather than
/// failing the run. The state machine still sees which case occurred —
/// downstream turns receive the raw text as the current extract/feedback
/// value, and a raw reply can never signal loop completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AgentReply {
    /// The reply parsed as structured JSON.
    Structured(Value),
    /// The reply was not valid JSON; the literal text is kept.
    Raw(String),
}

impl AgentReply {
    /// The reply as a JSON value: structured replies as-is, raw replies as a
    /// JSON string.
    pub fn as_value(&self) -> Value {
        match self {
            AgentReply::Structured(v) => v.clone(),
            AgentReply::Raw(text) => Value::String(text.clone()),
        }
    }

    /// The Reviewer's completion flag: `true` only for a structured reply
    /// whose `complete` field is boolean true.
    pub fn completion_flag(&self) -> bool {
        match self {
            AgentReply::Structured(v) => v.get("complete").and_then(Value::as_bool) == Some(true),
            AgentReply::Raw(_) => false,
        }
    }
}

/// One run-to-completion result: the latest assistant message plus usage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRunOutput {
    /// The assistant's latest message text, verbatim.
    pub text: String,
    /// Total tokens the run consumed.
    pub total_tokens: u64,
}

/// The remote agent service, reduced to thread/run semantics.
///
/// Implementations wrap one conversational-agent backend; the orchestrator
/// owns which thread each role uses and never interleaves runs on a thread.
#[async_trait]
pub trait AgentService: Send + Sync {
    /// Create a fresh conversation thread.
    async fn create_thread(&self) -> Result<ThreadId, ActivityError>;

    /// Append one user message (text plus optional image attachments) to a
    /// thread.
    async fn post_message(
        &self,
        thread: &ThreadId,
        text: &str,
        images: &[PageImage],
    ) -> Result<(), ActivityError>;

    /// Run the given role's agent to completion on the thread and return its
    /// latest reply and token usage.
    async fn run_thread(
        &self,
        thread: &ThreadId,
        role: AgentRole,
    ) -> Result<AgentRunOutput, ActivityError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn role_serialises_lowercase() {
        assert_eq!(
            serde_json::to_string(&AgentRole::Analyst).unwrap(),
            "\"analyst\""
        );
    }

    #[test]
    fn formatter_gets_no_images() {
        assert!(AgentRole::Analyst.attaches_images());
        assert!(AgentRole::Reviewer.attaches_images());
        assert!(!AgentRole::Formatter.attaches_images());
    }

    #[test]
    fn completion_flag_requires_structured_true() {
        assert!(AgentReply::Structured(json!({"complete": true})).completion_flag());
        assert!(!AgentReply::Structured(json!({"complete": false})).completion_flag());
        assert!(!AgentReply::Structured(json!({"complete": "true"})).completion_flag());
        assert!(!AgentReply::Structured(json!({"done": true})).completion_flag());
        assert!(!AgentReply::Raw("complete".into()).completion_flag());
    }

    #[test]
    fn raw_reply_becomes_json_string() {
        let reply = AgentReply::Raw("not json".into());
        assert_eq!(reply.as_value(), json!("not json"));
    }
}
