//! HTTP client for a thread/run conversational-agent service.
//!
//! Speaks the common assistants wire shape: threads are created once, user
//! messages (text plus data-URI image blocks) are appended to a thread, and a
//! run is started for a named agent and polled until it reaches a terminal
//! status. The latest assistant message is the turn's reply.
//!
//! Images go as `data:image/png;base64,…` URLs with `detail: "high"` — the
//! high-detail tile budget is what lets the model read fine print and small
//! tables on rasterised pages.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::time::sleep;
use tracing::debug;

use crate::agent::{AgentRole, AgentRunOutput, AgentService, ThreadId};
use crate::error::ActivityError;
use crate::pipeline::raster::PageImage;

/// Connection settings for the agent service.
#[derive(Debug, Clone)]
pub struct AgentEndpoint {
    /// Base URL, e.g. `https://agents.example.com/v1`.
    pub base_url: String,
    /// API key sent as a bearer token.
    pub api_key: String,
    /// Agent id registered for each role.
    pub agent_ids: HashMap<AgentRole, String>,
}

/// [`AgentService`] implementation over HTTP.
pub struct HttpAgentService {
    client: reqwest::Client,
    endpoint: AgentEndpoint,
    poll_interval: Duration,
}

impl HttpAgentService {
    pub fn new(endpoint: AgentEndpoint) -> Result<Self, ActivityError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()?;
        Ok(Self {
            client,
            endpoint,
            poll_interval: Duration::from_secs(2),
        })
    }

    /// Override the run-status poll interval (default 2 s).
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.endpoint.base_url.trim_end_matches('/'), path)
    }

    fn agent_id(&self, role: AgentRole) -> Result<&str, ActivityError> {
        self.endpoint
            .agent_ids
            .get(&role)
            .map(String::as_str)
            .ok_or_else(|| ActivityError::AgentService {
                detail: format!("no agent id configured for role '{role}'"),
            })
    }

    async fn post_json<T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        body: &Value,
    ) -> Result<T, ActivityError> {
        let response = self
            .client
            .post(self.url(path))
            .bearer_auth(&self.endpoint.api_key)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(ActivityError::AgentService {
                detail: format!("POST {path} returned {status}: {detail}"),
            });
        }
        Ok(response.json::<T>().await?)
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(&self, path: &str) -> Result<T, ActivityError> {
        let response = self
            .client
            .get(self.url(path))
            .bearer_auth(&self.endpoint.api_key)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(ActivityError::AgentService {
                detail: format!("GET {path} returned {status}: {detail}"),
            });
        }
        Ok(response.json::<T>().await?)
    }
}

// ── Wire types ───────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ThreadCreated {
    id: String,
}

#[derive(Debug, Deserialize)]
struct RunHandle {
    id: String,
    status: String,
    #[serde(default)]
    usage: Option<RunUsage>,
    #[serde(default)]
    last_error: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct RunUsage {
    #[serde(default)]
    total_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct MessageList {
    #[serde(default)]
    data: Vec<Message>,
}

#[derive(Debug, Deserialize)]
struct Message {
    #[serde(default)]
    role: String,
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    text: Option<TextValue>,
}

#[derive(Debug, Deserialize)]
struct TextValue {
    #[serde(default)]
    value: String,
}

/// Build the content-block array for one user message.
fn message_content(text: &str, images: &[PageImage]) -> Value {
    let mut blocks = vec![json!({ "type": "text", "text": text })];
    for image in images {
        blocks.push(json!({
            "type": "image_url",
            "image_url": {
                "url": format!("data:image/png;base64,{}", image.data),
                "detail": "high"
            }
        }));
    }
    Value::Array(blocks)
}

#[async_trait]
impl AgentService for HttpAgentService {
    async fn create_thread(&self) -> Result<ThreadId, ActivityError> {
        let created: ThreadCreated = self.post_json("threads", &json!({})).await?;
        debug!(thread = %created.id, "created agent thread");
        Ok(ThreadId::new(created.id))
    }

    async fn post_message(
        &self,
        thread: &ThreadId,
        text: &str,
        images: &[PageImage],
    ) -> Result<(), ActivityError> {
        let body = json!({
            "role": "user",
            "content": message_content(text, images),
        });
        let _: Value = self
            .post_json(&format!("threads/{}/messages", thread.as_str()), &body)
            .await?;
        debug!(thread = %thread, images = images.len(), "posted user message");
        Ok(())
    }

    async fn run_thread(
        &self,
        thread: &ThreadId,
        role: AgentRole,
    ) -> Result<AgentRunOutput, ActivityError> {
        let agent_id = self.agent_id(role)?;
        let body = json!({
            "agent_id": agent_id,
            "response_format": { "type": "json_object" },
        });
        let mut run: RunHandle = self
            .post_json(&format!("threads/{}/runs", thread.as_str()), &body)
            .await?;

        // Poll until the run reaches a terminal status.
        loop {
            match run.status.as_str() {
                "completed" => break,
                "failed" | "cancelled" | "expired" => {
                    return Err(ActivityError::AgentService {
                        detail: format!(
                            "run {} ended with status '{}': {}",
                            run.id,
                            run.status,
                            run.last_error
                                .as_ref()
                                .map(Value::to_string)
                                .unwrap_or_default()
                        ),
                    });
                }
                _ => {
                    sleep(self.poll_interval).await;
                    run = self
                        .get_json(&format!("threads/{}/runs/{}", thread.as_str(), run.id))
                        .await?;
                }
            }
        }

        let total_tokens = run.usage.map(|u| u.total_tokens).unwrap_or_default();

        // Latest assistant message is the reply.
        let messages: MessageList = self
            .get_json(&format!(
                "threads/{}/messages?order=desc&limit=10",
                thread.as_str()
            ))
            .await?;
        let text = messages
            .data
            .iter()
            .find(|m| m.role == "assistant")
            .and_then(|m| {
                m.content
                    .iter()
                    .find(|block| block.kind == "text")
                    .and_then(|block| block.text.as_ref())
                    .map(|t| t.value.clone())
            })
            .ok_or_else(|| ActivityError::AgentService {
                detail: format!("run {} completed but no assistant message found", run.id),
            })?;

        Ok(AgentRunOutput { text, total_tokens })
    }
}
