//! Agent turn execution: post one message, run the thread, parse the reply.
//!
//! This module is intentionally thin — prompt content lives in
//! [`crate::agent::prompts`] so it can change without touching retry or
//! parsing logic here.
//!
//! ## Retry strategy
//!
//! Agent runs fail transiently under load (model overload, thread
//! contention), so a failed run is retried with a **fixed** delay — no
//! exponential growth. Turns are strictly sequential within a run, so there
//! is no thundering herd to avoid, and a bounded wait keeps a recovering
//! service saturated with exactly one pending run. The message itself is
//! posted once, before the retry loop: the thread already holds it, and
//! re-posting on retry would duplicate conversation context.

use std::collections::BTreeMap;
use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::agent::prompts::{build_prompt, PromptInputs};
use crate::agent::{AgentReply, AgentRole, AgentService, ThreadId};
use crate::config::TurnRetryPolicy;
use crate::error::ActivityError;
use crate::pipeline::raster::PageImage;

/// Everything one turn needs: role, thread, and the context blocks.
#[derive(Debug, Clone, Copy)]
pub struct TurnContext<'a> {
    pub role: AgentRole,
    pub thread: &'a ThreadId,
    /// Target schema (Analyst/Reviewer) or format template (Formatter).
    pub schema: &'a Value,
    pub ocr_text: &'a str,
    pub key_values: &'a BTreeMap<String, String>,
    /// Full run-wide image set; attached only when the role takes images.
    pub images: &'a [PageImage],
    pub current_extract: &'a Value,
    pub current_feedback: &'a Value,
}

/// The outcome of one completed turn. Serialisable so the orchestrator can
/// journal it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnOutput {
    pub reply: AgentReply,
    pub tokens: u64,
}

/// Render a JSON value for prompt text: strings verbatim, everything else as
/// compact JSON. Keeps raw (unparsed) extracts from gaining quote noise on
/// their way back into the next prompt.
fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

static RE_CODE_FENCES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```(?:json)?\s*\n?(.*?)\n?```\s*$").expect("valid regex"));

/// Strip a wrapping markdown code fence from an agent reply, if present.
///
/// Agents are told to answer with bare JSON, but models wrap replies in
/// ` ```json … ``` ` often enough that the parser has to tolerate it.
pub fn strip_code_fences(text: &str) -> &str {
    match RE_CODE_FENCES.captures(text.trim()) {
        Some(caps) => caps.get(1).map_or("", |m| m.as_str()),
        None => text.trim(),
    }
}

/// Parse an agent reply: fence-stripped JSON when possible, the literal text
/// otherwise.
pub fn parse_reply(text: &str) -> AgentReply {
    let cleaned = strip_code_fences(text);
    match serde_json::from_str::<Value>(cleaned) {
        Ok(value) => AgentReply::Structured(value),
        Err(e) => {
            debug!(%e, "agent reply is not JSON, keeping raw text");
            AgentReply::Raw(cleaned.to_string())
        }
    }
}

/// Execute one agent turn: build the role's prompt, post it (with images for
/// Analyst/Reviewer), then drive the run to completion under `policy`.
///
/// Returns `Err` only when `policy.max_attempts` is bounded and exhausted;
/// the default unbounded policy retries until the service recovers.
pub async fn execute_turn(
    service: &Arc<dyn AgentService>,
    ctx: TurnContext<'_>,
    policy: &TurnRetryPolicy,
) -> Result<TurnOutput, ActivityError> {
    let schema_text = value_text(ctx.schema);
    let key_values_text = serde_json::to_string(ctx.key_values)?;
    let extract_text = value_text(ctx.current_extract);
    let feedback_text = value_text(ctx.current_feedback);

    let prompt = build_prompt(
        ctx.role,
        &PromptInputs {
            schema: &schema_text,
            ocr_text: ctx.ocr_text,
            key_values: &key_values_text,
            current_extract: &extract_text,
            current_feedback: &feedback_text,
        },
    );

    let images: &[PageImage] = if ctx.role.attaches_images() {
        ctx.images
    } else {
        &[]
    };

    service.post_message(ctx.thread, &prompt, images).await?;

    let mut attempt: u32 = 0;
    loop {
        attempt += 1;
        match service.run_thread(ctx.thread, ctx.role).await {
            Ok(output) => {
                let reply = parse_reply(&output.text);
                debug!(
                    role = %ctx.role,
                    tokens = output.total_tokens,
                    structured = matches!(reply, AgentReply::Structured(_)),
                    "agent turn complete"
                );
                return Ok(TurnOutput {
                    reply,
                    tokens: output.total_tokens,
                });
            }
            Err(e) => {
                if let Some(max) = policy.max_attempts {
                    if attempt >= max {
                        return Err(ActivityError::AgentService {
                            detail: format!("run failed after {attempt} attempts: {e}"),
                        });
                    }
                }
                warn!(role = %ctx.role, attempt, %e, "agent run failed, retrying");
                sleep(policy.delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn strips_json_fence() {
        assert_eq!(
            strip_code_fences("```json\n{\"a\": 1}\n```"),
            "{\"a\": 1}"
        );
    }

    #[test]
    fn strips_bare_fence() {
        assert_eq!(strip_code_fences("```\n{\"a\": 1}\n```"), "{\"a\": 1}");
    }

    #[test]
    fn leaves_unfenced_text_alone() {
        assert_eq!(strip_code_fences("  {\"a\": 1} "), "{\"a\": 1}");
        assert_eq!(strip_code_fences("plain text"), "plain text");
    }

    #[test]
    fn parse_reply_structured() {
        assert_eq!(
            parse_reply("```json\n{\"complete\": true}\n```"),
            AgentReply::Structured(json!({"complete": true}))
        );
    }

    #[test]
    fn parse_reply_falls_back_to_raw() {
        assert_eq!(
            parse_reply("the total could not be determined"),
            AgentReply::Raw("the total could not be determined".into())
        );
    }

    #[test]
    fn value_text_renders_strings_bare() {
        assert_eq!(value_text(&json!("raw extract")), "raw extract");
        assert_eq!(value_text(&json!({"a": 1})), "{\"a\":1}");
        assert_eq!(value_text(&json!("")), "");
    }

    struct FlakyService {
        fail_runs: AtomicUsize,
        posts: AtomicUsize,
        runs: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl AgentService for FlakyService {
        async fn create_thread(&self) -> Result<ThreadId, ActivityError> {
            Ok(ThreadId::new("t"))
        }

        async fn post_message(
            &self,
            _thread: &ThreadId,
            _text: &str,
            _images: &[PageImage],
        ) -> Result<(), ActivityError> {
            self.posts.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn run_thread(
            &self,
            _thread: &ThreadId,
            _role: AgentRole,
        ) -> Result<crate::agent::AgentRunOutput, ActivityError> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            if self.fail_runs.load(Ordering::SeqCst) > 0 {
                self.fail_runs.fetch_sub(1, Ordering::SeqCst);
                return Err(ActivityError::AgentService {
                    detail: "503".into(),
                });
            }
            Ok(crate::agent::AgentRunOutput {
                text: "{\"ok\": true}".into(),
                total_tokens: 11,
            })
        }
    }

    fn turn_ctx<'a>(
        thread: &'a ThreadId,
        schema: &'a Value,
        kv: &'a BTreeMap<String, String>,
        extract: &'a Value,
        feedback: &'a Value,
    ) -> TurnContext<'a> {
        TurnContext {
            role: AgentRole::Analyst,
            thread,
            schema,
            ocr_text: "OCR",
            key_values: kv,
            images: &[],
            current_extract: extract,
            current_feedback: feedback,
        }
    }

    #[tokio::test]
    async fn turn_retries_until_run_succeeds() {
        let service = Arc::new(FlakyService {
            fail_runs: AtomicUsize::new(2),
            posts: AtomicUsize::new(0),
            runs: AtomicUsize::new(0),
        });
        let dyn_service: Arc<dyn AgentService> = service.clone();

        let thread = ThreadId::new("t");
        let schema = json!({});
        let kv = BTreeMap::new();
        let extract = json!("");
        let feedback = json!("");

        let policy = TurnRetryPolicy {
            delay: Duration::from_millis(1),
            max_attempts: None,
        };
        let out = execute_turn(
            &dyn_service,
            turn_ctx(&thread, &schema, &kv, &extract, &feedback),
            &policy,
        )
        .await
        .unwrap();

        assert_eq!(out.reply, AgentReply::Structured(json!({"ok": true})));
        assert_eq!(out.tokens, 11);
        // The message is posted exactly once; only the run is retried.
        assert_eq!(service.posts.load(Ordering::SeqCst), 1);
        assert_eq!(service.runs.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn bounded_policy_surfaces_exhaustion() {
        let service = Arc::new(FlakyService {
            fail_runs: AtomicUsize::new(10),
            posts: AtomicUsize::new(0),
            runs: AtomicUsize::new(0),
        });
        let dyn_service: Arc<dyn AgentService> = service.clone();

        let thread = ThreadId::new("t");
        let schema = json!({});
        let kv = BTreeMap::new();
        let extract = json!("");
        let feedback = json!("");

        let policy = TurnRetryPolicy {
            delay: Duration::from_millis(1),
            max_attempts: Some(3),
        };
        let err = execute_turn(
            &dyn_service,
            turn_ctx(&thread, &schema, &kv, &extract, &feedback),
            &policy,
        )
        .await
        .unwrap_err();

        assert!(err.to_string().contains("3 attempts"));
        assert_eq!(service.runs.load(Ordering::SeqCst), 3);
    }
}
