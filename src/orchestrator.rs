//! The durable workflow orchestrator.
//!
//! One [`Orchestrator::run`] call drives a request through the state machine
//!
//! ```text
//! Initializing → ContainerCheck → SourceDiscovery → Extraction (parallel)
//!              → AnalyzeReview (loop) → Format → Persist → Completed
//! ```
//!
//! with `Failed` reachable from any non-terminal stage.
//!
//! ## Durability model
//!
//! Every side-effecting operation — container creation, blob reads/writes,
//! agent turns, audit writes — is an *activity*: a discrete unit invoked
//! through [`Orchestrator::activity`], which journals the result under a
//! stable key the moment it completes. Activities are passed in as unpolled
//! futures; on a journal hit the future is dropped without ever starting, so
//! replay performs no remote work. The control logic in this module is
//! deterministic (no wall-clock reads, no random values, no unrecorded
//! external state feeding a branch), so re-running a crashed run against its
//! journal replays every completed activity from the record and resumes live
//! execution at exactly the first unfinished one. Already-written derived
//! artifacts are never rolled back; activities are idempotent and
//! re-submission is the recovery mechanism.
//!
//! ## Concurrency model
//!
//! A single logical control task per run. True parallelism exists only in
//! the Extraction stage, where per-file OCR and rasterisation tasks all run
//! concurrently and the stage joins on every one of them. Agent turns are
//! strictly sequential: each turn's prompt depends on the previous turn's
//! output.

use std::future::Future;
use std::sync::Arc;

use futures::future::try_join_all;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::agent::turn::{execute_turn, TurnContext, TurnOutput};
use crate::agent::{AgentRole, AgentService, ThreadId};
use crate::audit::{AuditRecord, AuditStore, MemoryAuditStore};
use crate::config::{RetryPolicy, RunRequest};
use crate::defaults::{resolve_format_template, resolve_target_schema};
use crate::error::{ActivityError, WorkflowError};
use crate::journal::{JournalStore, MemoryJournal};
use crate::pipeline::ocr::{self, OcrService, PageExtraction};
use crate::pipeline::raster::{self, PageImage, PdfiumRasterizer, Rasterizer};
use crate::run::{RunOutcome, Stage, StageResponse};
use crate::status::{NoopRunObserver, RunObserver};
use crate::store::DocumentStore;

/// Names of the three derived containers for a source container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DerivedContainers {
    pub images: String,
    pub ocr_results: String,
    pub processed_results: String,
}

impl DerivedContainers {
    pub fn for_source(container: &str) -> Self {
        Self {
            images: format!("{container}-images"),
            ocr_results: format!("{container}-document-intelligence-results"),
            processed_results: format!("{container}-processed-results"),
        }
    }
}

/// The workflow orchestrator. One instance serves any number of independent
/// runs; all per-run state lives on the stack of [`Orchestrator::run`].
pub struct Orchestrator {
    store: Arc<dyn DocumentStore>,
    ocr: Arc<dyn OcrService>,
    agents: Arc<dyn AgentService>,
    rasterizer: Arc<dyn Rasterizer>,
    audit: Arc<dyn AuditStore>,
    journal: Arc<dyn JournalStore>,
    observer: Arc<dyn RunObserver>,
}

impl Orchestrator {
    /// Create an orchestrator over the three mandatory collaborators.
    ///
    /// Defaults: pdfium rasteriser, in-memory audit store, in-memory journal
    /// (durable within the process only), no-op observer. Swap any of them
    /// with the `with_*` methods.
    pub fn new(
        store: Arc<dyn DocumentStore>,
        ocr: Arc<dyn OcrService>,
        agents: Arc<dyn AgentService>,
    ) -> Self {
        Self {
            store,
            ocr,
            agents,
            rasterizer: Arc::new(PdfiumRasterizer::new()),
            audit: Arc::new(MemoryAuditStore::new()),
            journal: Arc::new(MemoryJournal::new()),
            observer: Arc::new(NoopRunObserver),
        }
    }

    pub fn with_rasterizer(mut self, rasterizer: Arc<dyn Rasterizer>) -> Self {
        self.rasterizer = rasterizer;
        self
    }

    pub fn with_audit(mut self, audit: Arc<dyn AuditStore>) -> Self {
        self.audit = audit;
        self
    }

    /// Use a persistent journal to make the run crash-resumable: re-running
    /// the same request against the same journal replays completed
    /// activities instead of re-executing them.
    pub fn with_journal(mut self, journal: Arc<dyn JournalStore>) -> Self {
        self.journal = journal;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn RunObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Execute one run to a terminal state.
    pub async fn run(&self, request: RunRequest) -> Result<RunOutcome, WorkflowError> {
        match self.execute(&request).await {
            Ok(outcome) => {
                info!(run_id = %outcome.run_id, artifact = %outcome.artifact, "run completed");
                self.observer.on_stage(Stage::Completed);
                self.observer.on_completed(&outcome);
                Ok(outcome)
            }
            Err(error) => {
                warn!(run_id = %request.run_id, %error, "run failed");
                self.observer.on_stage(Stage::Failed);
                self.observer.on_failed(&error);
                Err(error)
            }
        }
    }

    async fn execute(&self, request: &RunRequest) -> Result<RunOutcome, WorkflowError> {
        request.validate()?;
        info!(
            run_id = %request.run_id,
            container = %request.container,
            filename = %request.filename,
            "starting document-analysis run"
        );

        let schema = resolve_target_schema(&request.target_schema);
        let template = resolve_format_template(&request.format_template);
        let containers = DerivedContainers::for_source(&request.container);

        // ── Initializing ─────────────────────────────────────────────────
        self.observer.on_stage(Stage::Initializing);
        if request.audit_logging {
            self.audit_create(request).await;
        }

        // ── ContainerCheck ───────────────────────────────────────────────
        self.observer.on_stage(Stage::ContainerCheck);
        let _: bool = self
            .activity_with_retry("containers", &request.setup_retry, || {
                let store = Arc::clone(&self.store);
                let names = [
                    containers.images.clone(),
                    containers.ocr_results.clone(),
                    containers.processed_results.clone(),
                ];
                async move {
                    for name in &names {
                        store.ensure_container(name).await?;
                    }
                    Ok(true)
                }
            })
            .await
            .map_err(|source| WorkflowError::ContainerCheckFailed {
                container: request.container.clone(),
                source,
            })?;

        // ── SourceDiscovery ──────────────────────────────────────────────
        self.observer.on_stage(Stage::SourceDiscovery);
        let files: Vec<String> = self
            .activity_with_retry("discover", &request.setup_retry, || {
                let store = Arc::clone(&self.store);
                let container = request.container.clone();
                let prefix = request.filename.clone();
                async move {
                    let names = store.list(&container, &prefix).await?;
                    Ok(names
                        .into_iter()
                        .filter(|name| name.to_lowercase().ends_with(".pdf"))
                        .collect())
                }
            })
            .await
            .map_err(|source| WorkflowError::SourceDiscoveryFailed {
                container: request.container.clone(),
                prefix: request.filename.clone(),
                source,
            })?;
        info!(count = files.len(), "discovered source files");

        // ── Extraction (parallel fan-out) ────────────────────────────────
        // One OCR task and one rasterisation task per file; the two groups
        // overlap freely and the stage completes only when every task in
        // both groups has. A single failure fails the whole stage.
        self.observer.on_stage(Stage::Extraction);
        let ocr_results_container = containers.ocr_results.as_str();
        let images_container = containers.images.as_str();
        let ocr_tasks = files.iter().map(|file| async move {
            self.activity(
                &format!("ocr:{file}"),
                ocr::extract_document(
                    &self.store,
                    &self.ocr,
                    &request.container,
                    ocr_results_container,
                    &request.doc_intel_model,
                    file,
                ),
            )
            .await
            .map_err(|source| WorkflowError::ExtractionFailed {
                file: file.clone(),
                source,
            })
        });
        let raster_tasks = files.iter().map(|file| async move {
            self.activity(
                &format!("raster:{file}"),
                raster::rasterize_document(
                    &self.store,
                    &self.rasterizer,
                    &request.container,
                    images_container,
                    file,
                    request.max_render_pixels,
                ),
            )
            .await
            .map_err(|source| WorkflowError::RasterisationFailed {
                file: file.clone(),
                source,
            })
        });
        let (extractions, image_lists) =
            futures::try_join!(try_join_all(ocr_tasks), try_join_all(raster_tasks))?;

        let extractions: Vec<PageExtraction> = extractions.into_iter().flatten().collect();
        let images: Vec<PageImage> = image_lists.into_iter().flatten().collect();

        let Some(first) = extractions.first() else {
            return Err(WorkflowError::NoSourceDocuments {
                container: request.container.clone(),
                prefix: request.filename.clone(),
            });
        };
        info!(
            documents = extractions.len(),
            pages = images.len(),
            "extraction stage complete"
        );

        // ── Conversation threads (one per role, reused for every turn) ───
        let analyst_thread = self.thread_activity(AgentRole::Analyst).await?;
        let reviewer_thread = self.thread_activity(AgentRole::Reviewer).await?;
        let formatter_thread = self.thread_activity(AgentRole::Formatter).await?;

        // ── AnalyzeReview loop ───────────────────────────────────────────
        // Single-document design: every turn works from the first discovered
        // file's OCR context, with the full image set attached.
        let mut total_tokens: u64 = 0;
        let mut responses: Vec<StageResponse> = Vec::new();
        let mut current_extract = Value::String(String::new());
        let mut current_feedback = Value::String(String::new());
        let mut iterations: u32 = 0;

        while iterations < request.max_iterations {
            iterations += 1;

            self.observer.on_stage(Stage::Analyze);
            let analyze = self
                .turn_activity(
                    &format!("turn:{iterations}:analyst"),
                    TurnContext {
                        role: AgentRole::Analyst,
                        thread: &analyst_thread,
                        schema: &schema,
                        ocr_text: &first.ocr_text,
                        key_values: &first.key_values,
                        images: &images,
                        current_extract: &current_extract,
                        current_feedback: &current_feedback,
                    },
                    request,
                )
                .await?;
            current_extract = analyze.reply.as_value();
            total_tokens += analyze.tokens;
            responses.push(StageResponse {
                role: AgentRole::Analyst,
                response: current_extract.clone(),
                tokens: analyze.tokens,
            });
            self.observer
                .on_turn(AgentRole::Analyst, total_tokens, &current_extract);
            if request.audit_logging {
                self.audit_append(
                    &format!("audit:turn:{iterations}:analyst"),
                    request,
                    AgentRole::Analyst,
                    &current_extract,
                    None,
                )
                .await;
            }

            self.observer.on_stage(Stage::Review);
            let review = self
                .turn_activity(
                    &format!("turn:{iterations}:reviewer"),
                    TurnContext {
                        role: AgentRole::Reviewer,
                        thread: &reviewer_thread,
                        schema: &schema,
                        ocr_text: &first.ocr_text,
                        key_values: &first.key_values,
                        images: &images,
                        current_extract: &current_extract,
                        current_feedback: &current_feedback,
                    },
                    request,
                )
                .await?;
            current_feedback = review.reply.as_value();
            total_tokens += review.tokens;
            responses.push(StageResponse {
                role: AgentRole::Reviewer,
                response: current_feedback.clone(),
                tokens: review.tokens,
            });
            self.observer
                .on_turn(AgentRole::Reviewer, total_tokens, &current_feedback);
            if request.audit_logging {
                self.audit_append(
                    &format!("audit:turn:{iterations}:reviewer"),
                    request,
                    AgentRole::Reviewer,
                    &current_feedback,
                    None,
                )
                .await;
            }

            if review.reply.completion_flag() {
                debug!(iterations, "reviewer signalled completion");
                break;
            }
        }

        // ── Format ───────────────────────────────────────────────────────
        // Unconditional: runs whether the loop converged or hit its budget.
        self.observer.on_stage(Stage::Format);
        let format = self
            .turn_activity(
                "turn:format",
                TurnContext {
                    role: AgentRole::Formatter,
                    thread: &formatter_thread,
                    schema: &template,
                    ocr_text: &first.ocr_text,
                    key_values: &first.key_values,
                    images: &images,
                    current_extract: &current_extract,
                    current_feedback: &current_feedback,
                },
                request,
            )
            .await?;
        current_extract = format.reply.as_value();
        total_tokens += format.tokens;
        responses.push(StageResponse {
            role: AgentRole::Formatter,
            response: current_extract.clone(),
            tokens: format.tokens,
        });
        self.observer
            .on_turn(AgentRole::Formatter, total_tokens, &current_extract);
        if request.audit_logging {
            self.audit_append(
                "audit:turn:format",
                request,
                AgentRole::Formatter,
                &current_extract,
                Some(&current_extract),
            )
            .await;
        }

        // ── Persist ──────────────────────────────────────────────────────
        self.observer.on_stage(Stage::Persist);
        let artifact_name = ocr::derived_result_name(&request.filename);
        let artifact: String = self
            .activity("persist", async {
                self.store
                    .put(
                        &containers.processed_results,
                        &artifact_name,
                        &serde_json::to_vec_pretty(&current_extract)?,
                    )
                    .await?;
                Ok(artifact_name.clone())
            })
            .await
            .map_err(|source| WorkflowError::PersistFailed {
                name: artifact_name.clone(),
                source,
            })?;

        Ok(RunOutcome {
            run_id: request.run_id.clone(),
            artifact,
            tokens_consumed: total_tokens,
            iterations,
            responses,
            extract: current_extract,
        })
    }

    // ── Activity plumbing ────────────────────────────────────────────────

    /// Run a side-effecting activity once, journaling its result under
    /// `key`. `work` is an unpolled future: on replay it is dropped without
    /// ever starting, so a journal hit performs no remote work.
    async fn activity<T, Fut>(&self, key: &str, work: Fut) -> Result<T, ActivityError>
    where
        T: Serialize + DeserializeOwned,
        Fut: Future<Output = Result<T, ActivityError>>,
    {
        if let Some(recorded) = self.journal.lookup(key)? {
            debug!(key, "activity served from journal");
            return Ok(serde_json::from_value(recorded)?);
        }
        let value = work.await?;
        self.journal.record(key, &serde_json::to_value(&value)?)?;
        Ok(value)
    }

    /// Like [`Orchestrator::activity`], with a bounded fixed-backoff retry
    /// for the setup stages. Takes a factory because each attempt needs a
    /// fresh future.
    async fn activity_with_retry<T, F, Fut>(
        &self,
        key: &str,
        policy: &RetryPolicy,
        mut attempt_work: F,
    ) -> Result<T, ActivityError>
    where
        T: Serialize + DeserializeOwned,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ActivityError>>,
    {
        if let Some(recorded) = self.journal.lookup(key)? {
            debug!(key, "activity served from journal");
            return Ok(serde_json::from_value(recorded)?);
        }

        let mut last_err: Option<ActivityError> = None;
        for attempt in 1..=policy.max_attempts {
            if attempt > 1 {
                warn!(key, attempt, "retrying setup activity after backoff");
                sleep(policy.backoff).await;
            }
            match attempt_work().await {
                Ok(value) => {
                    self.journal.record(key, &serde_json::to_value(&value)?)?;
                    return Ok(value);
                }
                Err(e) => {
                    warn!(key, attempt, %e, "setup activity attempt failed");
                    last_err = Some(e);
                }
            }
        }
        Err(last_err
            .unwrap_or_else(|| ActivityError::Task("retry policy allowed zero attempts".into())))
    }

    async fn thread_activity(&self, role: AgentRole) -> Result<ThreadId, WorkflowError> {
        self.activity(&format!("thread:{role}"), self.agents.create_thread())
            .await
            .map_err(|source| WorkflowError::ThreadCreationFailed { role, source })
    }

    async fn turn_activity(
        &self,
        key: &str,
        ctx: TurnContext<'_>,
        request: &RunRequest,
    ) -> Result<TurnOutput, WorkflowError> {
        let role = ctx.role;
        self.activity(key, execute_turn(&self.agents, ctx, &request.turn_retry))
            .await
            .map_err(|source| WorkflowError::TurnFailed { role, source })
    }

    /// Best-effort, journaled audit-record creation. Failures are logged and
    /// swallowed — the one stage permitted to fail silently.
    async fn audit_create(&self, request: &RunRequest) {
        let result: Result<bool, ActivityError> = self
            .activity("audit:create", async {
                let payload = serde_json::to_value(request)?;
                self.audit
                    .create(AuditRecord::new(&request.run_id, payload))
                    .await?;
                Ok(true)
            })
            .await;
        if let Err(e) = result {
            warn!(%e, "audit record creation failed (ignored)");
            self.observer.on_note("Failed to record run creation");
        }
    }

    /// Best-effort, journaled audit append after an agent turn.
    async fn audit_append(
        &self,
        key: &str,
        request: &RunRequest,
        role: AgentRole,
        response: &Value,
        extract: Option<&Value>,
    ) {
        let result: Result<bool, ActivityError> = self
            .activity(key, async {
                self.audit
                    .append(&request.run_id, role, response, extract)
                    .await?;
                Ok(true)
            })
            .await;
        if let Err(e) = result {
            warn!(%e, role = %role, "audit update failed (ignored)");
            self.observer.on_note("Failed to record agent response");
        }
    }
}
