//! # docuflow
//!
//! Durable multi-agent document analysis: OCR + three cooperating AI agents
//! over a crash-resilient, replay-safe orchestration engine.
//!
//! ## Why this crate?
//!
//! Getting structured data out of messy multi-page PDFs takes more than one
//! model call: an extraction has to be drafted, critiqued against the source
//! document, refined, and finally normalised into an output schema — and
//! every one of those remote calls can fail halfway through a long run.
//! This crate makes the whole pipeline a deterministic state machine whose
//! side effects are journaled activities, so a crashed run resumes exactly
//! where it stopped without repeating completed work.
//!
//! ## Pipeline Overview
//!
//! ```text
//! trigger (RunRequest)
//!  │
//!  ├─ 1. ContainerCheck    ensure derived containers exist (idempotent)
//!  ├─ 2. SourceDiscovery   list matching .pdf blobs
//!  ├─ 3. Extraction        fan-out: OCR × N files ∥ rasterise × N files
//!  ├─ 4. AnalyzeReview     Analyst drafts → Reviewer critiques, looped
//!  │                       until complete or max_iterations
//!  ├─ 5. Format            Formatter maps the extract to the template
//!  └─ 6. Persist           write <container>-processed-results/<file>.json
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::collections::HashMap;
//! use std::sync::Arc;
//! use docuflow::{
//!     AgentEndpoint, AgentRole, FsDocumentStore, HttpAgentService, HttpOcrService,
//!     Orchestrator, RunId, RunRequest,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = Arc::new(FsDocumentStore::new("./data"));
//!     let ocr = Arc::new(HttpOcrService::new("https://ocr.example.com", "KEY")?);
//!     let agents = Arc::new(HttpAgentService::new(AgentEndpoint {
//!         base_url: "https://agents.example.com/v1".into(),
//!         api_key: "KEY".into(),
//!         agent_ids: HashMap::from([
//!             (AgentRole::Analyst, "agent-analyst".into()),
//!             (AgentRole::Reviewer, "agent-reviewer".into()),
//!             (AgentRole::Formatter, "agent-formatter".into()),
//!         ]),
//!     })?);
//!
//!     let orchestrator = Orchestrator::new(store, ocr, agents);
//!     let request = RunRequest::builder(RunId::generate())
//!         .container("invoices")
//!         .filename("acme-2026-03.pdf")
//!         .doc_intel_model("prebuilt-layout")
//!         .build()?;
//!
//!     let outcome = orchestrator.run(request).await?;
//!     println!("saved {} ({} tokens)", outcome.artifact, outcome.tokens_consumed);
//!     Ok(())
//! }
//! ```
//!
//! ## Durability
//!
//! Attach a [`FileJournal`] via [`Orchestrator::with_journal`] and a crashed
//! process can re-submit the identical request: completed activities (OCR
//! results, rendered pages, whole agent turns) replay from the journal and
//! only unfinished work executes. The replay contract requires the request
//! to be byte-identical — the run id is part of the request, never generated
//! inside the engine.
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `docuflow` binary (clap + anyhow + indicatif + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! docuflow = { version = "0.3", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod agent;
pub mod audit;
pub mod config;
pub mod defaults;
pub mod error;
pub mod journal;
pub mod orchestrator;
pub mod pipeline;
pub mod run;
pub mod status;
pub mod store;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use agent::{
    AgentEndpoint, AgentReply, AgentRole, AgentRunOutput, AgentService, HttpAgentService, ThreadId,
};
pub use audit::{AuditEntry, AuditRecord, AuditStore, FsAuditStore, MemoryAuditStore};
pub use config::{RetryPolicy, RunRequest, RunRequestBuilder, TurnRetryPolicy};
pub use error::{ActivityError, WorkflowError};
pub use journal::{FileJournal, JournalStore, MemoryJournal};
pub use orchestrator::{DerivedContainers, Orchestrator};
pub use pipeline::ocr::{HttpOcrService, OcrAnalysis, OcrService, PageExtraction};
pub use pipeline::raster::{PageImage, PdfiumRasterizer, Rasterizer};
pub use run::{RunId, RunOutcome, Stage, StageResponse};
pub use status::{
    NoopRunObserver, ObserverHandle, RunObserver, RunStatus, RunStatusSnapshot, StatusCell,
};
pub use store::{DocumentStore, FsDocumentStore, MemoryDocumentStore};
