//! Error types for the docuflow library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`WorkflowError`] — **Fatal**: the run cannot proceed and transitions to
//!   its `Failed` terminal state (container check exhausted its retries, a
//!   fan-out task failed, a bounded turn policy ran out of attempts).
//!   Returned as `Err(WorkflowError)` from [`crate::orchestrator::Orchestrator::run`].
//!
//! * [`ActivityError`] — a **leaf** failure inside one activity (a store
//!   read, an HTTP call, a pdfium render). Activities are individually
//!   retryable; an `ActivityError` only becomes fatal once the owning stage's
//!   retry budget is spent, at which point it is carried as the `source` of
//!   the corresponding [`WorkflowError`] variant.
//!
//! The separation keeps retry policy out of the leaves: a store adapter does
//! not know whether its caller will retry, so it reports what happened and
//! nothing more.

use thiserror::Error;

use crate::agent::AgentRole;

/// All fatal errors returned by the docuflow orchestrator.
///
/// Each variant names the stage that failed; the `source` carries the
/// underlying [`ActivityError`]. Derived artifacts written before the failure
/// are left in place — stages are idempotent, so re-submitting the same run
/// is the recovery mechanism.
#[derive(Debug, Error)]
pub enum WorkflowError {
    // ── Request errors ────────────────────────────────────────────────────
    /// The run request failed validation before any stage executed.
    #[error("Invalid run request: {0}")]
    InvalidRequest(String),

    // ── Setup-stage errors ────────────────────────────────────────────────
    /// Derived-container creation failed after all retry attempts.
    #[error("Container check failed for source container '{container}'")]
    ContainerCheckFailed {
        container: String,
        #[source]
        source: ActivityError,
    },

    /// Listing the source container failed after all retry attempts.
    #[error("Source discovery failed in '{container}' (prefix '{prefix}')")]
    SourceDiscoveryFailed {
        container: String,
        prefix: String,
        #[source]
        source: ActivityError,
    },

    /// Discovery or extraction produced no usable documents.
    #[error(
        "No usable source documents in '{container}' with prefix '{prefix}'\n\
         Check that the container holds at least one .pdf with OCR-readable content."
    )]
    NoSourceDocuments { container: String, prefix: String },

    // ── Extraction-stage errors ───────────────────────────────────────────
    /// One OCR task failed; the whole fan-out group fails with it.
    #[error("Document-intelligence extraction failed for '{file}'")]
    ExtractionFailed {
        file: String,
        #[source]
        source: ActivityError,
    },

    /// One rasterisation task failed; the whole fan-out group fails with it.
    #[error("Page rasterisation failed for '{file}'")]
    RasterisationFailed {
        file: String,
        #[source]
        source: ActivityError,
    },

    // ── Agent-stage errors ────────────────────────────────────────────────
    /// Creating a role's conversation thread failed.
    #[error("Could not create conversation thread for the {role} agent")]
    ThreadCreationFailed {
        role: AgentRole,
        #[source]
        source: ActivityError,
    },

    /// An agent turn failed terminally (only possible under a bounded
    /// [`crate::config::TurnRetryPolicy`]; the default unbounded policy
    /// retries forever instead).
    #[error("The {role} agent turn failed after exhausting its retry policy")]
    TurnFailed {
        role: AgentRole,
        #[source]
        source: ActivityError,
    },

    // ── Persist-stage errors ──────────────────────────────────────────────
    /// Writing the final extract to the processed-results container failed.
    #[error("Failed to persist final extract as '{name}'")]
    PersistFailed {
        name: String,
        #[source]
        source: ActivityError,
    },

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A failure inside a single activity.
///
/// Carried as the `source` of a [`WorkflowError`] once a stage gives up.
#[derive(Debug, Error)]
pub enum ActivityError {
    /// Filesystem-level store failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP transport failure talking to a remote service.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// A named blob was not found in its container.
    #[error("Blob '{name}' not found in container '{container}'")]
    BlobNotFound { container: String, name: String },

    /// The document-intelligence service rejected or failed an analyze call.
    #[error("Document-intelligence service error: {detail}")]
    OcrService { detail: String },

    /// The agent service rejected a thread, message, or run request.
    #[error("Agent service error: {detail}")]
    AgentService { detail: String },

    /// pdfium could not load or render the document.
    #[error("PDF error: {detail}")]
    Pdf { detail: String },

    /// PNG encoding of a rendered page failed.
    #[error("Image encoding failed for page {page}: {detail}")]
    ImageEncode { page: usize, detail: String },

    /// JSON (de)serialisation failure.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The replay journal could not be read or appended.
    #[error("Journal error: {detail}")]
    Journal { detail: String },

    /// A blocking task panicked or was cancelled.
    #[error("Background task failed: {0}")]
    Task(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_source_documents_display() {
        let e = WorkflowError::NoSourceDocuments {
            container: "inbox".into(),
            prefix: "invoice".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("inbox"), "got: {msg}");
        assert!(msg.contains("invoice"), "got: {msg}");
    }

    #[test]
    fn turn_failed_display_names_role() {
        let e = WorkflowError::TurnFailed {
            role: AgentRole::Reviewer,
            source: ActivityError::AgentService {
                detail: "503".into(),
            },
        };
        assert!(e.to_string().contains("reviewer"));
    }

    #[test]
    fn extraction_failed_carries_source() {
        use std::error::Error as _;
        let e = WorkflowError::ExtractionFailed {
            file: "a.pdf".into(),
            source: ActivityError::OcrService {
                detail: "timeout".into(),
            },
        };
        assert!(e.to_string().contains("a.pdf"));
        assert!(e.source().expect("source").to_string().contains("timeout"));
    }

    #[test]
    fn blob_not_found_display() {
        let e = ActivityError::BlobNotFound {
            container: "inbox-images".into(),
            name: "doc_page_1.png".into(),
        };
        assert!(e.to_string().contains("inbox-images"));
        assert!(e.to_string().contains("doc_page_1.png"));
    }
}
