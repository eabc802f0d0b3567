//! Run request and retry-policy configuration.
//!
//! A run's behaviour is controlled through [`RunRequest`], built via its
//! [`RunRequestBuilder`] or deserialised directly from a JSON trigger
//! payload. Keeping every knob in one struct makes it trivial to capture the
//! request verbatim into the audit record and to diff two runs to understand
//! why their outputs differ.
//!
//! # Design choice: builder over constructor
//! The trigger payload keeps growing (schema, template, retry policies). The
//! builder lets callers set only what they care about and rely on documented
//! defaults for the rest.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::WorkflowError;
use crate::run::RunId;

/// Bounded retry for setup activities (container check, source discovery).
///
/// `max_attempts` counts *total* attempts, not retries: the default of 2
/// means one initial attempt plus one retry after `backoff`. The backoff is
/// fixed, not exponential — setup activities talk to the document store,
/// where a transient failure either clears within seconds or is an outage
/// that no backoff curve will wait out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts before the stage fails the run. Default: 2.
    pub max_attempts: u32,
    /// Fixed delay between attempts. Default: 5 s.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            backoff: Duration::from_secs(5),
        }
    }
}

/// Retry policy for agent turns.
///
/// Agent runs fail transiently far more often than storage calls (model
/// overload, thread contention), and a half-finished run is worth more than
/// a fast failure — so the default keeps trying forever with a fixed delay.
/// Callers that prefer a reported terminal failure over a stalled run set
/// `max_attempts` to `Some(n)`; exhaustion then surfaces as
/// [`WorkflowError::TurnFailed`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnRetryPolicy {
    /// Fixed delay between attempts. Default: 5 s.
    pub delay: Duration,
    /// Total attempts; `None` retries without bound (default).
    pub max_attempts: Option<u32>,
}

impl Default for TurnRetryPolicy {
    fn default() -> Self {
        Self {
            delay: Duration::from_secs(5),
            max_attempts: None,
        }
    }
}

fn default_max_iterations() -> u32 {
    8
}

fn default_max_render_pixels() -> u32 {
    2000
}

/// The input payload for one document-analysis run.
///
/// Deserialisable from the JSON trigger payload; every field beyond the
/// identifying four has a default so minimal payloads stay minimal.
///
/// # Example
/// ```rust
/// use docuflow::{RunId, RunRequest};
///
/// let request = RunRequest::builder(RunId::new("run-1"))
///     .container("invoices")
///     .filename("acme-2026-03.pdf")
///     .doc_intel_model("prebuilt-layout")
///     .max_iterations(4)
///     .audit_logging(true)
///     .build()
///     .unwrap();
/// assert_eq!(request.max_iterations, 4);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRequest {
    /// Caller-supplied run identifier. See [`RunId`].
    pub run_id: RunId,

    /// Source container holding the PDFs to analyse.
    pub container: String,

    /// Filename or filename prefix to match within the source container.
    /// Only blobs with a `.pdf` extension are considered.
    pub filename: String,

    /// Document-intelligence model id passed to the OCR service.
    pub doc_intel_model: String,

    /// Target schema the Analyst/Reviewer work towards. An empty value falls
    /// back to the bundled default ([`crate::defaults::default_target_schema`]).
    #[serde(default)]
    pub target_schema: Value,

    /// Output template for the final Format pass. An empty value falls back
    /// to the bundled default ([`crate::defaults::default_format_template`]).
    #[serde(default)]
    pub format_template: Value,

    /// Maximum Analyze/Review iterations before the loop is forced to exit
    /// and the current extract is taken as final. Default: 8.
    ///
    /// Each iteration is one Analyze turn followed by the Review turn that
    /// evaluates it, so the default allows up to 16 loop turns plus the one
    /// Format turn.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    /// Whether to keep a best-effort audit record of the run. Default: false.
    /// Audit failures never fail the run.
    #[serde(default)]
    pub audit_logging: bool,

    /// Cap on the longest edge of each rasterised page, in pixels.
    /// Default: 2000.
    ///
    /// Page sizes vary wildly; capping the longest edge (rather than fixing
    /// DPI) keeps memory bounded and matches the image-size sweet spot for
    /// vision models.
    #[serde(default = "default_max_render_pixels")]
    pub max_render_pixels: u32,

    /// Retry policy for setup activities. Default: 2 attempts, 5 s backoff.
    #[serde(default)]
    pub setup_retry: RetryPolicy,

    /// Retry policy for agent turns. Default: unbounded, 5 s delay.
    #[serde(default)]
    pub turn_retry: TurnRetryPolicy,
}

impl RunRequest {
    /// Create a new builder for `RunRequest`.
    pub fn builder(run_id: RunId) -> RunRequestBuilder {
        RunRequestBuilder {
            request: RunRequest {
                run_id,
                container: String::new(),
                filename: String::new(),
                doc_intel_model: String::new(),
                target_schema: Value::Null,
                format_template: Value::Null,
                max_iterations: default_max_iterations(),
                audit_logging: false,
                max_render_pixels: default_max_render_pixels(),
                setup_retry: RetryPolicy::default(),
                turn_retry: TurnRetryPolicy::default(),
            },
        }
    }

    /// Validate field constraints. Called by the builder and by the
    /// orchestrator for requests deserialised straight from a payload.
    pub fn validate(&self) -> Result<(), WorkflowError> {
        if self.container.is_empty() {
            return Err(WorkflowError::InvalidRequest(
                "source container must not be empty".into(),
            ));
        }
        if self.filename.is_empty() {
            return Err(WorkflowError::InvalidRequest(
                "filename prefix must not be empty".into(),
            ));
        }
        if self.doc_intel_model.is_empty() {
            return Err(WorkflowError::InvalidRequest(
                "document-intelligence model id must not be empty".into(),
            ));
        }
        if self.max_iterations == 0 {
            return Err(WorkflowError::InvalidRequest(
                "max_iterations must be ≥ 1".into(),
            ));
        }
        if self.setup_retry.max_attempts == 0 {
            return Err(WorkflowError::InvalidRequest(
                "setup_retry.max_attempts must be ≥ 1".into(),
            ));
        }
        if self.turn_retry.max_attempts == Some(0) {
            return Err(WorkflowError::InvalidRequest(
                "turn_retry.max_attempts must be ≥ 1 when bounded".into(),
            ));
        }
        Ok(())
    }
}

/// Builder for [`RunRequest`].
#[derive(Debug)]
pub struct RunRequestBuilder {
    request: RunRequest,
}

impl RunRequestBuilder {
    pub fn container(mut self, container: impl Into<String>) -> Self {
        self.request.container = container.into();
        self
    }

    pub fn filename(mut self, filename: impl Into<String>) -> Self {
        self.request.filename = filename.into();
        self
    }

    pub fn doc_intel_model(mut self, model: impl Into<String>) -> Self {
        self.request.doc_intel_model = model.into();
        self
    }

    pub fn target_schema(mut self, schema: Value) -> Self {
        self.request.target_schema = schema;
        self
    }

    pub fn format_template(mut self, template: Value) -> Self {
        self.request.format_template = template;
        self
    }

    pub fn max_iterations(mut self, n: u32) -> Self {
        self.request.max_iterations = n;
        self
    }

    pub fn audit_logging(mut self, v: bool) -> Self {
        self.request.audit_logging = v;
        self
    }

    pub fn max_render_pixels(mut self, px: u32) -> Self {
        self.request.max_render_pixels = px.max(100);
        self
    }

    pub fn setup_retry(mut self, policy: RetryPolicy) -> Self {
        self.request.setup_retry = policy;
        self
    }

    pub fn turn_retry(mut self, policy: TurnRetryPolicy) -> Self {
        self.request.turn_retry = policy;
        self
    }

    /// Build the request, validating constraints.
    pub fn build(self) -> Result<RunRequest, WorkflowError> {
        self.request.validate()?;
        Ok(self.request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> RunRequestBuilder {
        RunRequest::builder(RunId::new("r1"))
            .container("inbox")
            .filename("doc.pdf")
            .doc_intel_model("prebuilt-layout")
    }

    #[test]
    fn builder_applies_defaults() {
        let req = base().build().unwrap();
        assert_eq!(req.max_iterations, 8);
        assert!(!req.audit_logging);
        assert_eq!(req.setup_retry.max_attempts, 2);
        assert_eq!(req.setup_retry.backoff, Duration::from_secs(5));
        assert_eq!(req.turn_retry.max_attempts, None);
        assert_eq!(req.max_render_pixels, 2000);
    }

    #[test]
    fn builder_rejects_empty_container() {
        let err = RunRequest::builder(RunId::new("r1"))
            .filename("doc.pdf")
            .doc_intel_model("m")
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("container"));
    }

    #[test]
    fn builder_rejects_zero_iterations() {
        let err = base().max_iterations(0).build().unwrap_err();
        assert!(err.to_string().contains("max_iterations"));
    }

    #[test]
    fn builder_rejects_zero_bounded_turn_attempts() {
        let err = base()
            .turn_retry(TurnRetryPolicy {
                delay: Duration::from_millis(1),
                max_attempts: Some(0),
            })
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("turn_retry"));
    }

    #[test]
    fn minimal_payload_deserialises_with_defaults() {
        let payload = r#"{
            "run_id": "run-7",
            "container": "invoices",
            "filename": "acme.pdf",
            "doc_intel_model": "prebuilt-layout"
        }"#;
        let req: RunRequest = serde_json::from_str(payload).unwrap();
        req.validate().unwrap();
        assert_eq!(req.max_iterations, 8);
        assert!(req.target_schema.is_null());
        assert_eq!(req.turn_retry, TurnRetryPolicy::default());
    }
}
