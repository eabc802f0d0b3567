//! Extraction activities: the fan-out stage's two task kinds.
//!
//! Each submodule implements exactly one activity. Keeping them separate
//! makes each independently testable and lets the orchestrator journal them
//! under independent keys.
//!
//! ## Data flow
//!
//! ```text
//! source PDF ──▶ ocr    ──▶ PageExtraction (text + key-values, cached)
//!            └─▶ raster ──▶ Vec<PageImage> (per-page PNG, always recomputed)
//! ```
//!
//! 1. [`ocr`]    — document-intelligence extraction, cached by the derived
//!    result artifact so re-runs and replays never pay the OCR cost twice
//! 2. [`raster`] — per-page rasterisation via pdfium; runs in
//!    `spawn_blocking` because pdfium is CPU-bound and not async-safe

pub mod ocr;
pub mod raster;
