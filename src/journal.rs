//! Write-ahead journal of completed activity results.
//!
//! The orchestrator's durability contract is "resume exactly where a crash
//! occurred without repeating already-completed side effects". Rather than
//! leaning on a host-managed durable-execution runtime, every side-effecting
//! activity is journaled under a stable key (`ocr:<file>`, `turn:3:analyst`,
//! `persist`, …) the moment it completes. On restart the orchestrator runs
//! its control logic from the top; any activity whose key is already present
//! returns the recorded result instantly and invokes nothing.
//!
//! This works because the control logic is deterministic: given the same
//! request and the same recorded results it re-derives the same key sequence,
//! so replay and live execution interleave seamlessly at the first
//! un-journaled activity.
//!
//! Two implementations: [`MemoryJournal`] (tests, fire-and-forget runs) and
//! [`FileJournal`] (JSONL, append-on-complete, reloaded on open).

use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::ActivityError;

/// One journaled activity completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct JournalEntry {
    key: String,
    value: Value,
}

/// Storage for completed-activity results, keyed by stable activity key.
///
/// Implementations must be `Send + Sync`; the Extraction stage records from
/// concurrent fan-out tasks. Recording the same key twice is a caller bug —
/// implementations keep the first value (first-write-wins matches replay
/// semantics: a recorded result is immutable history).
pub trait JournalStore: Send + Sync {
    /// Look up the recorded result for `key`, if the activity completed in a
    /// previous execution.
    fn lookup(&self, key: &str) -> Result<Option<Value>, ActivityError>;

    /// Record a completed activity's result.
    fn record(&self, key: &str, value: &Value) -> Result<(), ActivityError>;
}

// ── In-memory implementation ─────────────────────────────────────────────

/// Volatile journal: replay-safe within a process lifetime only.
#[derive(Default)]
pub struct MemoryJournal {
    entries: Mutex<HashMap<String, Value>>,
}

impl MemoryJournal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of recorded activities. Useful in tests asserting how much of
    /// a run executed live versus from replay.
    pub fn len(&self) -> usize {
        self.entries.lock().expect("lock").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Recorded keys, sorted. Tests use this to assert the invocation set.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.entries.lock().expect("lock").keys().cloned().collect();
        keys.sort_unstable();
        keys
    }
}

impl JournalStore for MemoryJournal {
    fn lookup(&self, key: &str) -> Result<Option<Value>, ActivityError> {
        Ok(self.entries.lock().expect("lock").get(key).cloned())
    }

    fn record(&self, key: &str, value: &Value) -> Result<(), ActivityError> {
        self.entries
            .lock()
            .expect("lock")
            .entry(key.to_string())
            .or_insert_with(|| value.clone());
        Ok(())
    }
}

// ── File-backed implementation ───────────────────────────────────────────

/// Durable journal: one JSON object per line, appended as activities
/// complete, loaded back into memory on [`FileJournal::open`].
///
/// Appends go through `std::fs` under a mutex rather than async I/O — each
/// append is one short line, and holding the journal lock across an await
/// point would serialise the fan-out stage for no benefit.
pub struct FileJournal {
    path: PathBuf,
    entries: Mutex<HashMap<String, Value>>,
}

impl FileJournal {
    /// Open (or create) the journal at `path`, loading any entries recorded
    /// by a previous execution of the same run.
    ///
    /// A torn final line (crash mid-append) is tolerated and dropped: the
    /// activity it belonged to simply re-executes, which is exactly the
    /// at-least-once contract activities are written against.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, ActivityError> {
        let path = path.into();
        let mut entries = HashMap::new();

        match std::fs::File::open(&path) {
            Ok(file) => {
                for line in BufReader::new(file).lines() {
                    let line = line.map_err(|e| ActivityError::Journal {
                        detail: format!("failed reading {}: {e}", path.display()),
                    })?;
                    if line.trim().is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<JournalEntry>(&line) {
                        Ok(entry) => {
                            entries.entry(entry.key).or_insert(entry.value);
                        }
                        Err(e) => {
                            debug!(path = %path.display(), %e, "dropping torn journal line");
                        }
                    }
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(ActivityError::Journal {
                    detail: format!("failed opening {}: {e}", path.display()),
                });
            }
        }

        debug!(path = %path.display(), entries = entries.len(), "journal opened");
        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    /// Number of recorded activities.
    pub fn len(&self) -> usize {
        self.entries.lock().expect("lock").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl JournalStore for FileJournal {
    fn lookup(&self, key: &str) -> Result<Option<Value>, ActivityError> {
        Ok(self.entries.lock().expect("lock").get(key).cloned())
    }

    fn record(&self, key: &str, value: &Value) -> Result<(), ActivityError> {
        let mut entries = self.entries.lock().expect("lock");
        if entries.contains_key(key) {
            return Ok(());
        }

        let line = serde_json::to_string(&JournalEntry {
            key: key.to_string(),
            value: value.clone(),
        })?;

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ActivityError::Journal {
                detail: format!("failed creating {}: {e}", parent.display()),
            })?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| ActivityError::Journal {
                detail: format!("failed opening {}: {e}", self.path.display()),
            })?;
        writeln!(file, "{line}").map_err(|e| ActivityError::Journal {
            detail: format!("failed appending to {}: {e}", self.path.display()),
        })?;

        entries.insert(key.to_string(), value.clone());
        Ok(())
    }
}
