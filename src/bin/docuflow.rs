//! CLI binary for docuflow.
//!
//! A thin shim over the library crate: maps CLI flags to a `RunRequest`,
//! wires the filesystem store, file journal, and HTTP services, and renders
//! run progress.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use docuflow::{
    AgentEndpoint, AgentRole, FileJournal, FsAuditStore, FsDocumentStore, HttpAgentService,
    HttpOcrService, Orchestrator, RunId, RunObserver, RunOutcome, RunRequest, Stage, WorkflowError,
};
use indicatif::{ProgressBar, ProgressStyle};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

// ── CLI definition ───────────────────────────────────────────────────────────

/// Analyse PDF documents with cooperating AI agents and persist a structured
/// extract.
#[derive(Parser, Debug)]
#[command(name = "docuflow", version, about, long_about = None)]
struct Cli {
    /// Source container (directory under --data-root) holding the PDFs.
    #[arg(long)]
    container: String,

    /// Filename or filename prefix to analyse within the container.
    #[arg(long)]
    filename: String,

    /// Document-intelligence model id.
    #[arg(long, default_value = "prebuilt-layout")]
    model: String,

    /// Root directory backing the document store.
    #[arg(long, default_value = "./data")]
    data_root: PathBuf,

    /// Directory for run journals and audit records.
    /// Defaults to <data-root>/.docuflow
    #[arg(long)]
    state_dir: Option<PathBuf>,

    /// Path to a JSON file with the target schema (bundled default if omitted).
    #[arg(long)]
    schema: Option<PathBuf>,

    /// Path to a JSON file with the output format template.
    #[arg(long)]
    template: Option<PathBuf>,

    /// Maximum Analyze/Review iterations before the loop is forced to exit.
    #[arg(long, default_value_t = 8)]
    max_iterations: u32,

    /// Keep a best-effort audit record of the run.
    #[arg(long)]
    audit: bool,

    /// Give up on an agent turn after this many attempts instead of retrying
    /// forever.
    #[arg(long)]
    max_turn_attempts: Option<u32>,

    /// Resume the run with this id against its existing journal instead of
    /// starting a fresh one.
    #[arg(long)]
    resume: Option<String>,

    /// Agent-service base URL.
    #[arg(long, env = "AGENTS_ENDPOINT")]
    agents_endpoint: String,

    /// Agent-service API key.
    #[arg(long, env = "AGENTS_API_KEY", hide_env_values = true)]
    agents_key: String,

    /// Agent id for the analyst role.
    #[arg(long, env = "ANALYST_AGENT_ID")]
    analyst_agent: String,

    /// Agent id for the reviewer role.
    #[arg(long, env = "REVIEWER_AGENT_ID")]
    reviewer_agent: String,

    /// Agent id for the formatter role.
    #[arg(long, env = "FORMATTER_AGENT_ID")]
    formatter_agent: String,

    /// Document-intelligence base URL.
    #[arg(long, env = "DOC_INTEL_ENDPOINT")]
    ocr_endpoint: String,

    /// Document-intelligence API key.
    #[arg(long, env = "DOC_INTEL_KEY", hide_env_values = true)]
    ocr_key: String,

    /// Print the outcome as JSON instead of the human summary.
    #[arg(long)]
    json: bool,

    /// Suppress the progress display.
    #[arg(long, short)]
    quiet: bool,
}

// ── Progress observer ────────────────────────────────────────────────────────

/// Terminal observer: a spinner tracking the current stage plus one log line
/// per completed agent turn.
struct CliRunObserver {
    bar: ProgressBar,
}

impl CliRunObserver {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);
        bar.set_style(style);
        bar.set_prefix("Running");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self { bar })
    }

    fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl RunObserver for CliRunObserver {
    fn on_stage(&self, stage: Stage) {
        self.bar.set_message(stage.describe().to_string());
    }

    fn on_note(&self, note: &str) {
        self.bar.println(format!("  {} {}", dim("·"), dim(note)));
    }

    fn on_turn(&self, role: AgentRole, tokens_consumed: u64, _response: &serde_json::Value) {
        self.bar.println(format!(
            "  {} {:<9}  {}",
            green("✓"),
            role.to_string(),
            dim(&format!("{tokens_consumed} tokens total")),
        ));
    }

    fn on_failed(&self, error: &WorkflowError) {
        self.bar.println(format!("  {} {}", red("✗"), error));
    }
}

// ── Entry point ──────────────────────────────────────────────────────────────

fn load_json(path: &PathBuf) -> Result<serde_json::Value> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))
}

fn print_summary(outcome: &RunOutcome, artifact_container: &str) {
    println!();
    println!("{}", bold("Run complete"));
    println!("  run id      {}", cyan(outcome.run_id.as_str()));
    println!(
        "  artifact    {}",
        green(&format!("{artifact_container}/{}", outcome.artifact))
    );
    println!("  iterations  {}", outcome.iterations);
    println!("  turns       {}", outcome.responses.len());
    println!("  tokens      {}", outcome.tokens_consumed);
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let run_id = match &cli.resume {
        Some(id) => RunId::new(id.clone()),
        None => RunId::generate(),
    };

    let mut builder = RunRequest::builder(run_id.clone())
        .container(&cli.container)
        .filename(&cli.filename)
        .doc_intel_model(&cli.model)
        .max_iterations(cli.max_iterations)
        .audit_logging(cli.audit);
    if let Some(path) = &cli.schema {
        builder = builder.target_schema(load_json(path)?);
    }
    if let Some(path) = &cli.template {
        builder = builder.format_template(load_json(path)?);
    }
    if let Some(max) = cli.max_turn_attempts {
        builder = builder.turn_retry(docuflow::TurnRetryPolicy {
            delay: Duration::from_secs(5),
            max_attempts: Some(max),
        });
    }
    let request = builder.build()?;

    let state_dir = cli
        .state_dir
        .clone()
        .unwrap_or_else(|| cli.data_root.join(".docuflow"));
    let journal_path = state_dir
        .join("runs")
        .join(format!("{}.journal", run_id.as_str()));

    let store = Arc::new(FsDocumentStore::new(&cli.data_root));
    let ocr = Arc::new(HttpOcrService::new(&cli.ocr_endpoint, &cli.ocr_key)?);
    let agents = Arc::new(HttpAgentService::new(AgentEndpoint {
        base_url: cli.agents_endpoint.clone(),
        api_key: cli.agents_key.clone(),
        agent_ids: HashMap::from([
            (AgentRole::Analyst, cli.analyst_agent.clone()),
            (AgentRole::Reviewer, cli.reviewer_agent.clone()),
            (AgentRole::Formatter, cli.formatter_agent.clone()),
        ]),
    })?);
    let journal = Arc::new(FileJournal::open(&journal_path)?);
    let audit = Arc::new(FsAuditStore::new(state_dir.join("audit")));

    let mut orchestrator = Orchestrator::new(store, ocr, agents)
        .with_journal(journal)
        .with_audit(audit);

    let observer = if cli.quiet {
        None
    } else {
        let observer = CliRunObserver::new();
        orchestrator = orchestrator.with_observer(observer.clone());
        Some(observer)
    };

    if cli.resume.is_some() {
        eprintln!(
            "{} resuming run {} from {}",
            cyan("◆"),
            run_id,
            journal_path.display()
        );
    }

    let result = orchestrator.run(request).await;
    if let Some(observer) = &observer {
        observer.finish();
    }

    match result {
        Ok(outcome) => {
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&outcome)?);
            } else {
                let containers = docuflow::DerivedContainers::for_source(&cli.container);
                print_summary(&outcome, &containers.processed_results);
            }
            Ok(())
        }
        Err(e) => {
            eprintln!();
            eprintln!("{} {}", red("error:"), e);
            eprintln!(
                "{}",
                dim(&format!(
                    "re-run with --resume {run_id} to continue from the journal"
                ))
            );
            std::process::exit(1);
        }
    }
}
