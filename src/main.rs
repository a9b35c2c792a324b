use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use weft_core::types::{Run, RunId};
use weft_graph::{fallback_graph, validate, TaskGraph};
use weft_store::{ArtifactStore, SessionStore};

/// Ops tooling for weft run trees: validate graphs, emit fallback plans,
/// and inspect persisted runs.
#[derive(Parser)]
#[command(name = "weft", version, about = "Task-graph orchestrator tooling")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Validate a task graph JSON file.
    Validate {
        /// Path to the graph JSON.
        graph: PathBuf,
    },
    /// Print the deterministic fallback graph for an objective.
    Plan {
        /// The run objective.
        #[arg(long)]
        objective: String,
    },
    /// Summarize a persisted run: events, compactions, artifacts.
    Inspect {
        /// Data directory holding the stores.
        data_dir: PathBuf,
        /// The run id to inspect.
        run_id: String,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Validate { graph } => cmd_validate(&graph),
        Command::Plan { objective } => cmd_plan(&objective),
        Command::Inspect { data_dir, run_id } => cmd_inspect(&data_dir, &run_id),
    }
}

fn cmd_validate(path: &PathBuf) -> anyhow::Result<()> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    let graph: TaskGraph = serde_json::from_str(&raw).context("parsing graph JSON")?;
    let report = validate(&graph);
    if report.valid {
        println!("valid: {} nodes", graph.nodes.len());
        Ok(())
    } else {
        for error in &report.errors {
            eprintln!("error: {}", error);
        }
        bail!("graph is invalid ({} errors)", report.errors.len());
    }
}

fn cmd_plan(objective: &str) -> anyhow::Result<()> {
    let run = Run::new(objective);
    let graph = fallback_graph(&run, &[]);
    println!("{}", serde_json::to_string_pretty(&graph)?);
    Ok(())
}

fn cmd_inspect(data_dir: &PathBuf, run_id: &str) -> anyhow::Result<()> {
    let session = SessionStore::open(data_dir)?;
    let artifacts = ArtifactStore::open(data_dir)?;
    let run_id = RunId::from_str(run_id);

    let metadata = session.run_metadata(&run_id)?;
    println!("run: {}", metadata.run_id);
    println!("events: {}", metadata.event_count);
    println!("compactions: {}", metadata.compaction_count);
    if let (Some(first), Some(last)) = (metadata.first_ts, metadata.last_ts) {
        println!("span: {} .. {}", first.to_rfc3339(), last.to_rfc3339());
    }

    if let Some(compaction) = session.latest_compaction(&run_id)? {
        println!(
            "latest compaction: seq {}..{}, next actions: {}",
            compaction.span.from_seq,
            compaction.span.to_seq,
            compaction.summary.next_actions.join("; ")
        );
    }

    let namespaces = artifacts.list_namespaces()?;
    println!("artifact namespaces: {}", namespaces.len());
    for namespace in namespaces {
        let handles = artifacts.list_namespace(&namespace)?;
        println!("  {} ({} artifacts)", namespace, handles.len());
        for handle in handles {
            println!("    {} — {}", handle.uri, handle.short_summary);
        }
    }
    Ok(())
}
