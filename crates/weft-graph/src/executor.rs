use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{error, info, warn};

use weft_core::config::{ExecutorConfig, RetryConfig};
use weft_core::error::{Result, WeftError};
use weft_core::types::{ArtifactHandle, Run};

use crate::model::{NodeSpec, TaskGraph};
use crate::validate::validate;

/// Terminal status of one node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    Completed,
    Failed,
}

/// What one attempt of a node produced.
#[derive(Debug, Clone)]
pub struct NodeOutcome {
    pub status: NodeStatus,
    pub output_handles: Vec<ArtifactHandle>,
    pub error: Option<String>,
}

impl NodeOutcome {
    pub fn completed(output_handles: Vec<ArtifactHandle>) -> Self {
        Self {
            status: NodeStatus::Completed,
            output_handles,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: NodeStatus::Failed,
            output_handles: Vec::new(),
            error: Some(error.into()),
        }
    }
}

/// The retained record of one node: its terminal attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeExecutionResult {
    pub node_id: String,
    pub status: NodeStatus,
    pub output_handles: Vec<ArtifactHandle>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: u64,
}

/// Final status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Complete,
    Failed,
}

/// Aggregated result of driving a graph to termination.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResult {
    pub run_id: String,
    pub status: RunStatus,
    pub node_results: Vec<NodeExecutionResult>,
    /// (node id, handle) pairs from completed nodes, flattened.
    pub outputs: Vec<(String, ArtifactHandle)>,
    pub failed_node_ids: Vec<String>,
}

/// Executes the work of a single node attempt.
///
/// In production this is one compiled-context provider call; tests script
/// it. Implementations must be idempotent per (node, attempt) so a durable
/// host can re-run an interrupted attempt.
pub trait NodeRunner: Send + Sync + 'static {
    fn run_node(
        &self,
        run: Run,
        node: NodeSpec,
        attempt: u32,
    ) -> BoxFuture<'static, Result<NodeOutcome>>;
}

/// Delay before the next attempt: `interval × rate^(attempt-1)` seconds,
/// where `attempt` is the one that just failed (1-based).
pub fn backoff_delay(retry: &RetryConfig, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1) as i32;
    Duration::from_secs_f64(retry.interval_seconds * retry.backoff_rate.powi(exponent))
}

/// Drives a validated graph to completion with bounded parallelism.
///
/// Batching is deterministic: the ready set is sorted lexicographically by
/// node id and chunked by the parallelism cap, so a fixed graph with fixed
/// node outcomes always partitions identically. Within a batch, completion
/// order is unspecified and nothing may rely on it.
pub struct GraphExecutor {
    runner: Arc<dyn NodeRunner>,
    config: ExecutorConfig,
}

impl GraphExecutor {
    pub fn new(runner: Arc<dyn NodeRunner>, config: ExecutorConfig) -> Self {
        Self { runner, config }
    }

    /// Execute every node of the graph, or stop admitting new batches after
    /// the first terminal failure. In-flight siblings always finish; there
    /// is no mid-attempt cancellation.
    pub async fn execute(&self, run: &Run, graph: &TaskGraph) -> Result<RunResult> {
        let report = validate(graph);
        if !report.valid {
            return Err(WeftError::GraphValidation(report.errors.join("; ")));
        }

        let cap = graph
            .config
            .max_parallelism
            .unwrap_or(self.config.max_parallelism)
            .max(1);

        let mut completed: BTreeSet<String> = BTreeSet::new();
        let mut failed: BTreeSet<String> = BTreeSet::new();
        let mut node_results: Vec<NodeExecutionResult> = Vec::new();

        info!(run_id = %run.run_id, nodes = graph.nodes.len(), cap, "Graph execution started");

        'admission: while completed.len() + failed.len() < graph.nodes.len() {
            let mut ready: Vec<&NodeSpec> = graph
                .nodes
                .iter()
                .filter(|n| !completed.contains(&n.id) && !failed.contains(&n.id))
                .filter(|n| n.deps.iter().all(|d| completed.contains(d)))
                .collect();

            if ready.is_empty() {
                if failed.is_empty() {
                    // A validated acyclic graph cannot starve its ready set
                    let remaining = graph.nodes.len() - completed.len();
                    error!(run_id = %run.run_id, remaining, "Deadlock invariant violated");
                    return Err(WeftError::DeadlockInvariant { remaining });
                }
                // Failures upstream left dependents unschedulable; stop
                break;
            }

            ready.sort_by(|a, b| a.id.cmp(&b.id));

            for batch in ready.chunks(cap) {
                let batch_ids: Vec<&str> = batch.iter().map(|n| n.id.as_str()).collect();
                info!(run_id = %run.run_id, batch = ?batch_ids, "Dispatching batch");

                let mut handles = Vec::with_capacity(batch.len());
                for node in batch {
                    let runner = Arc::clone(&self.runner);
                    let run = run.clone();
                    let node = (*node).clone();
                    let retry = node
                        .retry_policy
                        .clone()
                        .unwrap_or_else(|| self.config.retry.clone());
                    handles.push(tokio::spawn(async move {
                        run_with_retry(runner, run, node, retry).await
                    }));
                }

                // Settle-all join: every sibling reaches a terminal result
                // before the batch boundary is crossed
                let settled = futures::future::join_all(handles).await;
                let mut batch_failed = false;
                for (join_result, node) in settled.into_iter().zip(batch.iter()) {
                    let result = match join_result {
                        Ok(result) => result,
                        Err(join_error) => {
                            error!(node_id = %node.id, error = %join_error, "Node task panicked");
                            NodeExecutionResult {
                                node_id: node.id.clone(),
                                status: NodeStatus::Failed,
                                output_handles: Vec::new(),
                                error: Some(format!("node task panicked: {}", join_error)),
                                duration_ms: 0,
                            }
                        }
                    };
                    match result.status {
                        NodeStatus::Completed => {
                            completed.insert(result.node_id.clone());
                        }
                        NodeStatus::Failed => {
                            failed.insert(result.node_id.clone());
                            batch_failed = true;
                        }
                    }
                    node_results.push(result);
                }

                if batch_failed {
                    warn!(run_id = %run.run_id, "Batch reported failures, halting admission");
                    break 'admission;
                }
            }
        }

        let status = if failed.is_empty() {
            RunStatus::Complete
        } else {
            RunStatus::Failed
        };
        let outputs = node_results
            .iter()
            .filter(|r| r.status == NodeStatus::Completed)
            .flat_map(|r| {
                r.output_handles
                    .iter()
                    .map(|h| (r.node_id.clone(), h.clone()))
            })
            .collect();
        let failed_node_ids: Vec<String> = failed.into_iter().collect();

        info!(
            run_id = %run.run_id,
            status = ?status,
            completed = completed.len(),
            failed = failed_node_ids.len(),
            "Graph execution finished"
        );

        Ok(RunResult {
            run_id: run.run_id.0.clone(),
            status,
            node_results,
            outputs,
            failed_node_ids,
        })
    }
}

/// Run one node to a terminal result. Never returns early out of the batch
/// join: runner errors become failed attempts, exhausted retries become a
/// failed result carrying the last error.
async fn run_with_retry(
    runner: Arc<dyn NodeRunner>,
    run: Run,
    node: NodeSpec,
    retry: RetryConfig,
) -> NodeExecutionResult {
    let max_attempts = if retry.retries_allowed {
        retry.max_attempts.max(1)
    } else {
        1
    };

    let started = Instant::now();
    let mut last_error = String::from("no attempts made");

    for attempt in 1..=max_attempts {
        match runner.run_node(run.clone(), node.clone(), attempt).await {
            Ok(outcome) if outcome.status == NodeStatus::Completed => {
                return NodeExecutionResult {
                    node_id: node.id.clone(),
                    status: NodeStatus::Completed,
                    output_handles: outcome.output_handles,
                    error: None,
                    duration_ms: started.elapsed().as_millis() as u64,
                };
            }
            Ok(outcome) => {
                last_error = outcome
                    .error
                    .unwrap_or_else(|| format!("node '{}' did not complete", node.id));
            }
            Err(e) => {
                last_error = e.to_string();
            }
        }

        if attempt < max_attempts {
            let delay = backoff_delay(&retry, attempt);
            warn!(
                node_id = %node.id,
                attempt,
                max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %last_error,
                "Node attempt failed, retrying"
            );
            tokio::time::sleep(delay).await;
        }
    }

    error!(node_id = %node.id, error = %last_error, "Node failed terminally");
    NodeExecutionResult {
        node_id: node.id.clone(),
        status: NodeStatus::Failed,
        output_handles: Vec::new(),
        error: Some(format!("node '{}' failed: {}", node.id, last_error)),
        duration_ms: started.elapsed().as_millis() as u64,
    }
}
