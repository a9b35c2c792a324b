use std::path::Path;
use std::sync::Arc;

use tracing::{info, warn};

use weft_core::config::WeftConfig;
use weft_core::error::Result;
use weft_core::traits::{ModelProvider, SkillProvider};
use weft_core::types::{event_types, Run, SessionEvent};
use weft_graph::{GraphExecutor, GraphPlanner, RunResult, TaskGraph};
use weft_store::{ArtifactStore, MemoryStore, PlaybookStore, SessionStore};

use crate::node_runner::ModelNodeRunner;

/// One configured orchestrator over a data directory.
///
/// Holds the four stores and the external providers; each `execute_run`
/// call plans, executes, and maintains one run end to end. All per-run
/// mutable state lives in the run's own runner, so concurrent runs on one
/// runtime stay independent.
pub struct WeftRuntime {
    config: WeftConfig,
    provider: Arc<dyn ModelProvider>,
    skills: Arc<dyn SkillProvider>,
    artifacts: Arc<ArtifactStore>,
    session: Arc<SessionStore>,
    memory: Arc<MemoryStore>,
    playbook: Arc<PlaybookStore>,
}

impl WeftRuntime {
    pub fn open(
        config: WeftConfig,
        provider: Arc<dyn ModelProvider>,
        skills: Arc<dyn SkillProvider>,
        data_dir: &Path,
    ) -> Result<Self> {
        Ok(Self {
            config,
            provider,
            skills,
            artifacts: Arc::new(ArtifactStore::open(data_dir)?),
            session: Arc::new(SessionStore::open(data_dir)?),
            memory: Arc::new(MemoryStore::open(data_dir)?),
            playbook: Arc::new(PlaybookStore::open(data_dir)?),
        })
    }

    pub fn artifacts(&self) -> &Arc<ArtifactStore> {
        &self.artifacts
    }

    pub fn session(&self) -> &Arc<SessionStore> {
        &self.session
    }

    pub fn memory(&self) -> &Arc<MemoryStore> {
        &self.memory
    }

    pub fn playbook(&self) -> &Arc<PlaybookStore> {
        &self.playbook
    }

    /// Plan a graph for the run, then drive it to termination.
    pub async fn execute_run(&self, run: &Run, constraints: &[String]) -> Result<RunResult> {
        let planner = GraphPlanner::new(Arc::clone(&self.provider));
        let graph = planner.plan(run, constraints).await;
        self.execute_graph(run, graph).await
    }

    /// Drive an already-built graph to termination.
    pub async fn execute_graph(&self, run: &Run, graph: TaskGraph) -> Result<RunResult> {
        self.session.append_event(
            SessionEvent::new(&run.run_id, event_types::RUN_STARTED).with_payload(
                serde_json::json!({
                    "objective": run.objective,
                    "nodes": graph.node_ids(),
                }),
            ),
        )?;

        let graph = Arc::new(graph);
        let runner = ModelNodeRunner::new(
            Arc::clone(&self.provider),
            Arc::clone(&self.skills),
            Arc::clone(&self.artifacts),
            Arc::clone(&self.session),
            Arc::clone(&self.memory),
            Arc::clone(&self.playbook),
            Arc::clone(&graph),
            self.config.clone(),
        );
        let executor = GraphExecutor::new(Arc::new(runner), self.config.executor.clone());

        let result = executor.execute(run, &graph).await;

        match &result {
            Ok(run_result) => {
                self.session.append_event(
                    SessionEvent::new(&run.run_id, event_types::RUN_COMPLETED).with_payload(
                        serde_json::json!({
                            "status": format!("{:?}", run_result.status),
                            "failed_node_ids": run_result.failed_node_ids,
                        }),
                    ),
                )?;
                info!(
                    run_id = %run.run_id,
                    status = ?run_result.status,
                    "Run finished"
                );
            }
            Err(e) => {
                warn!(run_id = %run.run_id, error = %e, "Run aborted");
                self.session.append_event(
                    SessionEvent::new(&run.run_id, event_types::RUN_COMPLETED).with_payload(
                        serde_json::json!({ "status": "aborted", "error": e.to_string() }),
                    ),
                )?;
            }
        }
        result
    }
}
