use std::collections::BTreeSet;
use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::{debug, info, warn};

use weft_context::{CompileConfig, CompileInput, ContextCompiler};
use weft_core::config::WeftConfig;
use weft_core::error::Result;
use weft_core::token::estimate_tokens;
use weft_core::traits::{ModelProvider, SkillProvider};
use weft_core::types::{
    event_types, CompactionEvent, CompletionOptions, LoadedSkill, MemoryDelta, PlaybookDiff, Run,
    SessionEvent, SkillMetadata,
};
use weft_graph::{
    AcceptanceTest, MemoryWritePolicy, NodeOutcome, NodeRunner, NodeSpec, NodeStatus, NodeType,
    SessionVisibility, TaskGraph, WriteMode,
};
use weft_maintenance::{
    Compactor, Curator, MaintenanceTriggers, Reciter, Reflector, STAGED_MEMORY_TAG,
    STAGED_PLAYBOOK_TAG,
};
use weft_store::{
    ArtifactStore, MemoryQuery, MemoryStore, PlaybookStore, PutOptions, ScopedArtifacts,
    SessionStore,
};

const OUTPUT_ARTIFACT: &str = "output.md";
const MAINTENANCE_NAMESPACE: &str = "maintenance";

/// Per-run mutable progress shared by the node tasks of one run.
///
/// Owned by the run, never by a long-lived singleton, so concurrent runs
/// keep independent counters.
pub struct RunProgress {
    pub completed: BTreeSet<String>,
    pub triggers: MaintenanceTriggers,
}

struct Inner {
    provider: Arc<dyn ModelProvider>,
    skills: Arc<dyn SkillProvider>,
    artifacts: Arc<ArtifactStore>,
    session: Arc<SessionStore>,
    memory: Arc<MemoryStore>,
    playbook: Arc<PlaybookStore>,
    compiler: ContextCompiler,
    graph: Arc<TaskGraph>,
    progress: Arc<tokio::sync::Mutex<RunProgress>>,
    config: WeftConfig,
}

/// The production node runner: one compiled-context provider call per node,
/// output persisted pointer-first, maintenance fired at its triggers.
///
/// `Commit` nodes take a different path: no provider call, just the
/// deterministic merge of every staged delta and diff.
#[derive(Clone)]
pub struct ModelNodeRunner {
    inner: Arc<Inner>,
}

impl ModelNodeRunner {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        provider: Arc<dyn ModelProvider>,
        skills: Arc<dyn SkillProvider>,
        artifacts: Arc<ArtifactStore>,
        session: Arc<SessionStore>,
        memory: Arc<MemoryStore>,
        playbook: Arc<PlaybookStore>,
        graph: Arc<TaskGraph>,
        config: WeftConfig,
    ) -> Self {
        let compiler = ContextCompiler::new(CompileConfig {
            context: config.context.clone(),
            skills: config.skills.clone(),
        });
        let progress = Arc::new(tokio::sync::Mutex::new(RunProgress {
            completed: BTreeSet::new(),
            triggers: MaintenanceTriggers::new(config.maintenance.clone()),
        }));
        Self {
            inner: Arc::new(Inner {
                provider,
                skills,
                artifacts,
                session,
                memory,
                playbook,
                compiler,
                graph,
                progress,
                config,
            }),
        }
    }
}

impl NodeRunner for ModelNodeRunner {
    fn run_node(
        &self,
        run: Run,
        node: NodeSpec,
        attempt: u32,
    ) -> BoxFuture<'static, Result<NodeOutcome>> {
        let inner = Arc::clone(&self.inner);
        Box::pin(async move {
            inner
                .session
                .append_event(
                    SessionEvent::new(&run.run_id, event_types::NODE_STARTED)
                        .with_node(node.id.clone())
                        .with_step(format!("attempt-{}", attempt)),
                )?;

            let result = if node.node_type == NodeType::Commit {
                inner.run_commit_node(&run, &node).await
            } else {
                inner.run_model_node(&run, &node, attempt).await
            };

            match &result {
                Ok(outcome) if outcome.status == NodeStatus::Completed => {
                    inner
                        .session
                        .append_event(
                            SessionEvent::new(&run.run_id, event_types::NODE_COMPLETED)
                                .with_node(node.id.clone())
                                .with_step(format!("attempt-{}", attempt))
                                .with_refs(
                                    outcome.output_handles.iter().map(|h| h.uri.clone()).collect(),
                                ),
                        )?;
                    inner.after_node_completed(&run, &node).await;
                }
                Ok(outcome) => {
                    inner.session.append_event(
                        SessionEvent::new(&run.run_id, event_types::NODE_FAILED)
                            .with_node(node.id.clone())
                            .with_step(format!("attempt-{}", attempt))
                            .with_payload(serde_json::json!({
                                "error": outcome.error,
                            })),
                    )?;
                }
                Err(e) => {
                    inner.session.append_event(
                        SessionEvent::new(&run.run_id, event_types::NODE_FAILED)
                            .with_node(node.id.clone())
                            .with_step(format!("attempt-{}", attempt))
                            .with_payload(serde_json::json!({ "error": e.to_string() })),
                    )?;
                }
            }
            result
        })
    }
}

impl Inner {
    fn scoped_artifacts(&self, node: &NodeSpec) -> ScopedArtifacts {
        self.artifacts
            .scoped(
                node.id.clone(),
                node.scope.artifact_namespace.clone(),
                node.scope.artifact_policy.allow_reads_from.clone(),
            )
            .with_create_only(node.scope.artifact_policy.write_mode == WriteMode::CreateOnly)
    }

    /// One provider call over a freshly compiled context.
    async fn run_model_node(
        &self,
        run: &Run,
        node: &NodeSpec,
        attempt: u32,
    ) -> Result<NodeOutcome> {
        let scoped = self.scoped_artifacts(node);

        // Gather state for the compile call
        let memory_hits = self.memory.retrieve(&MemoryQuery::new(
            node.objective.clone(),
            self.config.context.memory_top_k,
        ))?;
        let artifact_handles = scoped.visible_handles()?;
        let skill_index = self.visible_skills(node)?;
        let loaded_skills = self.load_hinted_skills(node, &skill_index);
        let recitation = {
            let progress = self.progress.lock().await;
            Reciter::render_markdown(&Reciter::recite(&self.graph, &progress.completed))
        };
        let compacted_summary = self
            .session
            .latest_compaction(&run.run_id)?
            .map(|compaction| render_compaction(&compaction));

        let input = CompileInput {
            run,
            node,
            memory_hits: &memory_hits,
            artifact_handles: &artifact_handles,
            skill_index: &skill_index,
            loaded_skills: &loaded_skills,
            recitation: Some(&recitation),
            compacted_summary: compacted_summary.as_deref(),
            instruction: None,
        };
        let context = self.compiler.compile(&input)?;
        let estimated_tokens =
            estimate_tokens(&context.system) + estimate_tokens(&context.messages[0].content);

        let options = CompletionOptions {
            max_tokens: node
                .budgets
                .as_ref()
                .and_then(|b| b.max_output_tokens)
                .unwrap_or(4096),
        };
        let output = self.provider.complete(&context, &options).await?;

        // Text-level acceptance before anything is persisted
        if let Some(unmet) = first_unmet_text_criterion(node, &output) {
            return Ok(NodeOutcome::failed(format!(
                "node '{}' acceptance unmet on attempt {}: {}",
                node.id, attempt, unmet
            )));
        }

        let summary = output.lines().find(|l| !l.trim().is_empty()).unwrap_or("").to_string();
        let handle = scoped.put_markdown(
            OUTPUT_ARTIFACT,
            &output,
            PutOptions::summary(summary).with_tag("node-output"),
        )?;
        self.session.append_event(
            SessionEvent::new(&run.run_id, event_types::ARTIFACT_WRITTEN)
                .with_node(node.id.clone())
                .with_refs(vec![handle.uri.clone()]),
        )?;

        // Artifact-level acceptance after the write
        for test in &node.acceptance {
            if let AcceptanceTest::ArtifactExists { name } = test {
                if self
                    .artifacts
                    .metadata_by_uri(&format!(
                        "artifact://{}/{}",
                        node.scope.artifact_namespace, name
                    ))
                    .is_err()
                {
                    return Ok(NodeOutcome::failed(format!(
                        "node '{}' acceptance unmet: missing artifact '{}'",
                        node.id, name
                    )));
                }
            }
        }

        // Compaction is checked against this node's compiled usage
        let budget = self
            .graph
            .config
            .max_context_tokens
            .unwrap_or(self.config.context.max_context_tokens);
        let should_compact = {
            let progress = self.progress.lock().await;
            progress.triggers.should_compact(estimated_tokens, budget)
        };
        if should_compact {
            let compactor = Compactor::new(Arc::clone(&self.provider));
            if let Err(e) = compactor
                .compact(&self.session, &self.artifacts, run, Some(node.id.clone()))
                .await
            {
                // Storage trouble during maintenance is logged, not fatal
                warn!(node_id = %node.id, error = %e, "Compaction failed");
            }
        }

        debug!(node_id = %node.id, attempt, estimated_tokens, "Node output persisted");
        Ok(NodeOutcome::completed(vec![handle]))
    }

    /// The terminal merge step: apply every staged memory delta and playbook
    /// diff found in the artifact tree, then record what was committed.
    async fn run_commit_node(&self, run: &Run, node: &NodeSpec) -> Result<NodeOutcome> {
        let mut deltas_applied = 0usize;
        let mut diffs_applied = 0usize;
        let mut committed_refs = Vec::new();

        for namespace in self.artifacts.list_namespaces()? {
            for handle in self.artifacts.list_namespace(&namespace)? {
                if handle.tags.iter().any(|t| t == STAGED_MEMORY_TAG) {
                    let delta: MemoryDelta =
                        serde_json::from_value(self.artifacts.get_json(&handle)?)?;
                    if delta.run_id == run.run_id {
                        self.memory.apply_memory_delta(&delta)?;
                        deltas_applied += 1;
                        committed_refs.push(handle.uri.clone());
                    }
                } else if handle.tags.iter().any(|t| t == STAGED_PLAYBOOK_TAG) {
                    let diff: PlaybookDiff =
                        serde_json::from_value(self.artifacts.get_json(&handle)?)?;
                    if diff.run_id == run.run_id {
                        self.playbook.apply_diff(&diff)?;
                        diffs_applied += 1;
                        committed_refs.push(handle.uri.clone());
                    }
                }
            }
        }

        self.session.append_event(
            SessionEvent::new(&run.run_id, event_types::DELTA_COMMITTED)
                .with_node(node.id.clone())
                .with_refs(committed_refs.clone())
                .with_payload(serde_json::json!({
                    "memory_deltas": deltas_applied,
                    "playbook_diffs": diffs_applied,
                })),
        )?;

        let scoped = self.scoped_artifacts(node);
        let report = serde_json::json!({
            "memory_deltas_applied": deltas_applied,
            "playbook_diffs_applied": diffs_applied,
            "sources": committed_refs,
        });
        let handle = scoped.put_json(
            "commit_report.json",
            &report,
            PutOptions::summary(format!(
                "merged {} memory deltas and {} playbook diffs",
                deltas_applied, diffs_applied
            )),
        )?;

        info!(
            run_id = %run.run_id,
            deltas_applied,
            diffs_applied,
            "Staged deltas committed"
        );
        Ok(NodeOutcome::completed(vec![handle]))
    }

    /// Post-completion bookkeeping and maintenance triggers.
    async fn after_node_completed(&self, run: &Run, node: &NodeSpec) {
        let triggers = {
            let mut progress = self.progress.lock().await;
            progress.completed.insert(node.id.clone());
            progress.triggers.record_node()
        };

        if triggers.recite {
            if let Err(e) = self.recite(run).await {
                warn!(run_id = %run.run_id, error = %e, "Recitation failed");
            }
        }
        if triggers.reflect {
            if let Err(e) = self.reflect_and_curate(run, node).await {
                warn!(node_id = %node.id, error = %e, "Reflection failed");
            }
        }
    }

    async fn recite(&self, run: &Run) -> Result<()> {
        let markdown = {
            let progress = self.progress.lock().await;
            Reciter::render_markdown(&Reciter::recite(&self.graph, &progress.completed))
        };
        let handle = self.artifacts.put_markdown(
            MAINTENANCE_NAMESPACE,
            "plan.md",
            &markdown,
            PutOptions::summary("current plan recitation"),
        )?;
        self.session.append_event(
            SessionEvent::new(&run.run_id, event_types::RECITATION)
                .with_refs(vec![handle.uri]),
        )?;
        Ok(())
    }

    async fn reflect_and_curate(&self, run: &Run, node: &NodeSpec) -> Result<()> {
        if node.scope.memory_write_policy == MemoryWritePolicy::Deny {
            debug!(node_id = %node.id, "Memory writes denied by scope, skipping curation");
            return Ok(());
        }

        let observations = vec![format!(
            "output stored at artifact://{}/{}",
            node.scope.artifact_namespace, OUTPUT_ARTIFACT
        )];
        let errors = self.recent_errors(run, node)?;

        let reflector = Reflector::new(Arc::clone(&self.provider));
        let reflection = reflector
            .reflect(&node.id, &node.objective, &observations, &errors)
            .await;

        let delta = Curator::memory_delta(&reflection, &run.run_id, &node.id);
        let diff = Curator::playbook_diff(&reflection, &run.run_id, &node.id);
        let scoped = self.scoped_artifacts(node);
        let (delta_handle, diff_handle) = Curator::stage(&scoped, &delta, &diff)?;

        self.session.append_event(
            SessionEvent::new(&run.run_id, event_types::REFLECTION).with_node(node.id.clone()),
        )?;
        self.session.append_event(
            SessionEvent::new(&run.run_id, event_types::DELTA_STAGED)
                .with_node(node.id.clone())
                .with_refs(vec![delta_handle.uri, diff_handle.uri]),
        )?;
        Ok(())
    }

    fn recent_errors(&self, run: &Run, node: &NodeSpec) -> Result<Vec<String>> {
        // OwnNodeOnly visibility keeps sibling failures out of this node's
        // learning signal
        let node_filter = match node.scope.session_visibility {
            SessionVisibility::RunWide => None,
            SessionVisibility::OwnNodeOnly => Some(node.id.clone()),
        };
        let events = self.session.events(
            &run.run_id,
            &weft_store::EventQuery {
                node_id: node_filter,
                event_type: Some(event_types::NODE_FAILED.to_string()),
                ..Default::default()
            },
        )?;
        Ok(events
            .iter()
            .filter_map(|e| e.payload.get("error"))
            .filter_map(|v| v.as_str())
            .map(str::to_string)
            .collect())
    }

    fn visible_skills(&self, node: &NodeSpec) -> Result<Vec<SkillMetadata>> {
        let mut index = self.skills.list_metadata()?;
        if !node.scope.allowed_skills.is_empty() {
            index.retain(|s| node.scope.allowed_skills.contains(&s.id));
        }
        Ok(index)
    }

    fn load_hinted_skills(&self, node: &NodeSpec, visible: &[SkillMetadata]) -> Vec<LoadedSkill> {
        let mut loaded = Vec::new();
        for hint in node
            .skill_hints
            .iter()
            .take(self.config.skills.max_loaded_skills)
        {
            if !visible.iter().any(|s| &s.id == hint) {
                warn!(node_id = %node.id, skill = %hint, "Hinted skill not visible, skipping");
                continue;
            }
            match self.skills.load_markdown(hint) {
                Ok(markdown) => loaded.push(LoadedSkill {
                    id: hint.clone(),
                    markdown,
                }),
                Err(e) => warn!(skill = %hint, error = %e, "Failed to load skill body"),
            }
        }
        loaded
    }
}

fn first_unmet_text_criterion(node: &NodeSpec, output: &str) -> Option<String> {
    for test in &node.acceptance {
        match test {
            AcceptanceTest::NonEmptyOutput => {
                if output.trim().is_empty() {
                    return Some("empty output".into());
                }
            }
            AcceptanceTest::OutputContains { needle } => {
                if !output.contains(needle.as_str()) {
                    return Some(format!("output missing '{}'", needle));
                }
            }
            AcceptanceTest::ArtifactExists { .. } => {}
        }
    }
    None
}

fn render_compaction(compaction: &CompactionEvent) -> String {
    let summary = &compaction.summary;
    let mut out = format!("Goal: {}\n", summary.goal);
    if !summary.decisions.is_empty() {
        out.push_str(&format!("Decisions: {}\n", summary.decisions.join("; ")));
    }
    if !summary.constraints.is_empty() {
        out.push_str(&format!("Constraints: {}\n", summary.constraints.join("; ")));
    }
    if !summary.open_questions.is_empty() {
        out.push_str(&format!(
            "Open questions: {}\n",
            summary.open_questions.join("; ")
        ));
    }
    out.push_str(&format!("Next actions: {}\n", summary.next_actions.join("; ")));
    if !summary.failures_so_far.is_empty() {
        out.push_str(&format!(
            "Failures so far: {}\n",
            summary.failures_so_far.join("; ")
        ));
    }
    out
}
