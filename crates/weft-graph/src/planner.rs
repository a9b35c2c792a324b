use std::sync::Arc;

use tracing::{info, warn};

use weft_core::error::{Result, WeftError};
use weft_core::traits::ModelProvider;
use weft_core::types::{CompletionOptions, MessageRole, ModelContext, ModelMessage, Run};

use crate::model::{AcceptanceTest, NodeSpec, NodeType, Scope, TaskGraph};
use crate::validate::validate;

const PLANNER_SYSTEM: &str = "You are a planning module inside a task \
orchestrator. You decompose an objective into a directed acyclic graph of \
work nodes and respond with JSON only.";

/// One-shot planner: asks the provider for an initial task graph and falls
/// back to a deterministic built-in graph on any parse or validation
/// failure. Planning never fails a run.
pub struct GraphPlanner {
    provider: Arc<dyn ModelProvider>,
}

impl GraphPlanner {
    pub fn new(provider: Arc<dyn ModelProvider>) -> Self {
        Self { provider }
    }

    /// Produce a validated graph for the run.
    pub async fn plan(&self, run: &Run, constraints: &[String]) -> TaskGraph {
        match self.plan_with_provider(run, constraints).await {
            Ok(graph) => {
                info!(run_id = %run.run_id, nodes = graph.nodes.len(), "Planner produced a graph");
                graph
            }
            Err(e) => {
                warn!(run_id = %run.run_id, error = %e, "Planner fell back to the built-in graph");
                fallback_graph(run, constraints)
            }
        }
    }

    async fn plan_with_provider(&self, run: &Run, constraints: &[String]) -> Result<TaskGraph> {
        let context = ModelContext {
            system: PLANNER_SYSTEM.to_string(),
            messages: vec![ModelMessage {
                role: MessageRole::User,
                content: planning_prompt(run, constraints),
            }],
        };
        let response = self
            .provider
            .complete(&context, &CompletionOptions::default())
            .await?;

        let json = extract_json(&response);
        let mut graph: TaskGraph = serde_json::from_str(json)
            .map_err(|e| WeftError::ProviderParse(format!("planner output: {}", e)))?;

        // The provider plans structure; identity comes from the run
        graph.run_id = run.run_id.clone();
        graph.objective = run.objective.clone();
        graph.constraints = constraints.to_vec();

        let report = validate(&graph);
        if !report.valid {
            return Err(WeftError::GraphValidation(report.errors.join("; ")));
        }
        Ok(graph)
    }
}

fn planning_prompt(run: &Run, constraints: &[String]) -> String {
    let mut prompt = String::new();
    prompt.push_str("Decompose the objective below into a task graph.\n\n");
    prompt.push_str(&format!("Objective: {}\n", run.objective));
    if let Some(input) = &run.input {
        prompt.push_str(&format!("Input: {}\n", input));
    }
    if !constraints.is_empty() {
        prompt.push_str("Constraints:\n");
        for constraint in constraints {
            prompt.push_str(&format!("- {}\n", constraint));
        }
    }
    prompt.push_str(
        r#"
Respond with ONLY a JSON object of this shape:
{
  "objective": "...",
  "nodes": [
    {
      "id": "lowercase-id",
      "type": "plan|research|execute|synthesize|verify|curate|commit",
      "objective": "...",
      "deps": ["ids of prerequisite nodes"],
      "scope": { "artifact_namespace": "same as id" },
      "acceptance": [{ "kind": "non_empty_output" }]
    }
  ]
}

Rules:
- node ids are lowercase letters, digits, '_' or '-'
- the graph must be acyclic and every dep must name a node
- every node needs at least one acceptance entry
- end with exactly one node of type "commit" depending on the final work
"#,
    );
    prompt
}

/// Deterministic three-node graph used whenever the provider's plan is
/// unusable: research, then execute, then commit.
pub fn fallback_graph(run: &Run, constraints: &[String]) -> TaskGraph {
    let research = NodeSpec::new(
        "research",
        NodeType::Research,
        format!("Gather the facts and sources needed for: {}", run.objective),
    );
    let execute = NodeSpec::new(
        "execute",
        NodeType::Execute,
        format!("Produce the deliverable for: {}", run.objective),
    )
    .with_deps(vec!["research".into()])
    .with_scope(Scope::new("execute").with_reads_from(vec!["research".into()]))
    .with_acceptance(vec![AcceptanceTest::NonEmptyOutput]);
    let commit = NodeSpec::new(
        "commit",
        NodeType::Commit,
        "Merge staged memory and playbook deltas".to_string(),
    )
    .with_deps(vec!["execute".into()])
    .with_scope(Scope::new("commit").with_reads_from(vec!["research".into(), "execute".into()]));

    let graph = TaskGraph {
        version: 1,
        run_id: run.run_id.clone(),
        objective: run.objective.clone(),
        constraints: constraints.to_vec(),
        config: Default::default(),
        nodes: vec![research, execute, commit],
    };
    debug_assert!(validate(&graph).valid);
    graph
}

/// Pull a JSON object out of a response that may wrap it in markdown code
/// fences or surrounding prose.
pub fn extract_json(text: &str) -> &str {
    let trimmed = text.trim();
    if let Some(start) = trimmed.find("```json") {
        let after = &trimmed[start + 7..];
        if let Some(end) = after.find("```") {
            return after[..end].trim();
        }
    }
    if let Some(start) = trimmed.find("```") {
        let after = &trimmed[start + 3..];
        if let Some(end) = after.find("```") {
            return after[..end].trim();
        }
    }
    if let Some(start) = trimmed.find('{') {
        if let Some(end) = trimmed.rfind('}') {
            if start < end {
                return &trimmed[start..=end];
            }
        }
    }
    trimmed
}

#[cfg(test)]
mod tests {
    use super::*;
    use weft_core::provider::{FailingProvider, ScriptedProvider};

    fn planned_json() -> String {
        r#"{
            "objective": "ignored, overwritten",
            "nodes": [
                {
                    "id": "gather",
                    "type": "research",
                    "objective": "find sources",
                    "scope": { "artifact_namespace": "gather" },
                    "acceptance": [{ "kind": "non_empty_output" }]
                },
                {
                    "id": "write",
                    "type": "execute",
                    "objective": "write the report",
                    "deps": ["gather"],
                    "scope": { "artifact_namespace": "write" },
                    "acceptance": [{ "kind": "non_empty_output" }]
                },
                {
                    "id": "commit",
                    "type": "commit",
                    "objective": "merge staged deltas",
                    "deps": ["write"],
                    "scope": { "artifact_namespace": "commit" },
                    "acceptance": [{ "kind": "non_empty_output" }]
                }
            ]
        }"#
        .to_string()
    }

    #[tokio::test]
    async fn test_plan_parses_provider_graph() {
        let provider = Arc::new(ScriptedProvider::new([planned_json()]));
        let planner = GraphPlanner::new(provider);
        let run = Run::new("write a report about rust executors");

        let graph = planner.plan(&run, &[]).await;
        assert_eq!(graph.nodes.len(), 3);
        assert_eq!(graph.run_id, run.run_id);
        assert_eq!(graph.objective, run.objective);
        assert_eq!(graph.nodes[1].deps, vec!["gather"]);
    }

    #[tokio::test]
    async fn test_plan_accepts_fenced_json() {
        let fenced = format!("Here is the plan:\n```json\n{}\n```", planned_json());
        let provider = Arc::new(ScriptedProvider::new([fenced]));
        let planner = GraphPlanner::new(provider);
        let run = Run::new("objective");

        let graph = planner.plan(&run, &[]).await;
        assert_eq!(graph.nodes.len(), 3);
    }

    #[tokio::test]
    async fn test_unparseable_response_falls_back() {
        let provider = Arc::new(ScriptedProvider::new(["not json at all"]));
        let planner = GraphPlanner::new(provider);
        let run = Run::new("objective");

        let graph = planner.plan(&run, &[]).await;
        let ids: Vec<&str> = graph.nodes.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec!["research", "execute", "commit"]);
    }

    #[tokio::test]
    async fn test_invalid_graph_falls_back() {
        // Parses, but has a dangling dep
        let bad = r#"{
            "objective": "x",
            "nodes": [{
                "id": "a",
                "type": "execute",
                "objective": "a",
                "deps": ["ghost"],
                "scope": { "artifact_namespace": "a" },
                "acceptance": [{ "kind": "non_empty_output" }]
            }]
        }"#;
        let provider = Arc::new(ScriptedProvider::new([bad]));
        let planner = GraphPlanner::new(provider);
        let run = Run::new("objective");

        let graph = planner.plan(&run, &[]).await;
        assert_eq!(graph.nodes.len(), 3);
        assert_eq!(graph.nodes[0].id, "research");
    }

    #[tokio::test]
    async fn test_provider_error_falls_back() {
        let provider = Arc::new(FailingProvider::new("backend down"));
        let planner = GraphPlanner::new(provider);
        let run = Run::new("objective");

        let graph = planner.plan(&run, &["stay terse".into()]).await;
        assert_eq!(graph.nodes.len(), 3);
        assert_eq!(graph.constraints, vec!["stay terse"]);
    }

    #[test]
    fn test_fallback_graph_validates() {
        let run = Run::new("objective");
        let graph = fallback_graph(&run, &[]);
        assert!(validate(&graph).valid);
        // Execute reads research's namespace, commit reads both
        assert_eq!(
            graph.nodes[1].scope.artifact_policy.allow_reads_from,
            vec!["research"]
        );
    }

    #[test]
    fn test_extract_json_variants() {
        assert_eq!(extract_json(r#"{"a":1}"#), r#"{"a":1}"#);
        assert_eq!(extract_json("```json\n{\"a\":1}\n```"), r#"{"a":1}"#);
        assert_eq!(extract_json("prefix {\"a\":1} suffix"), r#"{"a":1}"#);
        assert_eq!(extract_json("```\n{\"a\":1}\n```"), r#"{"a":1}"#);
    }
}
