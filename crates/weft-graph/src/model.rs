use serde::{Deserialize, Serialize};

use weft_core::config::RetryConfig;
use weft_core::types::RunId;

/// What kind of work a node does. Every node is one provider call, except
/// `Commit`, which deterministically merges staged deltas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeType {
    Plan,
    Research,
    Execute,
    Synthesize,
    Verify,
    Curate,
    Commit,
}

/// Write behavior inside a node's own namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteMode {
    #[default]
    CreateOrReplace,
    CreateOnly,
}

/// How a node may touch long-lived memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryWritePolicy {
    Deny,
    #[default]
    StageDeltaOnly,
    CuratorOnly,
}

/// Which session events a node's compiled context may draw on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionVisibility {
    #[default]
    RunWide,
    OwnNodeOnly,
}

/// Artifact read/write policy for one node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactPolicy {
    /// Namespaces this node may read in addition to its own.
    #[serde(default)]
    pub allow_reads_from: Vec<String>,
    #[serde(default)]
    pub write_mode: WriteMode,
    /// Reference artifacts by handle + summary rather than inlining bytes.
    #[serde(default = "default_pointer_first")]
    pub pointer_first: bool,
}

impl Default for ArtifactPolicy {
    fn default() -> Self {
        Self {
            allow_reads_from: Vec::new(),
            write_mode: WriteMode::default(),
            pointer_first: default_pointer_first(),
        }
    }
}

fn default_pointer_first() -> bool {
    true
}

/// Isolation contract for one node: a node writes only inside its own
/// artifact namespace, and memory/playbook writes are always staged except
/// through the commit step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scope {
    pub artifact_namespace: String,
    #[serde(default)]
    pub artifact_policy: ArtifactPolicy,
    #[serde(default)]
    pub memory_write_policy: MemoryWritePolicy,
    #[serde(default)]
    pub session_visibility: SessionVisibility,
    /// Skill ids visible to this node. Empty = all skills visible.
    #[serde(default)]
    pub allowed_skills: Vec<String>,
}

impl Scope {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            artifact_namespace: namespace.into(),
            artifact_policy: ArtifactPolicy::default(),
            memory_write_policy: MemoryWritePolicy::default(),
            session_visibility: SessionVisibility::default(),
            allowed_skills: Vec::new(),
        }
    }

    pub fn with_reads_from(mut self, namespaces: Vec<String>) -> Self {
        self.artifact_policy.allow_reads_from = namespaces;
        self
    }
}

/// A declared, typed criterion a node's output must satisfy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AcceptanceTest {
    /// The model output must be non-empty after trimming.
    NonEmptyOutput,
    /// The model output must contain this text.
    OutputContains { needle: String },
    /// The node must have written an artifact with this name.
    ArtifactExists { name: String },
}

impl AcceptanceTest {
    /// One-line rendering for prompt inclusion.
    pub fn describe(&self) -> String {
        match self {
            AcceptanceTest::NonEmptyOutput => "produce non-empty output".to_string(),
            AcceptanceTest::OutputContains { needle } => {
                format!("output must contain: {}", needle)
            }
            AcceptanceTest::ArtifactExists { name } => {
                format!("write an artifact named: {}", name)
            }
        }
    }
}

/// Named inputs a node expects and outputs it promises, as artifact names.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeIo {
    #[serde(default)]
    pub inputs: Vec<String>,
    #[serde(default)]
    pub outputs: Vec<String>,
}

/// Per-node resource budgets.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeBudgets {
    #[serde(default)]
    pub max_output_tokens: Option<usize>,
    #[serde(default)]
    pub max_context_tokens: Option<usize>,
}

/// One unit of DAG work.
///
/// Created once by the planner and never mutated; execution progress is
/// tracked out-of-band by completed/failed id sets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSpec {
    pub id: String,
    #[serde(rename = "type")]
    pub node_type: NodeType,
    pub objective: String,
    #[serde(default)]
    pub deps: Vec<String>,
    /// Skills to load in full for this node's context.
    #[serde(default)]
    pub skill_hints: Vec<String>,
    pub scope: Scope,
    #[serde(default)]
    pub io: NodeIo,
    pub acceptance: Vec<AcceptanceTest>,
    #[serde(default)]
    pub budgets: Option<NodeBudgets>,
    #[serde(default)]
    pub retry_policy: Option<RetryConfig>,
}

impl NodeSpec {
    /// A node with its own id as artifact namespace and a minimal
    /// acceptance criterion.
    pub fn new(id: impl Into<String>, node_type: NodeType, objective: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            scope: Scope::new(id.clone()),
            id,
            node_type,
            objective: objective.into(),
            deps: Vec::new(),
            skill_hints: Vec::new(),
            io: NodeIo::default(),
            acceptance: vec![AcceptanceTest::NonEmptyOutput],
            budgets: None,
            retry_policy: None,
        }
    }

    pub fn with_deps(mut self, deps: Vec<String>) -> Self {
        self.deps = deps;
        self
    }

    pub fn with_scope(mut self, scope: Scope) -> Self {
        self.scope = scope;
        self
    }

    pub fn with_acceptance(mut self, acceptance: Vec<AcceptanceTest>) -> Self {
        self.acceptance = acceptance;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry_policy = Some(retry);
        self
    }

    pub fn with_skill_hints(mut self, hints: Vec<String>) -> Self {
        self.skill_hints = hints;
        self
    }
}

/// Graph-level execution overrides.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphConfig {
    /// Overrides the executor's default when set.
    #[serde(default)]
    pub max_parallelism: Option<usize>,
    #[serde(default)]
    pub max_context_tokens: Option<usize>,
}

/// The complete DAG for one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskGraph {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub run_id: RunId,
    pub objective: String,
    #[serde(default)]
    pub constraints: Vec<String>,
    #[serde(default)]
    pub config: GraphConfig,
    pub nodes: Vec<NodeSpec>,
}

fn default_version() -> u32 {
    1
}

impl TaskGraph {
    pub fn node(&self, id: &str) -> Option<&NodeSpec> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn node_ids(&self) -> Vec<&str> {
        self.nodes.iter().map(|n| n.id.as_str()).collect()
    }
}
