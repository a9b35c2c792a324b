pub mod builder;
pub mod executor;
pub mod model;
pub mod planner;
pub mod validate;

pub use builder::TaskGraphBuilder;
pub use executor::{
    backoff_delay, GraphExecutor, NodeExecutionResult, NodeOutcome, NodeRunner, NodeStatus,
    RunResult, RunStatus,
};
pub use model::{
    AcceptanceTest, ArtifactPolicy, GraphConfig, MemoryWritePolicy, NodeBudgets, NodeIo, NodeSpec,
    NodeType, Scope, SessionVisibility, TaskGraph, WriteMode,
};
pub use planner::{extract_json, fallback_graph, GraphPlanner};
pub use validate::{is_valid_node_id, ready_nodes, topological_order, validate, ValidationReport};
