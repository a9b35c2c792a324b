use weft_core::error::{Result, WeftError};
use weft_core::types::RunId;

use crate::model::{GraphConfig, NodeSpec, TaskGraph};
use crate::validate::validate;

/// Accumulates constraints and nodes for a graph. Full validation happens
/// only at `build()`; until then any shape is accepted.
pub struct TaskGraphBuilder {
    run_id: RunId,
    objective: String,
    constraints: Vec<String>,
    config: GraphConfig,
    nodes: Vec<NodeSpec>,
}

impl TaskGraphBuilder {
    pub fn new(run_id: &RunId, objective: impl Into<String>) -> Self {
        Self {
            run_id: run_id.clone(),
            objective: objective.into(),
            constraints: Vec::new(),
            config: GraphConfig::default(),
            nodes: Vec::new(),
        }
    }

    pub fn constraint(mut self, constraint: impl Into<String>) -> Self {
        self.constraints.push(constraint.into());
        self
    }

    pub fn max_parallelism(mut self, max: usize) -> Self {
        self.config.max_parallelism = Some(max);
        self
    }

    pub fn node(mut self, node: NodeSpec) -> Self {
        self.nodes.push(node);
        self
    }

    /// Validate and produce the immutable graph.
    pub fn build(self) -> Result<TaskGraph> {
        let graph = TaskGraph {
            version: 1,
            run_id: self.run_id,
            objective: self.objective,
            constraints: self.constraints,
            config: self.config,
            nodes: self.nodes,
        };
        let report = validate(&graph);
        if !report.valid {
            return Err(WeftError::GraphValidation(report.errors.join("; ")));
        }
        Ok(graph)
    }
}
