use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use weft_graph::TaskGraph;

/// One plan line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TodoEntry {
    pub id: String,
    pub objective: String,
    /// Unfinished dependencies, for blocked entries.
    #[serde(default)]
    pub waiting_on: Vec<String>,
}

/// Rendering-ready plan snapshot.
///
/// Recomputed purely from the graph and the completed-id set; persisted only
/// as rendered markdown, never as a mutable structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Todo {
    pub objective: String,
    pub completed: Vec<TodoEntry>,
    pub ready: Vec<TodoEntry>,
    pub blocked: Vec<TodoEntry>,
}

/// Re-renders the current goal and plan so they stay salient in compiled
/// contexts. No model call is involved.
pub struct Reciter;

impl Reciter {
    /// Recompute the plan snapshot.
    pub fn recite(graph: &TaskGraph, completed: &BTreeSet<String>) -> Todo {
        let mut todo = Todo {
            objective: graph.objective.clone(),
            completed: Vec::new(),
            ready: Vec::new(),
            blocked: Vec::new(),
        };

        for node in &graph.nodes {
            let entry = TodoEntry {
                id: node.id.clone(),
                objective: node.objective.clone(),
                waiting_on: node
                    .deps
                    .iter()
                    .filter(|d| !completed.contains(*d))
                    .cloned()
                    .collect(),
            };
            if completed.contains(&node.id) {
                todo.completed.push(entry);
            } else if entry.waiting_on.is_empty() {
                todo.ready.push(entry);
            } else {
                todo.blocked.push(entry);
            }
        }
        todo
    }

    /// Render the snapshot as a markdown checklist.
    pub fn render_markdown(todo: &Todo) -> String {
        let mut out = format!("# Plan: {}\n", todo.objective);
        for entry in &todo.completed {
            out.push_str(&format!("- [x] {} — {}\n", entry.id, entry.objective));
        }
        for entry in &todo.ready {
            out.push_str(&format!("- [ ] {} — {}\n", entry.id, entry.objective));
        }
        for entry in &todo.blocked {
            out.push_str(&format!(
                "- [ ] {} — {} (waiting on: {})\n",
                entry.id,
                entry.objective,
                entry.waiting_on.join(", ")
            ));
        }
        out
    }
}
