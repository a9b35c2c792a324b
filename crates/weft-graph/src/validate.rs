use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

use crate::model::{NodeSpec, TaskGraph};
use weft_core::error::{Result, WeftError};

/// Outcome of validating a graph.
#[derive(Debug, Clone)]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<String>,
}

impl ValidationReport {
    fn ok() -> Self {
        Self {
            valid: true,
            errors: Vec::new(),
        }
    }

    fn failed(errors: Vec<String>) -> Self {
        Self {
            valid: false,
            errors,
        }
    }
}

/// Node and dependency ids: lowercase start, then lowercase/digit/`_`/`-`,
/// at most 64 characters.
pub fn is_valid_node_id(id: &str) -> bool {
    let mut chars = id.chars();
    match chars.next() {
        Some(c) if c.is_ascii_lowercase() => {}
        _ => return false,
    }
    id.len() <= 64
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-')
}

/// Validate a graph: structural checks, duplicate ids, dangling dependency
/// references, then cycle detection. All errors are collected, not just the
/// first.
pub fn validate(graph: &TaskGraph) -> ValidationReport {
    let mut errors = Vec::new();

    if graph.nodes.is_empty() {
        return ValidationReport::failed(vec!["graph has no nodes".into()]);
    }

    let mut seen = HashSet::new();
    for node in &graph.nodes {
        if !is_valid_node_id(&node.id) {
            errors.push(format!("invalid node id: '{}'", node.id));
        }
        if !seen.insert(node.id.as_str()) {
            errors.push(format!("duplicate node id: '{}'", node.id));
        }
        if node.acceptance.is_empty() {
            errors.push(format!("node '{}' has no acceptance tests", node.id));
        }
    }

    for node in &graph.nodes {
        for dep in &node.deps {
            if !seen.contains(dep.as_str()) {
                errors.push(format!(
                    "node '{}' depends on unknown node '{}'",
                    node.id, dep
                ));
            }
        }
    }

    // Cycle detection only makes sense once every edge resolves
    if errors.is_empty() {
        if let Some(cycle) = find_cycle(graph) {
            errors.push(format!("dependency cycle: {}", cycle.join(" -> ")));
        }
    }

    if errors.is_empty() {
        ValidationReport::ok()
    } else {
        ValidationReport::failed(errors)
    }
}

/// DFS with an explicit recursion stack. Returns the node ids of the first
/// cycle found, as a path `n1 -> n2 -> ... -> n1` (without repeating the
/// closing node).
fn find_cycle(graph: &TaskGraph) -> Option<Vec<String>> {
    #[derive(Clone, Copy, PartialEq)]
    enum Color {
        White,
        Gray,
        Black,
    }

    let index: HashMap<&str, &NodeSpec> =
        graph.nodes.iter().map(|n| (n.id.as_str(), n)).collect();
    let mut colors: HashMap<&str, Color> = graph
        .nodes
        .iter()
        .map(|n| (n.id.as_str(), Color::White))
        .collect();

    fn visit<'a>(
        id: &'a str,
        index: &HashMap<&'a str, &'a NodeSpec>,
        colors: &mut HashMap<&'a str, Color>,
        path: &mut Vec<&'a str>,
    ) -> Option<Vec<String>> {
        colors.insert(id, Color::Gray);
        path.push(id);

        if let Some(node) = index.get(id) {
            for dep in &node.deps {
                match colors.get(dep.as_str()).copied().unwrap_or(Color::Black) {
                    Color::Gray => {
                        // Back-edge: the cycle is the path suffix from the
                        // first occurrence of `dep`
                        let start = path.iter().position(|p| *p == dep.as_str()).unwrap_or(0);
                        return Some(path[start..].iter().map(|s| s.to_string()).collect());
                    }
                    Color::White => {
                        if let Some(cycle) = visit(dep.as_str(), index, colors, path) {
                            return Some(cycle);
                        }
                    }
                    Color::Black => {}
                }
            }
        }

        path.pop();
        colors.insert(id, Color::Black);
        None
    }

    let mut path = Vec::new();
    for node in &graph.nodes {
        if colors[node.id.as_str()] == Color::White {
            if let Some(cycle) = visit(node.id.as_str(), &index, &mut colors, &mut path) {
                return Some(cycle);
            }
        }
    }
    None
}

/// Nodes not yet completed whose every dependency is completed.
///
/// The executor additionally excludes failed nodes; this utility is the raw
/// readiness predicate.
pub fn ready_nodes<'a>(graph: &'a TaskGraph, completed: &BTreeSet<String>) -> Vec<&'a NodeSpec> {
    graph
        .nodes
        .iter()
        .filter(|n| !completed.contains(&n.id))
        .filter(|n| n.deps.iter().all(|d| completed.contains(d)))
        .collect()
}

/// Kahn's algorithm. Utility for tooling and tests; the executor schedules
/// from ready sets, not from this order.
pub fn topological_order(graph: &TaskGraph) -> Result<Vec<String>> {
    let mut in_degree: HashMap<&str, usize> = graph
        .nodes
        .iter()
        .map(|n| (n.id.as_str(), n.deps.len()))
        .collect();
    let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
    for node in &graph.nodes {
        for dep in &node.deps {
            dependents
                .entry(dep.as_str())
                .or_default()
                .push(node.id.as_str());
        }
    }

    let mut queue: VecDeque<&str> = {
        let mut roots: Vec<&str> = in_degree
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(id, _)| *id)
            .collect();
        roots.sort();
        roots.into_iter().collect()
    };

    let mut order = Vec::with_capacity(graph.nodes.len());
    while let Some(id) = queue.pop_front() {
        order.push(id.to_string());
        let mut unlocked = Vec::new();
        for dependent in dependents.get(id).into_iter().flatten() {
            let degree = in_degree.get_mut(dependent).expect("known node");
            *degree -= 1;
            if *degree == 0 {
                unlocked.push(*dependent);
            }
        }
        unlocked.sort();
        queue.extend(unlocked);
    }

    if order.len() != graph.nodes.len() {
        return Err(WeftError::GraphValidation(
            "graph contains a cycle, no topological order".into(),
        ));
    }
    Ok(order)
}
