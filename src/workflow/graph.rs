//! Graph Compiler
//!
//! Turns a [`WorkflowDefinition`] into the [`ExecutionGraph`] persisted on a
//! workflow execution. Compilation is pure: the same definition always yields
//! the same node order, a stable topological order that breaks ties by
//! declaration sequence.
//!
//! Back edges tagged as loops are kept in the adjacency list but do not take
//! part in ordering, so an intentional loop never trips cycle detection.

use std::cmp::Reverse;
use std::collections::{BTreeMap, BinaryHeap, HashMap};

use log::debug;
use serde::{Deserialize, Serialize};

use super::model::{Edge, WorkflowDefinition};
use super::validator::{into_single, validate_definition, DefinitionError};

/// A task node in the compiled graph.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct GraphNode {
    pub id: String,
    pub action: String,
}

/// Compiled workflow topology.
///
/// Nodes live in a flat list addressed by id; edges are an adjacency list
/// keyed by the same ids. Every node has an adjacency entry, possibly empty.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct ExecutionGraph {
    pub nodes: Vec<GraphNode>,

    pub adjacency: BTreeMap<String, Vec<String>>,

    /// Loop-tagged back edges (also present in `adjacency`)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub loops: Vec<Edge>,
}

impl ExecutionGraph {
    /// Gets a node by ID.
    pub fn node(&self, id: &str) -> Option<&GraphNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.adjacency.contains_key(id)
    }

    /// Returns the direct successors of a node.
    pub fn successors(&self, id: &str) -> &[String] {
        self.adjacency.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Returns the predecessors of a node, ignoring loop back edges.
    pub fn predecessors(&self, id: &str) -> Vec<&str> {
        self.nodes
            .iter()
            .filter(|n| {
                self.successors(&n.id).iter().any(|s| s == id) && !self.is_loop_edge(&n.id, id)
            })
            .map(|n| n.id.as_str())
            .collect()
    }

    /// Returns nodes with no forward predecessors (entry points).
    pub fn roots(&self) -> Vec<&GraphNode> {
        self.nodes
            .iter()
            .filter(|n| self.predecessors(&n.id).is_empty())
            .collect()
    }

    pub fn is_loop_edge(&self, from: &str, to: &str) -> bool {
        self.loops.iter().any(|e| e.from == from && e.to == to)
    }

    /// Returns node ids in compiled order.
    pub fn node_ids(&self) -> Vec<&str> {
        self.nodes.iter().map(|n| n.id.as_str()).collect()
    }

    /// Checks that every adjacency key and value names a node.
    pub fn is_consistent(&self) -> bool {
        self.nodes.len() == self.adjacency.len()
            && self.adjacency.iter().all(|(from, targets)| {
                self.node(from).is_some() && targets.iter().all(|t| self.node(t).is_some())
            })
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// Compiles a workflow definition into an execution graph.
///
/// # Errors
///
/// Returns a [`DefinitionError`] when the definition is empty, declares
/// duplicate tasks, references an undeclared task, or contains a cycle
/// that is not tagged as a loop.
///
/// # Example
///
/// ```
/// use orchestra::workflow::{compile, TaskDefinition, WorkflowDefinition};
///
/// let def = WorkflowDefinition::new("sequential")
///     .with_task(TaskDefinition::new("task1", "core.echo").then("task2"))
///     .with_task(TaskDefinition::new("task2", "core.echo"));
///
/// let graph = compile(&def).unwrap();
/// assert_eq!(graph.node_ids(), vec!["task1", "task2"]);
/// assert_eq!(graph.successors("task1"), ["task2".to_string()]);
/// ```
pub fn compile(definition: &WorkflowDefinition) -> Result<ExecutionGraph, DefinitionError> {
    if let Some(error) = into_single(validate_definition(definition)) {
        return Err(error);
    }

    let index: HashMap<&str, usize> = definition
        .tasks
        .iter()
        .enumerate()
        .map(|(i, t)| (t.id.as_str(), i))
        .collect();

    let mut adjacency: BTreeMap<String, Vec<String>> = definition
        .tasks
        .iter()
        .map(|t| (t.id.clone(), Vec::new()))
        .collect();
    let mut forward: Vec<Vec<usize>> = vec![Vec::new(); definition.tasks.len()];
    let mut in_degree: Vec<usize> = vec![0; definition.tasks.len()];
    let mut loops = Vec::new();

    for edge in definition.all_edges() {
        if let Some(targets) = adjacency.get_mut(&edge.from) {
            targets.push(edge.to.clone());
        }

        if edge.is_loop {
            loops.push(edge);
            continue;
        }

        let (from, to) = (index[edge.from.as_str()], index[edge.to.as_str()]);
        forward[from].push(to);
        in_degree[to] += 1;
    }

    // Kahn's algorithm, always taking the earliest-declared ready task
    let mut ready: BinaryHeap<Reverse<usize>> = in_degree
        .iter()
        .enumerate()
        .filter(|(_, d)| **d == 0)
        .map(|(i, _)| Reverse(i))
        .collect();

    let mut order: Vec<usize> = Vec::with_capacity(definition.tasks.len());
    while let Some(Reverse(current)) = ready.pop() {
        order.push(current);
        for &next in &forward[current] {
            in_degree[next] -= 1;
            if in_degree[next] == 0 {
                ready.push(Reverse(next));
            }
        }
    }

    if order.len() != definition.tasks.len() {
        let stuck = definition
            .tasks
            .iter()
            .enumerate()
            .filter(|(i, _)| in_degree[*i] > 0)
            .map(|(_, t)| t.id.clone())
            .collect();
        return Err(DefinitionError::Cycle(stuck));
    }

    let nodes: Vec<GraphNode> = order
        .into_iter()
        .map(|i| GraphNode {
            id: definition.tasks[i].id.clone(),
            action: definition.tasks[i].action.clone(),
        })
        .collect();

    debug!(
        "Compiled '{}': {:?}",
        definition.name,
        nodes.iter().map(|n| &n.id).collect::<Vec<_>>()
    );

    Ok(ExecutionGraph {
        nodes,
        adjacency,
        loops,
    })
}
