//! Unit dependency graph: construction, validation, and stage computation.
//!
//! Uses `petgraph` to model unit dependencies as a directed graph with edges
//! running from a dependency to its dependent. Validation reports cycles,
//! unreachable units, and the critical path; stage computation groups units
//! into waves where every unit's dependencies lie in earlier waves.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;

use petgraph::Direction;
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use serde::{Deserialize, Serialize};
use tessera_types::unit::{DependencyKind, Unit};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Graph problems that prevent execution from starting.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GraphError {
    #[error("duplicate unit id '{0}'")]
    DuplicateUnit(String),

    #[error("unit '{unit_id}' depends on unknown unit '{target_id}'")]
    DanglingDependency { unit_id: String, target_id: String },

    #[error("cycle detected: {}", .cycle.join(" -> "))]
    CycleDetected { cycle: Vec<String> },

    /// Stage computation made no progress while units remained.
    #[error("stage computation stalled with unassigned units: {}", .remaining.join(", "))]
    StageStall { remaining: Vec<String> },
}

// ---------------------------------------------------------------------------
// Graph
// ---------------------------------------------------------------------------

/// Directed dependency graph over unit ids.
#[derive(Debug, Clone)]
pub struct UnitGraph {
    graph: DiGraph<String, DependencyKind>,
    index: HashMap<String, NodeIndex>,
    /// Node indices in input order; used for every tie-break.
    order: Vec<NodeIndex>,
}

/// Build the dependency graph for a set of units.
///
/// Fails on duplicate ids and on edges that reference unknown units. Cycles
/// are not rejected here; `validate` reports them.
pub fn build_graph(units: &[Unit]) -> Result<UnitGraph, GraphError> {
    let mut graph = DiGraph::<String, DependencyKind>::new();
    let mut index = HashMap::with_capacity(units.len());
    let mut order = Vec::with_capacity(units.len());

    for unit in units {
        if index.contains_key(&unit.id) {
            return Err(GraphError::DuplicateUnit(unit.id.clone()));
        }
        let node = graph.add_node(unit.id.clone());
        index.insert(unit.id.clone(), node);
        order.push(node);
    }

    for unit in units {
        let to = index[&unit.id];
        for edge in &unit.dependencies {
            let from = *index.get(&edge.target_id).ok_or_else(|| {
                GraphError::DanglingDependency {
                    unit_id: unit.id.clone(),
                    target_id: edge.target_id.clone(),
                }
            })?;
            graph.add_edge(from, to, edge.kind);
        }
    }

    Ok(UnitGraph {
        graph,
        index,
        order,
    })
}

impl UnitGraph {
    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn contains(&self, unit_id: &str) -> bool {
        self.index.contains_key(unit_id)
    }

    /// Unit ids in input order.
    pub fn unit_ids(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(|n| self.graph[*n].as_str())
    }

    /// Direct dependencies of a unit, in input order.
    pub fn dependencies_of(&self, unit_id: &str) -> Vec<&str> {
        match self.index.get(unit_id) {
            Some(node) => self
                .sorted_neighbors(*node, Direction::Incoming)
                .into_iter()
                .map(|n| self.graph[n].as_str())
                .collect(),
            None => Vec::new(),
        }
    }

    /// Neighbors in input order (petgraph yields them newest-edge first).
    fn sorted_neighbors(&self, node: NodeIndex, dir: Direction) -> Vec<NodeIndex> {
        let mut neighbors: Vec<NodeIndex> = self.graph.neighbors_directed(node, dir).collect();
        neighbors.sort_by_key(|n| n.index());
        neighbors.dedup();
        neighbors
    }

    fn id(&self, node: NodeIndex) -> String {
        self.graph[node].clone()
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Outcome of graph validation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphValidation {
    pub is_acyclic: bool,
    /// Each cycle is a path that starts and ends at the same unit.
    pub cycles: Vec<Vec<String>>,
    /// Units not reachable from any root (a unit without dependencies).
    pub unreachable: Vec<String>,
    /// Longest root-to-leaf chain; empty for cyclic graphs.
    pub critical_path: Vec<String>,
}

/// Validate a graph: cycles, unreachable units, and the critical path.
pub fn validate(graph: &UnitGraph) -> GraphValidation {
    let cycles = find_cycles(graph);
    let is_acyclic = cycles.is_empty();
    let unreachable = find_unreachable(graph);
    let critical_path = if is_acyclic {
        critical_path(graph)
    } else {
        Vec::new()
    };

    GraphValidation {
        is_acyclic,
        cycles,
        unreachable,
        critical_path,
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Visit {
    New,
    OnStack,
    Done,
}

/// Depth-first search with an explicit recursion stack. Each back edge to a
/// node still on the stack yields the stack suffix from that node, closed
/// back on itself.
fn find_cycles(graph: &UnitGraph) -> Vec<Vec<String>> {
    let mut state = vec![Visit::New; graph.graph.node_count()];
    let mut cycles = Vec::new();

    for &start in &graph.order {
        if state[start.index()] != Visit::New {
            continue;
        }

        // (node, successors, next successor position)
        let mut stack: Vec<(NodeIndex, Vec<NodeIndex>, usize)> = Vec::new();
        state[start.index()] = Visit::OnStack;
        stack.push((
            start,
            graph.sorted_neighbors(start, Direction::Outgoing),
            0,
        ));

        while let Some(top) = stack.last_mut() {
            let node = top.0;
            let next = if top.2 < top.1.len() {
                top.2 += 1;
                Some(top.1[top.2 - 1])
            } else {
                None
            };

            if let Some(next) = next {
                match state[next.index()] {
                    Visit::New => {
                        state[next.index()] = Visit::OnStack;
                        let succ = graph.sorted_neighbors(next, Direction::Outgoing);
                        stack.push((next, succ, 0));
                    }
                    Visit::OnStack => {
                        let from = stack
                            .iter()
                            .position(|(n, _, _)| *n == next)
                            .unwrap_or(0);
                        let mut cycle: Vec<String> =
                            stack[from..].iter().map(|(n, _, _)| graph.id(*n)).collect();
                        cycle.push(graph.id(next));
                        cycles.push(cycle);
                    }
                    Visit::Done => {}
                }
            } else {
                state[node.index()] = Visit::Done;
                stack.pop();
            }
        }
    }

    cycles
}

fn find_unreachable(graph: &UnitGraph) -> Vec<String> {
    let mut seen = vec![false; graph.graph.node_count()];
    let mut queue: VecDeque<NodeIndex> = graph
        .order
        .iter()
        .copied()
        .filter(|n| {
            graph
                .graph
                .neighbors_directed(*n, Direction::Incoming)
                .next()
                .is_none()
        })
        .collect();

    for n in &queue {
        seen[n.index()] = true;
    }

    while let Some(node) = queue.pop_front() {
        for next in graph.graph.neighbors_directed(node, Direction::Outgoing) {
            if !seen[next.index()] {
                seen[next.index()] = true;
                queue.push_back(next);
            }
        }
    }

    graph
        .order
        .iter()
        .filter(|n| !seen[n.index()])
        .map(|n| graph.id(*n))
        .collect()
}

/// Longest root-to-leaf chain by unit count, via dynamic programming over a
/// topological order. Ties resolve to the earliest unit in input order.
fn critical_path(graph: &UnitGraph) -> Vec<String> {
    let Ok(sorted) = toposort(&graph.graph, None) else {
        return Vec::new();
    };

    let n = graph.graph.node_count();
    let mut length = vec![1usize; n];
    let mut prev: Vec<Option<NodeIndex>> = vec![None; n];

    for node in sorted {
        for pred in graph.sorted_neighbors(node, Direction::Incoming) {
            if length[pred.index()] + 1 > length[node.index()] {
                length[node.index()] = length[pred.index()] + 1;
                prev[node.index()] = Some(pred);
            }
        }
    }

    let Some(&end) = graph
        .order
        .iter()
        .rev()
        .max_by_key(|node| length[node.index()])
    else {
        return Vec::new();
    };

    let mut path = vec![graph.id(end)];
    let mut cursor = prev[end.index()];
    while let Some(node) = cursor {
        path.push(graph.id(node));
        cursor = prev[node.index()];
    }
    path.reverse();
    path
}

// ---------------------------------------------------------------------------
// Stages
// ---------------------------------------------------------------------------

/// A set of units with no ordering dependency among them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stage {
    pub index: usize,
    /// Unit ids in input order.
    pub unit_ids: Vec<String>,
}

/// Group units into stages.
///
/// Stage k holds every unit whose dependencies all lie in stages 0..k-1, in
/// input order. A pass that assigns nothing while units remain means the
/// graph has a cycle and is reported as `GraphError::StageStall`.
pub fn compute_stages(graph: &UnitGraph) -> Result<Vec<Stage>, GraphError> {
    let mut assigned: HashSet<NodeIndex> = HashSet::with_capacity(graph.len());
    let mut remaining: Vec<NodeIndex> = graph.order.clone();
    let mut stages = Vec::new();

    while !remaining.is_empty() {
        let (ready, blocked): (Vec<NodeIndex>, Vec<NodeIndex>) =
            remaining.into_iter().partition(|node| {
                graph
                    .graph
                    .neighbors_directed(*node, Direction::Incoming)
                    .all(|dep| assigned.contains(&dep))
            });

        if ready.is_empty() {
            return Err(GraphError::StageStall {
                remaining: blocked.iter().map(|n| graph.id(*n)).collect(),
            });
        }

        assigned.extend(ready.iter().copied());
        stages.push(Stage {
            index: stages.len(),
            unit_ids: ready.iter().map(|n| graph.id(*n)).collect(),
        });
        remaining = blocked;
    }

    Ok(stages)
}

// ---------------------------------------------------------------------------
// Execution plan
// ---------------------------------------------------------------------------

/// Validated stages plus the validation report and graph shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionPlan {
    pub stages: Vec<Stage>,
    pub validation: GraphValidation,
    pub stats: GraphStats,
}

/// Build, validate, and stage a set of units. Any cycle is fatal.
pub fn build_execution_plan(units: &[Unit]) -> Result<ExecutionPlan, GraphError> {
    let graph = build_graph(units)?;
    let validation = validate(&graph);

    if let Some(cycle) = validation.cycles.first() {
        return Err(GraphError::CycleDetected {
            cycle: cycle.clone(),
        });
    }

    let stages = compute_stages(&graph)?;
    let stats = graph_stats(&graph, &stages);
    Ok(ExecutionPlan {
        stages,
        validation,
        stats,
    })
}

// ---------------------------------------------------------------------------
// Stats
// ---------------------------------------------------------------------------

/// Shape summary of a staged graph.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphStats {
    pub units: usize,
    pub edges_by_kind: HashMap<DependencyKind, usize>,
    pub stage_count: usize,
    /// Largest stage; an upper bound on useful concurrency.
    pub max_stage_width: usize,
}

impl fmt::Display for GraphStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let edges: usize = self.edges_by_kind.values().sum();
        write!(
            f,
            "{} units, {} edges, {} stages (widest {})",
            self.units, edges, self.stage_count, self.max_stage_width
        )
    }
}

pub fn graph_stats(graph: &UnitGraph, stages: &[Stage]) -> GraphStats {
    let mut edges_by_kind = HashMap::new();
    for edge in graph.graph.edge_weights() {
        *edges_by_kind.entry(*edge).or_insert(0) += 1;
    }

    GraphStats {
        units: graph.len(),
        edges_by_kind,
        stage_count: stages.len(),
        max_stage_width: stages.iter().map(|s| s.unit_ids.len()).max().unwrap_or(0),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
