//! Agent DAG (Directed Acyclic Graph) construction and queries.
//!
//! [`DagBuilder`] validates a list of [`AgentConfig`]s and turns it into an
//! immutable [`AgentDag`]. Nodes keep declaration order (node index `i` is the
//! `i`-th declared agent), which every deterministic ordering below relies on.
//! Edges point from a dependency to its dependent.

use crate::config::{AgentConfig, Config};
use crate::error::{Error, Result};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use tracing::debug;

/// Static checks run before any graph is built.
///
/// Rejects empty or duplicate names, self-dependencies, and dependencies on
/// agents that are not declared.
pub fn validate_dag_config(agents: &[AgentConfig]) -> Result<()> {
    let mut names = HashSet::with_capacity(agents.len());
    for agent in agents {
        if agent.name.trim().is_empty() {
            return Err(Error::Config("agent name must not be empty".to_string()));
        }
        if !names.insert(agent.name.as_str()) {
            return Err(Error::Config(format!(
                "duplicate agent name '{}'",
                agent.name
            )));
        }
    }

    for agent in agents {
        for dep in &agent.dependencies {
            if dep == &agent.name {
                return Err(Error::Config(format!(
                    "agent '{}' depends on itself",
                    agent.name
                )));
            }
            if !names.contains(dep.as_str()) {
                return Err(Error::Config(format!(
                    "agent '{}' depends on unknown agent '{}'",
                    agent.name, dep
                )));
            }
        }
    }

    Ok(())
}

/// Builds a validated [`AgentDag`].
#[derive(Debug, Clone, Default)]
pub struct DagBuilder {
    agents: Vec<AgentConfig>,
}

impl DagBuilder {
    pub fn new(agents: Vec<AgentConfig>) -> Self {
        Self { agents }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.agents.clone())
    }

    pub fn agent(mut self, agent: AgentConfig) -> Self {
        self.agents.push(agent);
        self
    }

    /// Validate, link, and cycle-check the agents.
    ///
    /// # Errors
    /// - `Error::Config` for any [`validate_dag_config`] failure
    /// - `Error::CycleDetected` carrying the cycle path, e.g. `a -> b -> a`
    pub fn build(self) -> Result<AgentDag> {
        validate_dag_config(&self.agents)?;

        let mut graph = DiGraph::with_capacity(self.agents.len(), 0);
        let mut index = HashMap::with_capacity(self.agents.len());
        for agent in self.agents {
            let name = agent.name.clone();
            let node = graph.add_node(agent);
            index.insert(name, node);
        }

        let mut edges = Vec::new();
        for node in graph.node_indices() {
            for dep in &graph[node].dependencies {
                // validate_dag_config guarantees every dependency resolves
                if let Some(&from) = index.get(dep) {
                    edges.push((from, node));
                }
            }
        }
        for (from, to) in edges {
            graph.add_edge(from, to, ());
        }

        if let Some(cycle) = find_cycle(&graph) {
            let cycle: Vec<String> = cycle.iter().map(|&n| graph[n].name.clone()).collect();
            return Err(Error::CycleDetected { cycle });
        }

        let waves = compute_waves(&graph);
        let mut wave_of = vec![0; graph.node_count()];
        for (i, wave) in waves.iter().enumerate() {
            for node in wave {
                wave_of[node.index()] = i;
            }
        }

        debug!(
            agents = graph.node_count(),
            dependencies = graph.edge_count(),
            waves = waves.len(),
            "dag built"
        );

        Ok(AgentDag {
            graph,
            index,
            waves,
            wave_of,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Color {
    White,
    Gray,
    Black,
}

/// Three-colour depth-first search over every component.
///
/// Returns the cycle as a node path that starts and ends with the first gray
/// node encountered again. The walk keeps its own stack, so chain depth is
/// bounded by memory rather than the thread stack.
pub(crate) fn find_cycle<N, E>(graph: &DiGraph<N, E>) -> Option<Vec<NodeIndex>> {
    let mut color = vec![Color::White; graph.node_count()];

    for start in graph.node_indices() {
        if color[start.index()] == Color::White {
            if let Some(cycle) = visit(graph, start, &mut color) {
                return Some(cycle);
            }
        }
    }
    None
}

fn visit<N, E>(
    graph: &DiGraph<N, E>,
    start: NodeIndex,
    color: &mut [Color],
) -> Option<Vec<NodeIndex>> {
    // (node, its sorted successors, cursor into them)
    let mut stack: Vec<(NodeIndex, Vec<NodeIndex>, usize)> = Vec::new();
    color[start.index()] = Color::Gray;
    stack.push((start, successors(graph, start), 0));

    while let Some((node, next_nodes, cursor)) = stack.last_mut() {
        let Some(&next) = next_nodes.get(*cursor) else {
            color[node.index()] = Color::Black;
            stack.pop();
            continue;
        };
        *cursor += 1;

        match color[next.index()] {
            Color::Gray => {
                let from = stack.iter().position(|(n, _, _)| *n == next).unwrap_or(0);
                let mut cycle: Vec<NodeIndex> =
                    stack[from..].iter().map(|(n, _, _)| *n).collect();
                cycle.push(next);
                return Some(cycle);
            }
            Color::White => {
                color[next.index()] = Color::Gray;
                stack.push((next, successors(graph, next), 0));
            }
            Color::Black => {}
        }
    }
    None
}

fn successors<N, E>(graph: &DiGraph<N, E>, node: NodeIndex) -> Vec<NodeIndex> {
    sorted(graph.neighbors_directed(node, Direction::Outgoing))
}

/// Kahn levelling: wave `i` holds the nodes whose dependencies all sit in
/// waves `< i`. Each wave is in declaration order.
fn compute_waves<N, E>(graph: &DiGraph<N, E>) -> Vec<Vec<NodeIndex>> {
    let mut in_degree: Vec<usize> = graph
        .node_indices()
        .map(|n| graph.neighbors_directed(n, Direction::Incoming).count())
        .collect();

    let mut current: Vec<NodeIndex> = graph
        .node_indices()
        .filter(|n| in_degree[n.index()] == 0)
        .collect();
    let mut waves = Vec::new();

    while !current.is_empty() {
        let mut next = Vec::new();
        for &node in &current {
            for dependent in graph.neighbors_directed(node, Direction::Outgoing) {
                in_degree[dependent.index()] -= 1;
                if in_degree[dependent.index()] == 0 {
                    next.push(dependent);
                }
            }
        }
        next.sort();
        waves.push(std::mem::replace(&mut current, next));
    }

    waves
}

fn sorted(iter: impl Iterator<Item = NodeIndex>) -> Vec<NodeIndex> {
    let mut v: Vec<NodeIndex> = iter.collect();
    v.sort();
    v
}

/// A validated, acyclic agent graph. Read-only once built.
pub struct AgentDag {
    graph: DiGraph<AgentConfig, ()>,
    index: HashMap<String, NodeIndex>,
    waves: Vec<Vec<NodeIndex>>,
    wave_of: Vec<usize>,
}

impl AgentDag {
    /// Number of agents.
    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// Number of dependency edges.
    pub fn dependency_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&AgentConfig> {
        self.index.get(name).map(|&n| &self.graph[n])
    }

    pub fn index_of(&self, name: &str) -> Option<NodeIndex> {
        self.index.get(name).copied()
    }

    /// The agent at a node index. Panics on an index from another DAG.
    pub fn agent(&self, node: NodeIndex) -> &AgentConfig {
        &self.graph[node]
    }

    /// All agents in declaration order.
    pub fn agents(&self) -> impl Iterator<Item = &AgentConfig> {
        self.graph.node_weights()
    }

    pub fn node_indices(&self) -> impl Iterator<Item = NodeIndex> + '_ {
        self.graph.node_indices()
    }

    /// Direct dependencies of a node, in declaration order.
    pub fn dependency_indices(&self, node: NodeIndex) -> Vec<NodeIndex> {
        sorted(self.graph.neighbors_directed(node, Direction::Incoming))
    }

    /// Direct dependents of a node, in declaration order.
    pub fn dependent_indices(&self, node: NodeIndex) -> Vec<NodeIndex> {
        sorted(self.graph.neighbors_directed(node, Direction::Outgoing))
    }

    pub fn dependencies(&self, name: &str) -> Vec<&AgentConfig> {
        self.index_of(name)
            .map(|n| {
                self.dependency_indices(n)
                    .into_iter()
                    .map(|d| &self.graph[d])
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn dependents(&self, name: &str) -> Vec<&AgentConfig> {
        self.index_of(name)
            .map(|n| {
                self.dependent_indices(n)
                    .into_iter()
                    .map(|d| &self.graph[d])
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Every agent that depends on `name`, directly or transitively.
    pub fn transitive_dependents(&self, name: &str) -> HashSet<String> {
        let mut seen = HashSet::new();
        let Some(start) = self.index_of(name) else {
            return seen;
        };

        let mut queue = VecDeque::from([start]);
        while let Some(node) = queue.pop_front() {
            for dependent in self.graph.neighbors_directed(node, Direction::Outgoing) {
                if seen.insert(self.graph[dependent].name.clone()) {
                    queue.push_back(dependent);
                }
            }
        }
        seen
    }

    /// Topological order; among ready agents the earliest declared goes first.
    pub fn topological_order(&self) -> Vec<&AgentConfig> {
        let mut in_degree: Vec<usize> = self
            .graph
            .node_indices()
            .map(|n| self.graph.neighbors_directed(n, Direction::Incoming).count())
            .collect();
        let mut ready: BTreeSet<NodeIndex> = self
            .graph
            .node_indices()
            .filter(|n| in_degree[n.index()] == 0)
            .collect();

        let mut order = Vec::with_capacity(self.len());
        while let Some(node) = ready.pop_first() {
            order.push(&self.graph[node]);
            for dependent in self.graph.neighbors_directed(node, Direction::Outgoing) {
                in_degree[dependent.index()] -= 1;
                if in_degree[dependent.index()] == 0 {
                    ready.insert(dependent);
                }
            }
        }
        order
    }

    /// Topological levels of the graph.
    pub fn waves(&self) -> Vec<Vec<&AgentConfig>> {
        self.waves
            .iter()
            .map(|wave| wave.iter().map(|&n| &self.graph[n]).collect())
            .collect()
    }

    pub fn wave_indices(&self) -> &[Vec<NodeIndex>] {
        &self.waves
    }

    pub fn wave_count(&self) -> usize {
        self.waves.len()
    }

    /// The wave a node belongs to.
    pub fn wave_of(&self, node: NodeIndex) -> usize {
        self.wave_of[node.index()]
    }

    /// The underlying graph for advanced operations.
    pub fn graph(&self) -> &DiGraph<AgentConfig, ()> {
        &self.graph
    }
}

impl std::fmt::Debug for AgentDag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentDag")
            .field("agents", &self.len())
            .field("dependencies", &self.dependency_count())
            .field("waves", &self.wave_count())
            .finish()
    }
}
