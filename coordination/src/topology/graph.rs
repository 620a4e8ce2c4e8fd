//! Compiled graph: nodes, edges and conditional selectors.
//!
//! A `Graph` is what the execution substrate consumes. Unconditional edges
//! always fire; a conditional edge calls its selector against the applied
//! run state and follows the returned target, which must be one of the
//! declared candidates.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::{Dfs, Reversed};
use serde::{Deserialize, Serialize};

use crate::catalog::{PipelineShape, StepId, StepKind};
use crate::config::PhaseFlags;
use crate::error::{CoordinationError, CoordinationResult};
use crate::state::RunState;

/// Virtual entry point of every graph.
pub const START: &str = "__start__";
/// Display name of the virtual exit.
pub const END: &str = "__end__";

/// Where an edge leads.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Target {
    Node(String),
    /// Terminates the current path.
    End,
}

impl Target {
    pub fn node(id: impl Into<String>) -> Self {
        Self::Node(id.into())
    }

    pub fn as_node(&self) -> Option<&str> {
        match self {
            Self::Node(id) => Some(id.as_str()),
            Self::End => None,
        }
    }

    pub fn is_end(&self) -> bool {
        matches!(self, Self::End)
    }
}

impl std::fmt::Display for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Node(id) => write!(f, "{}", id),
            Self::End => write!(f, "{}", END),
        }
    }
}

/// A unit of work in the compiled graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    pub kind: StepKind,
    /// Opaque reference to the work the node performs.
    pub work: String,
    /// Analyst branch the node belongs to, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<StepId>,
}

impl Node {
    pub fn new(id: impl Into<String>, kind: StepKind, work: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind,
            work: work.into(),
            step: None,
        }
    }

    pub fn for_step(mut self, step: StepId) -> Self {
        self.step = Some(step);
        self
    }
}

type SelectorFn = dyn Fn(&RunState) -> Target + Send + Sync;

/// Named routing function evaluated after the source node completes.
#[derive(Clone)]
pub struct Selector {
    name: String,
    func: Arc<SelectorFn>,
}

impl Selector {
    pub fn new(
        name: impl Into<String>,
        func: impl Fn(&RunState) -> Target + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            func: Arc::new(func),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn select(&self, state: &RunState) -> Target {
        (self.func)(state)
    }
}

impl std::fmt::Debug for Selector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Selector").field("name", &self.name).finish()
    }
}

/// Graph edge.
#[derive(Debug, Clone)]
pub enum Edge {
    /// `from → to`.
    Direct { from: String, to: Target },
    /// `from → selector → one of candidates`.
    Conditional {
        from: String,
        selector: Selector,
        candidates: Vec<Target>,
    },
}

impl Edge {
    pub fn direct(from: impl Into<String>, to: Target) -> Self {
        Self::Direct {
            from: from.into(),
            to,
        }
    }

    /// Conditional edge. Duplicate candidates are collapsed in order.
    pub fn conditional(from: impl Into<String>, selector: Selector, candidates: Vec<Target>) -> Self {
        let mut unique: Vec<Target> = Vec::with_capacity(candidates.len());
        for c in candidates {
            if !unique.contains(&c) {
                unique.push(c);
            }
        }
        Self::Conditional {
            from: from.into(),
            selector,
            candidates: unique,
        }
    }

    pub fn from(&self) -> &str {
        match self {
            Self::Direct { from, .. } | Self::Conditional { from, .. } => from,
        }
    }

    /// Every target the edge can lead to.
    pub fn targets(&self) -> &[Target] {
        match self {
            Self::Direct { to, .. } => std::slice::from_ref(to),
            Self::Conditional { candidates, .. } => candidates,
        }
    }

    /// Resolve the edge against the current state.
    pub fn resolve(&self, state: &RunState) -> Target {
        match self {
            Self::Direct { to, .. } => to.clone(),
            Self::Conditional { selector, .. } => selector.select(state),
        }
    }
}

/// Serialisable view of a compiled graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopologyDescription {
    pub shape: PipelineShape,
    pub steps: Vec<StepId>,
    pub phases: PhaseFlags,
    pub nodes: Vec<Node>,
    pub edges: Vec<EdgeDescription>,
}

/// Serialisable view of one edge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EdgeDescription {
    Direct {
        from: String,
        to: String,
    },
    Conditional {
        from: String,
        selector: String,
        candidates: Vec<String>,
    },
}

/// A compiled topology.
#[derive(Debug, Clone)]
pub struct Graph {
    pub(crate) shape: PipelineShape,
    pub(crate) steps: Vec<StepId>,
    pub(crate) phases: PhaseFlags,
    pub(crate) nodes: Vec<Node>,
    pub(crate) edges: Vec<Edge>,
}

impl Graph {
    pub fn shape(&self) -> PipelineShape {
        self.shape
    }

    /// Analyst steps instantiated in this graph, in selection order.
    pub fn steps(&self) -> &[StepId] {
        &self.steps
    }

    pub fn phases(&self) -> PhaseFlags {
        self.phases
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.node(id).is_some()
    }

    /// Clear node closing the branch that an analyst or tool node belongs to.
    pub fn branch_exit(&self, node: &str) -> Option<String> {
        let node = self.node(node)?;
        if !matches!(node.kind, StepKind::Analyst | StepKind::Tool) {
            return None;
        }
        let step = node.step?;
        self.nodes
            .iter()
            .find(|n| n.kind == StepKind::Clear && n.step == Some(step))
            .map(|n| n.id.clone())
    }

    /// Edges leaving `from` (use [`START`] for the entry edges).
    pub fn outgoing<'a>(&'a self, from: &'a str) -> impl Iterator<Item = &'a Edge> + 'a {
        self.edges.iter().filter(move |e| e.from() == from)
    }

    /// Nodes the run starts with.
    pub fn entry_targets(&self) -> Vec<Target> {
        self.outgoing(START)
            .flat_map(|e| e.targets().iter().cloned())
            .collect()
    }

    /// Serialisable description of nodes and edges.
    pub fn describe(&self) -> TopologyDescription {
        let edges = self
            .edges
            .iter()
            .map(|edge| match edge {
                Edge::Direct { from, to } => EdgeDescription::Direct {
                    from: from.clone(),
                    to: to.to_string(),
                },
                Edge::Conditional {
                    from,
                    selector,
                    candidates,
                } => EdgeDescription::Conditional {
                    from: from.clone(),
                    selector: selector.name().to_string(),
                    candidates: candidates.iter().map(Target::to_string).collect(),
                },
            })
            .collect();

        TopologyDescription {
            shape: self.shape,
            steps: self.steps.clone(),
            phases: self.phases,
            nodes: self.nodes.clone(),
            edges,
        }
    }

    /// Structural validation.
    ///
    /// Node ids are unique, edges only reference defined nodes, every node
    /// is reachable from [`START`] and every node can reach the exit.
    pub fn validate(&self) -> CoordinationResult<()> {
        let mut graph: DiGraph<String, ()> = DiGraph::new();
        let start = graph.add_node(START.to_string());
        let end = graph.add_node(END.to_string());

        let mut index: HashMap<&str, NodeIndex> = HashMap::new();
        for node in &self.nodes {
            if node.id == START || node.id == END {
                return Err(CoordinationError::topology(format!(
                    "node id '{}' is reserved",
                    node.id
                )));
            }
            let idx = graph.add_node(node.id.clone());
            if index.insert(node.id.as_str(), idx).is_some() {
                return Err(CoordinationError::topology(format!(
                    "duplicate node id '{}'",
                    node.id
                )));
            }
        }

        for edge in &self.edges {
            let from = if edge.from() == START {
                start
            } else {
                *index.get(edge.from()).ok_or_else(|| {
                    CoordinationError::topology(format!(
                        "edge leaves undefined node '{}'",
                        edge.from()
                    ))
                })?
            };
            if edge.targets().is_empty() {
                return Err(CoordinationError::topology(format!(
                    "conditional edge from '{}' has no candidates",
                    edge.from()
                )));
            }
            for target in edge.targets() {
                let to = match target {
                    Target::End => end,
                    Target::Node(id) => *index.get(id.as_str()).ok_or_else(|| {
                        CoordinationError::topology(format!(
                            "edge from '{}' targets undefined node '{}'",
                            edge.from(),
                            id
                        ))
                    })?,
                };
                graph.add_edge(from, to, ());
            }
        }

        let reachable = collect_reachable(&graph, start);
        let unreachable: Vec<&str> = self
            .nodes
            .iter()
            .filter(|n| !reachable.contains(&index[n.id.as_str()]))
            .map(|n| n.id.as_str())
            .collect();
        if !unreachable.is_empty() {
            return Err(CoordinationError::topology(format!(
                "nodes unreachable from start: {}",
                unreachable.join(", ")
            )));
        }

        let mut finishing = HashSet::new();
        let mut dfs = Dfs::new(Reversed(&graph), end);
        while let Some(idx) = dfs.next(Reversed(&graph)) {
            finishing.insert(idx);
        }
        let stuck: Vec<&str> = self
            .nodes
            .iter()
            .filter(|n| !finishing.contains(&index[n.id.as_str()]))
            .map(|n| n.id.as_str())
            .collect();
        if !stuck.is_empty() {
            return Err(CoordinationError::topology(format!(
                "nodes with no path to the exit: {}",
                stuck.join(", ")
            )));
        }

        Ok(())
    }
}

fn collect_reachable(graph: &DiGraph<String, ()>, from: NodeIndex) -> HashSet<NodeIndex> {
    let mut seen = HashSet::new();
    let mut dfs = Dfs::new(graph, from);
    while let Some(idx) = dfs.next(graph) {
        seen.insert(idx);
    }
    seen
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph(nodes: Vec<Node>, edges: Vec<Edge>) -> Graph {
        Graph {
            shape: PipelineShape::PerEntity,
            steps: vec![StepId::Market],
            phases: PhaseFlags::analysts_only(),
            nodes,
            edges,
        }
    }

    fn node(id: &str) -> Node {
        Node::new(id, StepKind::Manager, id)
    }

    #[test]
    fn test_valid_chain() {
        let g = graph(
            vec![node("a"), node("b")],
            vec![
                Edge::direct(START, Target::node("a")),
                Edge::direct("a", Target::node("b")),
                Edge::direct("b", Target::End),
            ],
        );
        assert!(g.validate().is_ok());
        assert_eq!(g.entry_targets(), vec![Target::node("a")]);
    }

    #[test]
    fn test_duplicate_node_rejected() {
        let g = graph(
            vec![node("a"), node("a")],
            vec![Edge::direct(START, Target::node("a")), Edge::direct("a", Target::End)],
        );
        let err = g.validate().unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn test_undefined_target_rejected() {
        let g = graph(
            vec![node("a")],
            vec![
                Edge::direct(START, Target::node("a")),
                Edge::direct("a", Target::node("ghost")),
            ],
        );
        assert!(g.validate().unwrap_err().to_string().contains("ghost"));
    }

    #[test]
    fn test_unreachable_node_rejected() {
        let g = graph(
            vec![node("a"), node("island")],
            vec![
                Edge::direct(START, Target::node("a")),
                Edge::direct("a", Target::End),
                Edge::direct("island", Target::End),
            ],
        );
        assert!(g.validate().unwrap_err().to_string().contains("island"));
    }

    #[test]
    fn test_node_without_exit_rejected() {
        let g = graph(
            vec![node("a"), node("sink")],
            vec![
                Edge::direct(START, Target::node("a")),
                Edge::direct("a", Target::node("sink")),
                Edge::direct("a", Target::End),
            ],
        );
        assert!(g.validate().unwrap_err().to_string().contains("sink"));
    }

    #[test]
    fn test_conditional_candidates_deduplicated() {
        let edge = Edge::conditional(
            "a",
            Selector::new("always_end", |_| Target::End),
            vec![Target::End, Target::node("b"), Target::End],
        );
        assert_eq!(edge.targets(), &[Target::End, Target::node("b")]);
    }

    #[test]
    fn test_describe_serializes() {
        let g = graph(
            vec![node("a")],
            vec![
                Edge::direct(START, Target::node("a")),
                Edge::conditional(
                    "a",
                    Selector::new("finish", |_| Target::End),
                    vec![Target::End],
                ),
            ],
        );
        let json = serde_json::to_value(g.describe()).unwrap();
        assert_eq!(json["edges"][0]["type"], "direct");
        assert_eq!(json["edges"][1]["selector"], "finish");
        assert_eq!(json["edges"][1]["candidates"][0], END);
    }

    #[test]
    fn test_target_display() {
        assert_eq!(Target::node("trader").to_string(), "trader");
        assert_eq!(Target::End.to_string(), END);
        assert!(Target::End.is_end());
        assert_eq!(Target::node("x").as_node(), Some("x"));
    }
}
