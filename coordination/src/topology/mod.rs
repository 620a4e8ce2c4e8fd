//! Pipeline topology
//!
//! The compiler builds a node/edge graph once per run. Guards and debate
//! controllers are wired in as conditional-edge selectors; the execution
//! substrate only needs to follow edges.

pub mod compiler;
pub mod graph;

pub use compiler::{
    TopologyCompiler, BARRIER_NODE, INFO_COLLECTOR_NODE, RESEARCH_MANAGER_NODE, TRADER_NODE,
};
pub use graph::{Edge, EdgeDescription, Graph, Node, Selector, Target, TopologyDescription, END, START};
