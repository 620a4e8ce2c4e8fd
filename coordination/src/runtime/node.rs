//! Node bodies and the branch wrappers the compiled graph expects.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::catalog::{StepCatalog, StepId, StepKind};
use crate::config::LoopGuardConfig;
use crate::error::{CoordinationError, CoordinationResult};
use crate::state::{is_placeholder, placeholder_with_partial, RunState, StateUpdate};
use crate::topology::Graph;

/// The work a node performs. Reads the shared state and returns the fields
/// it changes.
pub trait NodeBody: Send + Sync {
    fn run(&self, state: &RunState) -> CoordinationResult<StateUpdate>;
}

impl<F> NodeBody for F
where
    F: Fn(&RunState) -> CoordinationResult<StateUpdate> + Send + Sync,
{
    fn run(&self, state: &RunState) -> CoordinationResult<StateUpdate> {
        self(state)
    }
}

/// Build a node body from a closure.
pub fn from_fn<F>(f: F) -> F
where
    F: Fn(&RunState) -> CoordinationResult<StateUpdate> + Send + Sync + 'static,
{
    f
}

/// Node that changes nothing. Used for the barrier.
#[derive(Debug, Default, Clone, Copy)]
pub struct PassThrough;

impl NodeBody for PassThrough {
    fn run(&self, _state: &RunState) -> CoordinationResult<StateUpdate> {
        Ok(StateUpdate::new())
    }
}

/// Tool-execution wrapper. Runs the tools and returns the branch's next
/// tool-call counter value as part of its update.
pub struct ToolNode {
    step: StepId,
    inner: Arc<dyn NodeBody>,
}

impl ToolNode {
    pub fn new(step: StepId, inner: Arc<dyn NodeBody>) -> Self {
        Self { step, inner }
    }
}

impl NodeBody for ToolNode {
    fn run(&self, state: &RunState) -> CoordinationResult<StateUpdate> {
        let mut update = self.inner.run(state)?;
        let next = state.tool_call_count(self.step).saturating_add(1);
        debug!(step = %self.step, tool_calls = next, "Tool cycle completed");
        update.tool_calls = Some((self.step, next));
        Ok(update)
    }
}

/// Branch terminator. Writes a placeholder when the branch is leaving
/// without a final report, so the barrier can still resolve.
#[derive(Debug, Clone)]
pub struct ClearNode {
    step: StepId,
    report_key: &'static str,
    ceiling: u32,
}

impl ClearNode {
    pub fn new(step: StepId, report_key: &'static str, ceiling: u32) -> Self {
        Self {
            step,
            report_key,
            ceiling,
        }
    }
}

impl NodeBody for ClearNode {
    fn run(&self, state: &RunState) -> CoordinationResult<StateUpdate> {
        let existing = state.report(self.report_key).unwrap_or("");
        if state.is_report_final(self.report_key) || is_placeholder(existing) {
            return Ok(StateUpdate::new());
        }

        let calls = state.tool_call_count(self.step);
        let reason = if calls >= self.ceiling {
            format!("tool-call ceiling of {} reached", self.ceiling)
        } else {
            "branch ended without a final report".to_string()
        };
        warn!(step = %self.step, tool_calls = calls, reason = %reason, "Writing placeholder report");

        let content = placeholder_with_partial(self.step, &reason, existing);
        Ok(StateUpdate::new()
            .with_report(self.report_key, content)
            .with_degraded(self.step))
    }
}

/// Node id to body.
#[derive(Clone, Default)]
pub struct NodeRegistry {
    bodies: HashMap<String, Arc<dyn NodeBody>>,
    catalog: StepCatalog,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-populated with the nodes the compiler generates itself:
    /// one [`ClearNode`] per branch and a pass-through barrier.
    pub fn for_graph(graph: &Graph, loop_guard: LoopGuardConfig) -> Self {
        let mut registry = Self::new();
        for node in graph.nodes() {
            match (node.kind, node.step) {
                (StepKind::Clear, Some(step)) => {
                    let key = registry.catalog.report_key(step);
                    registry.register(
                        node.id.clone(),
                        ClearNode::new(step, key, loop_guard.max_tool_calls),
                    );
                }
                (StepKind::Barrier, _) => {
                    registry.register(node.id.clone(), PassThrough);
                }
                _ => {}
            }
        }
        registry
    }

    pub fn register(&mut self, node: impl Into<String>, body: impl NodeBody + 'static) -> &mut Self {
        self.bodies.insert(node.into(), Arc::new(body));
        self
    }

    /// Register the analyst body for a branch.
    pub fn register_analyst(&mut self, step: StepId, body: impl NodeBody + 'static) -> &mut Self {
        let id = self.catalog.get(step).analyst_node;
        self.register(id, body)
    }

    /// Register the tool body for a branch, wrapped in a [`ToolNode`].
    pub fn register_tools(&mut self, step: StepId, body: impl NodeBody + 'static) -> &mut Self {
        let id = self.catalog.get(step).tool_node;
        let wrapped = ToolNode::new(step, Arc::new(body));
        self.register(id, wrapped)
    }

    /// Report field owned by a branch.
    pub fn report_key(&self, step: StepId) -> &'static str {
        self.catalog.report_key(step)
    }

    pub fn get(&self, node: &str) -> Option<&Arc<dyn NodeBody>> {
        self.bodies.get(node)
    }

    /// Fail unless every node of `graph` has a body.
    pub fn ensure_complete(&self, graph: &Graph) -> CoordinationResult<()> {
        match graph.nodes().iter().find(|n| !self.bodies.contains_key(&n.id)) {
            Some(node) => Err(CoordinationError::UnregisteredNode {
                node: node.id.clone(),
            }),
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for NodeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut ids: Vec<&str> = self.bodies.keys().map(String::as_str).collect();
        ids.sort_unstable();
        f.debug_struct("NodeRegistry").field("nodes", &ids).finish()
    }
}
