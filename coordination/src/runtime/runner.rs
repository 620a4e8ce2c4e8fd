//! Reference sequential runner.
//!
//! Walks a compiled graph one node at a time from a FIFO frontier, so
//! fan-out branches interleave the way a concurrent substrate would
//! schedule them. A selector returning END terminates only the path it was
//! evaluated on; the run is over when the frontier is empty.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::node::NodeRegistry;
use crate::error::{CoordinationError, CoordinationResult};
use crate::state::{placeholder_with_partial, RunState, StateUpdate};
use crate::topology::{Graph, Target};

/// Default cap on node visits per run.
pub const DEFAULT_MAX_VISITS: usize = 1_000;

/// Final state and the order nodes were visited in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunOutcome {
    pub state: RunState,
    pub trace: Vec<String>,
    /// Paths that ended on a selector returning END.
    pub ended_paths: usize,
}

impl RunOutcome {
    pub fn visit_count(&self, node: &str) -> usize {
        self.trace.iter().filter(|id| *id == node).count()
    }
}

/// Single-threaded graph walker.
#[derive(Debug, Clone, Copy)]
pub struct SequentialRunner {
    max_visits: usize,
}

impl SequentialRunner {
    pub fn new(max_visits: usize) -> Self {
        Self { max_visits }
    }

    /// Run `graph` from `state` until every path has ended.
    ///
    /// A failing analyst or tool body does not stop the run: its branch gets
    /// a placeholder report and jumps to its clear node. Failures anywhere
    /// else are returned as [`CoordinationError::NodeFailed`].
    pub fn run(
        &self,
        graph: &Graph,
        registry: &NodeRegistry,
        mut state: RunState,
    ) -> CoordinationResult<RunOutcome> {
        registry.ensure_complete(graph)?;

        let mut frontier: VecDeque<String> = graph
            .entry_targets()
            .into_iter()
            .filter_map(|t| t.as_node().map(str::to_string))
            .collect();
        let mut trace = Vec::new();
        let mut ended_paths = 0;

        info!(
            entity = %state.entity,
            entry = frontier.len(),
            "Run started"
        );

        while let Some(id) = frontier.pop_front() {
            if trace.len() >= self.max_visits {
                return Err(CoordinationError::RunawayExecution {
                    visits: trace.len(),
                });
            }
            trace.push(id.clone());

            let node = graph
                .node(&id)
                .ok_or_else(|| CoordinationError::UnregisteredNode { node: id.clone() })?;
            let body = registry
                .get(&id)
                .ok_or_else(|| CoordinationError::UnregisteredNode { node: id.clone() })?;

            debug!(node = %id, kind = %node.kind, "Visiting node");
            match body.run(&state) {
                Ok(update) => state.apply(update),
                Err(err) => match (node.step, graph.branch_exit(&id)) {
                    (Some(step), Some(clear)) => {
                        warn!(node = %id, step = %step, error = %err, "Branch failed, closing it");
                        let key = registry.report_key(step);
                        let partial = state.report(key).unwrap_or("");
                        let content = placeholder_with_partial(step, &err.to_string(), partial);
                        state.apply(
                            StateUpdate::new()
                                .with_report(key, content)
                                .with_degraded(step),
                        );
                        frontier.push_back(clear);
                        continue;
                    }
                    _ => {
                        return Err(match err {
                            e @ CoordinationError::NodeFailed { .. } => e,
                            other => CoordinationError::node_failed(id, other.to_string()),
                        });
                    }
                },
            }

            for edge in graph.outgoing(&id) {
                let target = edge.resolve(&state);
                if !edge.targets().contains(&target) {
                    return Err(CoordinationError::topology(format!(
                        "selector on '{}' returned undeclared target '{}'",
                        id, target
                    )));
                }
                match target {
                    Target::Node(next) => frontier.push_back(next),
                    Target::End => {
                        ended_paths += 1;
                        debug!(node = %id, "Path ended");
                    }
                }
            }
        }

        info!(
            entity = %state.entity,
            visits = trace.len(),
            degraded = state.degraded.len(),
            "Run finished"
        );

        Ok(RunOutcome {
            state,
            trace,
            ended_paths,
        })
    }
}

impl Default for SequentialRunner {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_VISITS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{PipelineShape, StepId};
    use crate::config::{PhaseFlags, PipelineConfig};
    use crate::context::RunContext;
    use crate::runtime::node::from_fn;
    use crate::state::{is_placeholder, AgentMessage};
    use crate::topology::TopologyCompiler;

    fn compile(config: PipelineConfig) -> (TopologyCompiler, Graph) {
        let compiler = TopologyCompiler::new(RunContext::new(config));
        let graph = compiler
            .compile(&["market"], PipelineShape::PerEntity, PhaseFlags::analysts_only())
            .unwrap();
        (compiler, graph)
    }

    fn greedy_analyst(_state: &RunState) -> CoordinationResult<StateUpdate> {
        Ok(StateUpdate::new().with_message(
            StepId::Market,
            AgentMessage::text("market_analyst", "").with_tool_calls(vec!["quotes".into()]),
        ))
    }

    #[test]
    fn test_ceiling_closes_greedy_branch() {
        let (compiler, graph) = compile(PipelineConfig::default());
        let config = compiler.context().config.clone();
        let mut registry = NodeRegistry::for_graph(&graph, config.loop_guard);
        registry
            .register_analyst(StepId::Market, from_fn(greedy_analyst))
            .register_tools(StepId::Market, from_fn(|_| Ok(StateUpdate::new())));

        let outcome = SequentialRunner::default()
            .run(&graph, &registry, compiler.initial_state(&graph, "AAPL"))
            .unwrap();

        assert_eq!(outcome.visit_count("market_analyst"), 4);
        assert_eq!(outcome.visit_count("tools_market"), 3);
        assert!(is_placeholder(outcome.state.report("market_report").unwrap()));
        assert!(outcome.state.degraded.contains(&StepId::Market));
        // Barrier released straight to END.
        assert_eq!(outcome.ended_paths, 1);
    }

    #[test]
    fn test_visit_budget_stops_runaway() {
        let mut config = PipelineConfig::default();
        config.loop_guard.max_tool_calls = 10_000;
        let (compiler, graph) = compile(config.clone());
        let mut registry = NodeRegistry::for_graph(&graph, config.loop_guard);
        registry
            .register_analyst(StepId::Market, from_fn(greedy_analyst))
            .register_tools(StepId::Market, from_fn(|_| Ok(StateUpdate::new())));

        let err = SequentialRunner::new(25)
            .run(&graph, &registry, compiler.initial_state(&graph, "AAPL"))
            .unwrap_err();
        assert!(matches!(err, CoordinationError::RunawayExecution { visits: 25 }));
    }

    #[test]
    fn test_failing_analyst_degrades_branch() {
        let (compiler, graph) = compile(PipelineConfig::default());
        let mut registry = NodeRegistry::for_graph(&graph, Default::default());
        registry
            .register_analyst(
                StepId::Market,
                from_fn(|_| Err(CoordinationError::node_failed("market_analyst", "quota exhausted"))),
            )
            .register_tools(StepId::Market, from_fn(|_| Ok(StateUpdate::new())));

        let outcome = SequentialRunner::default()
            .run(&graph, &registry, compiler.initial_state(&graph, "AAPL"))
            .unwrap();
        let report = outcome.state.report("market_report").unwrap();
        assert!(is_placeholder(report));
        assert!(report.contains("quota exhausted"));
        assert_eq!(outcome.trace, vec!["market_analyst", "clear_market", "analyst_barrier"]);
    }

    #[test]
    fn test_failing_tool_cycle_keeps_partial_report() {
        let (compiler, graph) = compile(PipelineConfig::default());
        let mut registry = NodeRegistry::for_graph(&graph, Default::default());
        registry
            .register_analyst(
                StepId::Market,
                from_fn(|s| {
                    if s.tool_call_count(StepId::Market) == 0 {
                        Ok(StateUpdate::new()
                            .with_message(
                                StepId::Market,
                                AgentMessage::text("market_analyst", "")
                                    .with_tool_calls(vec!["quotes".into()]),
                            )
                            .with_report("market_report", "RSI at 71, volume rising"))
                    } else {
                        Err(CoordinationError::node_failed("market_analyst", "quota exhausted"))
                    }
                }),
            )
            .register_tools(StepId::Market, from_fn(|_| Ok(StateUpdate::new())));

        let outcome = SequentialRunner::default()
            .run(&graph, &registry, compiler.initial_state(&graph, "AAPL"))
            .unwrap();
        let report = outcome.state.report("market_report").unwrap();
        assert!(is_placeholder(report));
        assert!(report.contains("quota exhausted"));
        assert!(report.ends_with("RSI at 71, volume rising"));
        assert!(outcome.state.degraded.contains(&StepId::Market));
    }

    #[test]
    fn test_missing_body_fails_before_running() {
        let (compiler, graph) = compile(PipelineConfig::default());
        let registry = NodeRegistry::for_graph(&graph, Default::default());
        let err = SequentialRunner::default()
            .run(&graph, &registry, compiler.initial_state(&graph, "AAPL"))
            .unwrap_err();
        assert!(matches!(err, CoordinationError::UnregisteredNode { .. }));
    }
}
