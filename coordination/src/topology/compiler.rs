//! Topology compiler: turns a step selection and phase flags into the graph
//! the execution substrate runs.
//!
//! ```text
//! per_entity:  START ─┬▶ market_analyst ⇄ tools_market ─▶ clear_market ─┐
//!                     ├▶ news_analyst   ⇄ tools_news   ─▶ clear_news   ─┼▶ analyst_barrier
//!                     └▶ …                                              ─┘        │
//!                                                         wait ─▶ END ◀───────────┤
//!                                                                                 ▼
//!          bull ⇄ bear ─▶ research_manager ─▶ trader ─▶ risky ─▶ safe ─▶ neutral ─▶ risk_judge ─▶ END
//!
//! per_index:   START ─▶ index_info_collector ─┬▶ macro_analyst …   (then as above)
//! ```
//!
//! Disabled phases are left out of the graph entirely; the stage before
//! them routes to the next enabled stage or to END.

use std::sync::Arc;

use tracing::{debug, info};

use super::graph::{Edge, Graph, Node, Selector, Target, START};
use crate::catalog::{PipelineShape, StepCatalog, StepKind};
use crate::config::PhaseFlags;
use crate::context::RunContext;
use crate::debate::{
    DebateController, DebateRoute, RiskDiscussionController, RiskRoute, BEAR_NODE, BULL_NODE,
};
use crate::error::CoordinationResult;
use crate::guards::{BarrierDecision, BarrierSynchronizer, LoopDecision, LoopGuard};
use crate::state::RunState;

/// Per-index identifier normalisation node.
pub const INFO_COLLECTOR_NODE: &str = "index_info_collector";
/// Join over the analyst fan-out.
pub const BARRIER_NODE: &str = "analyst_barrier";
/// Debate summary node.
pub const RESEARCH_MANAGER_NODE: &str = "research_manager";
/// Trader plan node.
pub const TRADER_NODE: &str = "trader";

/// Compiles graphs for one run.
#[derive(Debug, Clone)]
pub struct TopologyCompiler {
    ctx: RunContext,
    catalog: StepCatalog,
}

impl TopologyCompiler {
    pub fn new(ctx: RunContext) -> Self {
        Self {
            ctx,
            catalog: StepCatalog::builtin(),
        }
    }

    pub fn context(&self) -> &RunContext {
        &self.ctx
    }

    pub fn catalog(&self) -> &StepCatalog {
        &self.catalog
    }

    /// Compile the selection, shape and phases from the run configuration.
    pub fn compile_configured(&self) -> CoordinationResult<Graph> {
        let config = &self.ctx.config;
        self.compile(&config.requested_steps(), config.shape, config.phases)
    }

    /// Compile a graph.
    ///
    /// Fails before building anything when the run configuration is invalid
    /// for `phases` (including zero rounds for an enabled discussion), or when
    /// the selection is empty or names a step the shape does not offer. The
    /// returned graph has been validated and is meant for a single run: its
    /// barrier fires once.
    pub fn compile<S: AsRef<str>>(
        &self,
        requested: &[S],
        shape: PipelineShape,
        phases: PhaseFlags,
    ) -> CoordinationResult<Graph> {
        let config = &self.ctx.config;
        config.validate_for(phases)?;
        let steps = self.catalog.resolve_selection(requested, shape)?;

        let mut nodes = Vec::new();
        let mut edges = Vec::new();

        let fan_out_from = if shape.has_info_collector() {
            nodes.push(Node::new(
                INFO_COLLECTOR_NODE,
                StepKind::Collector,
                "normalise the requested index identifier",
            ));
            edges.push(Edge::direct(START, Target::node(INFO_COLLECTOR_NODE)));
            INFO_COLLECTOR_NODE
        } else {
            START
        };

        let guard = LoopGuard::new(config.loop_guard);
        for &step in &steps {
            let d = self.catalog.get(step);
            nodes.push(Node::new(d.analyst_node, StepKind::Analyst, d.description).for_step(step));
            nodes.push(Node::new(d.tool_node, StepKind::Tool, "execute requested tool calls").for_step(step));
            nodes.push(Node::new(d.clear_node, StepKind::Clear, "close the branch").for_step(step));

            edges.push(Edge::direct(fan_out_from, Target::node(d.analyst_node)));

            let retry = Target::node(d.tool_node);
            let advance = Target::node(d.clear_node);
            let candidates = vec![retry.clone(), advance.clone()];
            let report_key = d.report_key;
            let selector = Selector::new(format!("loop_guard:{}", step), move |state: &RunState| {
                match guard.should_continue(state, step, report_key) {
                    LoopDecision::Retry => retry.clone(),
                    LoopDecision::Advance => advance.clone(),
                }
            });
            edges.push(Edge::conditional(d.analyst_node, selector, candidates));
            edges.push(Edge::direct(d.tool_node, Target::node(d.analyst_node)));
            edges.push(Edge::direct(d.clear_node, Target::node(BARRIER_NODE)));
        }

        // Downstream targets, resolved back to front so a disabled stage
        // falls through to whatever comes after it.
        let risk_entry = if phases.risk {
            Target::node(RiskRoute::standard().participants[0].node.clone())
        } else {
            Target::End
        };
        let trader_entry = if phases.trader {
            Target::node(TRADER_NODE)
        } else {
            risk_entry.clone()
        };
        let debate_entry = if phases.debate {
            Target::node(BULL_NODE)
        } else {
            trader_entry.clone()
        };

        nodes.push(Node::new(BARRIER_NODE, StepKind::Barrier, "join the analyst branches"));
        let barrier = Arc::new(BarrierSynchronizer::new(
            &steps,
            &self.catalog,
            config.barrier_min_report_len,
        ));
        let proceed = debate_entry.clone();
        edges.push(Edge::conditional(
            BARRIER_NODE,
            Selector::new("barrier", move |state: &RunState| {
                match barrier.should_continue(state) {
                    BarrierDecision::Continue => proceed.clone(),
                    BarrierDecision::Wait => Target::End,
                }
            }),
            vec![debate_entry, Target::End],
        ));

        if phases.debate {
            let controller = Arc::new(DebateController::new(
                DebateRoute::bull_bear(Target::node(RESEARCH_MANAGER_NODE)),
                config.rounds.debate_rounds,
            ));
            nodes.push(Node::new(BULL_NODE, StepKind::Debate, "argue the bullish case"));
            nodes.push(Node::new(BEAR_NODE, StepKind::Debate, "argue the bearish case"));
            nodes.push(Node::new(
                RESEARCH_MANAGER_NODE,
                StepKind::Manager,
                "summarise the debate into an investment plan",
            ));
            for speaker in [BULL_NODE, BEAR_NODE] {
                let controller = Arc::clone(&controller);
                let candidates = controller.candidates();
                edges.push(Edge::conditional(
                    speaker,
                    Selector::new("debate", move |state: &RunState| controller.next(&state.debate)),
                    candidates,
                ));
            }
            edges.push(Edge::direct(RESEARCH_MANAGER_NODE, trader_entry.clone()));
        }

        if phases.trader {
            nodes.push(Node::new(TRADER_NODE, StepKind::Trader, "turn the plan into a trade proposal"));
            edges.push(Edge::direct(TRADER_NODE, risk_entry.clone()));
        }

        if phases.risk {
            let route = RiskRoute::standard();
            let judge = route.judge.clone();
            let controller = Arc::new(RiskDiscussionController::new(
                route.clone(),
                config.rounds.risk_rounds,
            ));
            for participant in &route.participants {
                nodes.push(Node::new(
                    participant.node.clone(),
                    StepKind::Risk,
                    format!("{} risk view", participant.tag.to_lowercase()),
                ));
                let controller = Arc::clone(&controller);
                let candidates = controller.candidates();
                edges.push(Edge::conditional(
                    participant.node.clone(),
                    Selector::new("risk_discussion", move |state: &RunState| {
                        controller.next(&state.risk)
                    }),
                    candidates,
                ));
            }
            if let Some(judge_id) = judge.as_node() {
                nodes.push(Node::new(judge_id, StepKind::Manager, "issue the final trade decision"));
                edges.push(Edge::direct(judge_id, Target::End));
            }
        }

        let graph = Graph {
            shape,
            steps,
            phases,
            nodes,
            edges,
        };
        graph.validate()?;

        info!(
            run_id = %self.ctx.run_id,
            shape = %shape,
            steps = graph.steps.len(),
            nodes = graph.nodes.len(),
            edges = graph.edges.len(),
            phases = %phases,
            "Topology compiled"
        );
        debug!(nodes = ?graph.nodes.iter().map(|n| n.id.as_str()).collect::<Vec<_>>(), "Compiled nodes");

        Ok(graph)
    }

    /// Fresh run state matching a compiled graph.
    pub fn initial_state(&self, graph: &Graph, entity: impl Into<String>) -> RunState {
        RunState::new(
            entity,
            graph.steps().to_vec(),
            graph.phases(),
            &self.catalog,
            self.ctx.config.loop_guard.min_report_len,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::StepId;
    use crate::config::PipelineConfig;
    use crate::debate::{RISKY_NODE, RISK_JUDGE_NODE};
    use crate::error::CoordinationError;
    use crate::state::{AgentMessage, StateUpdate};

    fn compiler() -> TopologyCompiler {
        TopologyCompiler::new(RunContext::new(PipelineConfig::default()))
    }

    fn ids(graph: &Graph) -> Vec<&str> {
        graph.nodes().iter().map(|n| n.id.as_str()).collect()
    }

    fn targets_from(graph: &Graph, from: &str) -> Vec<Target> {
        graph
            .outgoing(from)
            .flat_map(|e| e.targets().to_vec())
            .collect()
    }

    #[test]
    fn test_per_entity_full_pipeline() {
        let graph = compiler()
            .compile(&["market", "news"], PipelineShape::PerEntity, PhaseFlags::default())
            .unwrap();
        let ids = ids(&graph);
        for id in [
            "market_analyst",
            "tools_market",
            "clear_market",
            "news_analyst",
            BARRIER_NODE,
            BULL_NODE,
            BEAR_NODE,
            RESEARCH_MANAGER_NODE,
            TRADER_NODE,
            RISKY_NODE,
            RISK_JUDGE_NODE,
        ] {
            assert!(ids.contains(&id), "missing {}", id);
        }
        assert_eq!(
            graph.entry_targets(),
            vec![Target::node("market_analyst"), Target::node("news_analyst")]
        );
    }

    #[test]
    fn test_absent_steps_not_instantiated() {
        let graph = compiler()
            .compile(&["market"], PipelineShape::PerEntity, PhaseFlags::default())
            .unwrap();
        assert!(!graph.contains("social_analyst"));
        assert!(!graph.contains("tools_news"));
        assert_eq!(graph.steps(), &[StepId::Market]);
    }

    #[test]
    fn test_empty_selection_rejected() {
        let empty: [&str; 0] = [];
        let err = compiler()
            .compile(&empty, PipelineShape::PerEntity, PhaseFlags::default())
            .unwrap_err();
        assert!(matches!(err, CoordinationError::EmptySelection));
    }

    #[test]
    fn test_unknown_step_rejected() {
        let err = compiler()
            .compile(&["market", "crypto"], PipelineShape::PerEntity, PhaseFlags::default())
            .unwrap_err();
        assert!(matches!(err, CoordinationError::UnknownStep { .. }));
    }

    #[test]
    fn test_per_index_runs_collector_first() {
        let graph = compiler()
            .compile(&["macro", "news"], PipelineShape::PerIndex, PhaseFlags::default())
            .unwrap();
        assert_eq!(graph.entry_targets(), vec![Target::node(INFO_COLLECTOR_NODE)]);
        assert_eq!(
            targets_from(&graph, INFO_COLLECTOR_NODE),
            vec![Target::node("macro_analyst"), Target::node("index_news_analyst")]
        );
        assert_eq!(graph.steps(), &[StepId::Macro, StepId::IndexNews]);
    }

    #[test]
    fn test_disabled_phases_are_omitted() {
        let phases = PhaseFlags {
            debate: false,
            risk: true,
            trader: false,
        };
        let graph = compiler()
            .compile(&["market"], PipelineShape::PerEntity, phases)
            .unwrap();
        assert!(!graph.contains(BULL_NODE));
        assert!(!graph.contains(RESEARCH_MANAGER_NODE));
        assert!(!graph.contains(TRADER_NODE));
        assert_eq!(
            targets_from(&graph, BARRIER_NODE),
            vec![Target::node(RISKY_NODE), Target::End]
        );
    }

    #[test]
    fn test_analysts_only_barrier_goes_to_end() {
        let graph = compiler()
            .compile(&["market"], PipelineShape::PerEntity, PhaseFlags::analysts_only())
            .unwrap();
        assert_eq!(targets_from(&graph, BARRIER_NODE), vec![Target::End]);
    }

    #[test]
    fn test_research_manager_routes_to_next_enabled_stage() {
        let phases = PhaseFlags {
            debate: true,
            risk: false,
            trader: false,
        };
        let graph = compiler()
            .compile(&["market"], PipelineShape::PerEntity, phases)
            .unwrap();
        assert_eq!(
            targets_from(&graph, RESEARCH_MANAGER_NODE),
            vec![Target::End]
        );
    }

    #[test]
    fn test_every_phase_combination_validates() {
        for bits in 0..8u8 {
            let phases = PhaseFlags {
                debate: bits & 1 != 0,
                risk: bits & 2 != 0,
                trader: bits & 4 != 0,
            };
            compiler()
                .compile(&["market", "social"], PipelineShape::PerEntity, phases)
                .unwrap();
            compiler()
                .compile(&["macro"], PipelineShape::PerIndex, phases)
                .unwrap();
        }
    }

    #[test]
    fn test_loop_guard_selector_routes_branch() {
        let c = compiler();
        let graph = c
            .compile(&["market"], PipelineShape::PerEntity, PhaseFlags::default())
            .unwrap();
        let mut state = c.initial_state(&graph, "AAPL");
        let edge = graph.outgoing("market_analyst").next().unwrap();

        state.apply(StateUpdate::new().with_message(
            StepId::Market,
            AgentMessage::text("market_analyst", "").with_tool_calls(vec!["quotes".into()]),
        ));
        assert_eq!(edge.resolve(&state), Target::node("tools_market"));

        state.apply(StateUpdate::new().with_report("market_report", "x".repeat(200)));
        assert_eq!(edge.resolve(&state), Target::node("clear_market"));
    }

    #[test]
    fn test_compile_configured_uses_config() {
        let config = PipelineConfig {
            steps: Some(vec!["fundamentals".into()]),
            phases: PhaseFlags::analysts_only(),
            ..Default::default()
        };
        let graph = TopologyCompiler::new(RunContext::new(config))
            .compile_configured()
            .unwrap();
        assert_eq!(graph.steps(), &[StepId::Fundamentals]);
        assert_eq!(graph.nodes().len(), 4);
    }

    #[test]
    fn test_compile_configured_rejects_explicit_empty_steps() {
        let config = PipelineConfig::from_toml_str("steps = []\n").unwrap();
        let err = TopologyCompiler::new(RunContext::new(config))
            .compile_configured()
            .unwrap_err();
        assert!(matches!(err, CoordinationError::EmptySelection));
    }

    #[test]
    fn test_zero_rounds_rejected_for_enabled_discussions() {
        let mut config = PipelineConfig::default();
        config.rounds.debate_rounds = 0;
        config.rounds.risk_rounds = 0;
        let c = TopologyCompiler::new(RunContext::new(config));

        let err = c
            .compile(&["market"], PipelineShape::PerEntity, PhaseFlags::default())
            .unwrap_err();
        assert!(err.is_configuration_error());

        // Zero rounds are fine when the discussions are not compiled in.
        let graph = c
            .compile(&["market"], PipelineShape::PerEntity, PhaseFlags::analysts_only())
            .unwrap();
        assert!(!graph.contains(BULL_NODE));
        assert!(!graph.contains(RISKY_NODE));
    }
}
