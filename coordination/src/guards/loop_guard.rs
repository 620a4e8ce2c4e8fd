//! Loop guard: bounds how often an analyst may re-enter its tool cycle.
//!
//! The retry loop is modelled as a small state machine instead of a graph
//! self-edge with a counter checked in several places:
//!
//! ```text
//!            pending tool call
//! Working ─────────────────────▶ Retrying ──┐
//!    │                              ▲        │ tools ran, analyst re-entered
//!    │                              └────────┘
//!    ├─ report final ─────────────▶ Done
//!    ├─ nothing pending ──────────▶ Done
//!    └─ tool_calls >= ceiling ────▶ ForcedDone   (checked first, from any state)
//! ```

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::catalog::StepId;
use crate::config::LoopGuardConfig;
use crate::state::{is_final_report, RunState};

/// Where an analyst branch is in its tool-call cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopPhase {
    /// Analyst is producing output.
    Working,
    /// Analyst asked for tools; route to the tool node and come back.
    Retrying,
    /// Analyst finished on its own.
    Done,
    /// Ceiling reached; the branch is forced forward.
    ForcedDone,
}

impl LoopPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::ForcedDone)
    }

    /// Routing decision for this phase.
    pub fn decision(self) -> LoopDecision {
        match self {
            Self::Retrying => LoopDecision::Retry,
            Self::Working | Self::Done | Self::ForcedDone => LoopDecision::Advance,
        }
    }

    /// Transition table.
    ///
    /// Terminal phases absorb every observation. The ceiling wins over a
    /// final report, which wins over a pending tool call.
    pub fn next(self, obs: &LoopObservation, ceiling: u32) -> LoopPhase {
        if self.is_terminal() {
            return self;
        }
        if obs.tool_calls >= ceiling {
            return Self::ForcedDone;
        }
        if obs.report_final {
            return Self::Done;
        }
        if obs.pending_tool_call {
            return Self::Retrying;
        }
        Self::Done
    }
}

impl std::fmt::Display for LoopPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Working => write!(f, "working"),
            Self::Retrying => write!(f, "retrying"),
            Self::Done => write!(f, "done"),
            Self::ForcedDone => write!(f, "forced_done"),
        }
    }
}

/// What the loop guard tells the router.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopDecision {
    /// Re-enter the tool cycle.
    Retry,
    /// Leave the cycle.
    Advance,
}

/// Inputs the guard reads after an analyst visit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoopObservation {
    pub tool_calls: u32,
    pub report_final: bool,
    pub pending_tool_call: bool,
}

/// Evaluation result: the phase reached and the routing decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoopVerdict {
    pub phase: LoopPhase,
    pub decision: LoopDecision,
}

/// Pure loop guard: a function of the branch's report, counter and last message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopGuard {
    config: LoopGuardConfig,
}

impl LoopGuard {
    pub fn new(config: LoopGuardConfig) -> Self {
        Self { config }
    }

    pub fn ceiling(&self) -> u32 {
        self.config.max_tool_calls
    }

    /// Observe a branch in the run state.
    pub fn observe(&self, state: &RunState, step: StepId, report_key: &str) -> LoopObservation {
        LoopObservation {
            tool_calls: state.tool_call_count(step),
            report_final: state
                .report(report_key)
                .is_some_and(|r| is_final_report(r, self.config.min_report_len)),
            pending_tool_call: state
                .last_message(step)
                .is_some_and(|m| m.requests_tools()),
        }
    }

    /// Evaluate an observation from the `Working` phase.
    pub fn evaluate(&self, obs: &LoopObservation) -> LoopVerdict {
        let phase = LoopPhase::Working.next(obs, self.config.max_tool_calls);
        LoopVerdict {
            phase,
            decision: phase.decision(),
        }
    }

    /// Decide whether the analyst for `step` retries or advances.
    pub fn should_continue(&self, state: &RunState, step: StepId, report_key: &str) -> LoopDecision {
        let obs = self.observe(state, step, report_key);
        let verdict = self.evaluate(&obs);
        match verdict.phase {
            LoopPhase::ForcedDone => warn!(
                step = %step,
                tool_calls = obs.tool_calls,
                ceiling = self.config.max_tool_calls,
                "Tool-call ceiling reached, forcing branch to advance"
            ),
            phase => debug!(step = %step, tool_calls = obs.tool_calls, %phase, "Loop guard evaluated"),
        }
        verdict.decision
    }
}

impl Default for LoopGuard {
    fn default() -> Self {
        Self::new(LoopGuardConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::StepCatalog;
    use crate::config::PhaseFlags;
    use crate::state::{AgentMessage, StateUpdate};

    fn obs(tool_calls: u32, report_final: bool, pending: bool) -> LoopObservation {
        LoopObservation {
            tool_calls,
            report_final,
            pending_tool_call: pending,
        }
    }

    fn run_state() -> RunState {
        RunState::new(
            "AAPL",
            vec![StepId::Market],
            PhaseFlags::default(),
            &StepCatalog::builtin(),
            100,
        )
    }

    fn tool_request() -> AgentMessage {
        AgentMessage::text("market_analyst", "").with_tool_calls(vec!["get_price_history".into()])
    }

    #[test]
    fn test_transition_table() {
        let w = LoopPhase::Working;
        assert_eq!(w.next(&obs(0, false, true), 3), LoopPhase::Retrying);
        assert_eq!(w.next(&obs(0, true, true), 3), LoopPhase::Done);
        assert_eq!(w.next(&obs(0, false, false), 3), LoopPhase::Done);
        assert_eq!(w.next(&obs(3, false, true), 3), LoopPhase::ForcedDone);
        assert_eq!(w.next(&obs(3, true, false), 3), LoopPhase::ForcedDone);
        assert_eq!(LoopPhase::Retrying.next(&obs(1, false, true), 3), LoopPhase::Retrying);
    }

    #[test]
    fn test_terminal_phases_absorb() {
        for phase in [LoopPhase::Done, LoopPhase::ForcedDone] {
            assert_eq!(phase.next(&obs(0, false, true), 3), phase);
            assert_eq!(phase.decision(), LoopDecision::Advance);
        }
    }

    #[test]
    fn test_ceiling_forces_advance_on_fourth_visit() {
        let guard = LoopGuard::default();
        let mut state = run_state();
        let mut decisions = Vec::new();

        // Four visits, the analyst always asks for more tools; the tool node
        // bumps the counter between visits: 0, 1, 2, 3.
        for visit in 0..4u32 {
            state.apply(StateUpdate::new().with_message(StepId::Market, tool_request()));
            decisions.push(guard.should_continue(&state, StepId::Market, "market_report"));
            state.apply(StateUpdate::new().with_tool_calls(StepId::Market, visit + 1));
        }

        assert_eq!(
            decisions,
            vec![
                LoopDecision::Retry,
                LoopDecision::Retry,
                LoopDecision::Retry,
                LoopDecision::Advance
            ]
        );
    }

    #[test]
    fn test_final_report_exits_early() {
        let guard = LoopGuard::default();
        let mut state = run_state();
        state.apply(
            StateUpdate::new()
                .with_report("market_report", "m".repeat(150))
                .with_message(StepId::Market, tool_request()),
        );
        assert_eq!(
            guard.should_continue(&state, StepId::Market, "market_report"),
            LoopDecision::Advance
        );
    }

    #[test]
    fn test_short_report_with_pending_tools_retries() {
        let guard = LoopGuard::default();
        let mut state = run_state();
        state.apply(
            StateUpdate::new()
                .with_report("market_report", "draft")
                .with_message(StepId::Market, tool_request()),
        );
        assert_eq!(
            guard.should_continue(&state, StepId::Market, "market_report"),
            LoopDecision::Retry
        );
    }

    #[test]
    fn test_no_message_advances() {
        let guard = LoopGuard::default();
        let state = run_state();
        assert_eq!(
            guard.should_continue(&state, StepId::Market, "market_report"),
            LoopDecision::Advance
        );
    }

    #[test]
    fn test_termination_for_any_ceiling() {
        // Whatever the analyst does, the guard advances once the counter
        // reaches the ceiling.
        for ceiling in 1..=6 {
            let guard = LoopGuard::new(LoopGuardConfig {
                max_tool_calls: ceiling,
                min_report_len: 100,
            });
            let verdict = guard.evaluate(&obs(ceiling, false, true));
            assert_eq!(verdict.phase, LoopPhase::ForcedDone);
            assert_eq!(verdict.decision, LoopDecision::Advance);
        }
    }

    #[test]
    fn test_phase_display() {
        assert_eq!(LoopPhase::ForcedDone.to_string(), "forced_done");
        assert_eq!(LoopPhase::Retrying.to_string(), "retrying");
    }
}
