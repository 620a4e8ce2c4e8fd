//! Shared run state and the explicit update type nodes return.
//!
//! Nodes never mutate [`RunState`] directly. They return a [`StateUpdate`]
//! and the substrate applies it, which is where the run-level invariants are
//! enforced: report keys are fixed at creation, final reports are never
//! overwritten, and counters only move forward.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::report::{is_final_report, is_placeholder};
use crate::catalog::{StepCatalog, StepId};
use crate::config::PhaseFlags;
use crate::debate::state::{DebateState, DebateTurn, RiskDebateState, RiskTurn};

/// Report written by the per-index info collector.
pub const INDEX_INFO_KEY: &str = "index_info";
/// Report written by the research manager.
pub const INVESTMENT_PLAN_KEY: &str = "investment_plan";
/// Report written by the trader.
pub const TRADER_PLAN_KEY: &str = "trader_investment_plan";
/// Report written by the final risk judge.
pub const FINAL_DECISION_KEY: &str = "final_trade_decision";

/// Last message an analyst produced.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentMessage {
    pub sender: String,
    pub content: String,
    /// Tool invocations the message is still waiting on.
    #[serde(default)]
    pub pending_tool_calls: Vec<String>,
}

impl AgentMessage {
    pub fn text(sender: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            sender: sender.into(),
            content: content.into(),
            pending_tool_calls: Vec::new(),
        }
    }

    pub fn with_tool_calls(mut self, calls: Vec<String>) -> Self {
        self.pending_tool_calls = calls;
        self
    }

    pub fn requests_tools(&self) -> bool {
        !self.pending_tool_calls.is_empty()
    }
}

/// Shared mutable state threaded through every node of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunState {
    /// Ticker or index symbol under analysis.
    pub entity: String,
    /// Report name to content. Keys are fixed when the run starts.
    pub reports: BTreeMap<String, String>,
    /// Tool-call cycles consumed per analyst branch.
    pub tool_calls: BTreeMap<StepId, u32>,
    /// Latest message per analyst branch.
    pub last_messages: BTreeMap<StepId, AgentMessage>,
    pub debate: DebateState,
    pub risk: RiskDebateState,
    pub phases: PhaseFlags,
    pub selected_steps: Vec<StepId>,
    /// Branches whose report is a placeholder.
    pub degraded: BTreeSet<StepId>,
    /// Analyst report key to owning branch.
    #[serde(default)]
    pub report_owners: BTreeMap<String, StepId>,
    /// Length at which a report becomes final.
    pub min_report_len: usize,
}

impl RunState {
    /// Create the state for a run, registering one empty report per selected
    /// step plus the downstream reports the enabled phases write.
    pub fn new(
        entity: impl Into<String>,
        selected_steps: Vec<StepId>,
        phases: PhaseFlags,
        catalog: &StepCatalog,
        min_report_len: usize,
    ) -> Self {
        let mut reports = BTreeMap::new();
        let mut report_owners = BTreeMap::new();
        for step in &selected_steps {
            let key = catalog.report_key(*step).to_string();
            reports.insert(key.clone(), String::new());
            report_owners.insert(key, *step);
            if step.shape().has_info_collector() {
                reports.insert(INDEX_INFO_KEY.to_string(), String::new());
            }
        }
        for key in [INVESTMENT_PLAN_KEY, TRADER_PLAN_KEY, FINAL_DECISION_KEY] {
            reports.insert(key.to_string(), String::new());
        }

        Self {
            entity: entity.into(),
            reports,
            tool_calls: selected_steps.iter().map(|s| (*s, 0)).collect(),
            last_messages: BTreeMap::new(),
            debate: DebateState::default(),
            risk: RiskDebateState::default(),
            phases,
            selected_steps,
            degraded: BTreeSet::new(),
            report_owners,
            min_report_len,
        }
    }

    /// Report content, if the key exists.
    pub fn report(&self, key: &str) -> Option<&str> {
        self.reports.get(key).map(String::as_str)
    }

    /// Tool-call cycles consumed by a branch.
    pub fn tool_call_count(&self, step: StepId) -> u32 {
        self.tool_calls.get(&step).copied().unwrap_or(0)
    }

    pub fn last_message(&self, step: StepId) -> Option<&AgentMessage> {
        self.last_messages.get(&step)
    }

    /// Whether the report under `key` is final.
    pub fn is_report_final(&self, key: &str) -> bool {
        self.report(key)
            .is_some_and(|r| is_final_report(r, self.min_report_len))
    }

    /// Apply a node's update.
    pub fn apply(&mut self, update: StateUpdate) {
        for (key, content) in update.reports {
            let min_len = self.min_report_len;
            match self.reports.get_mut(&key) {
                None => {
                    warn!(report = %key, "Ignoring write to unregistered report");
                }
                Some(existing) if is_final_report(existing, min_len) => {
                    debug!(report = %key, "Report already final, keeping existing content");
                }
                Some(existing) => {
                    if !is_placeholder(&content) {
                        if let Some(step) = self.report_owners.get(&key) {
                            self.degraded.remove(step);
                        }
                    }
                    *existing = content;
                }
            }
        }

        if let Some((step, message)) = update.message {
            self.last_messages.insert(step, message);
        }

        if let Some((step, count)) = update.tool_calls {
            let current = self.tool_calls.entry(step).or_insert(0);
            if count < *current {
                warn!(step = %step, current = *current, proposed = count, "Ignoring counter decrease");
            } else {
                *current = count;
            }
        }

        if let Some(turn) = update.debate_turn {
            self.debate.record(&turn);
        }
        if let Some(turn) = update.risk_turn {
            self.risk.record(&turn);
        }

        self.degraded.extend(update.degraded);
    }
}

/// Partial state update returned at the node-invocation boundary.
///
/// The new tool-call counter value is an explicit field rather than a
/// side effect, so guards can stay pure functions of the applied state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StateUpdate {
    pub reports: Vec<(String, String)>,
    pub message: Option<(StepId, AgentMessage)>,
    pub tool_calls: Option<(StepId, u32)>,
    pub debate_turn: Option<DebateTurn>,
    pub risk_turn: Option<RiskTurn>,
    pub degraded: Vec<StepId>,
}

impl StateUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_report(mut self, key: impl Into<String>, content: impl Into<String>) -> Self {
        self.reports.push((key.into(), content.into()));
        self
    }

    pub fn with_message(mut self, step: StepId, message: AgentMessage) -> Self {
        self.message = Some((step, message));
        self
    }

    pub fn with_tool_calls(mut self, step: StepId, count: u32) -> Self {
        self.tool_calls = Some((step, count));
        self
    }

    pub fn with_debate_turn(mut self, turn: DebateTurn) -> Self {
        self.debate_turn = Some(turn);
        self
    }

    pub fn with_risk_turn(mut self, turn: RiskTurn) -> Self {
        self.risk_turn = Some(turn);
        self
    }

    pub fn with_degraded(mut self, step: StepId) -> Self {
        self.degraded.push(step);
        self
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}
