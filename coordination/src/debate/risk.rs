//! Three-way risk discussion controller.
//!
//! Fixed speaking order 1 → 2 → 3 → 1 for `max_rounds` full cycles, then an
//! unconditional hand-off to the final judge.

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::controller::Speaker;
use super::state::{RiskDebateState, RiskSeat};
use crate::topology::Target;

/// Aggressive risk analyst node id.
pub const RISKY_NODE: &str = "risky_analyst";
/// Conservative risk analyst node id.
pub const SAFE_NODE: &str = "safe_analyst";
/// Neutral risk analyst node id.
pub const NEUTRAL_NODE: &str = "neutral_analyst";
/// Final risk judge node id.
pub const RISK_JUDGE_NODE: &str = "risk_judge";

/// Participants in speaking order plus the judge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskRoute {
    pub participants: [Speaker; 3],
    pub judge: Target,
}

impl RiskRoute {
    /// Standard aggressive / conservative / neutral panel.
    pub fn standard() -> Self {
        Self {
            participants: [
                Speaker::new(RISKY_NODE, "Risky"),
                Speaker::new(SAFE_NODE, "Safe"),
                Speaker::new(NEUTRAL_NODE, "Neutral"),
            ],
            judge: Target::node(RISK_JUDGE_NODE),
        }
    }

    pub fn speaker(&self, seat: RiskSeat) -> &Speaker {
        &self.participants[seat.index()]
    }
}

/// Bounded round-robin controller over three participants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RiskDiscussionController {
    route: RiskRoute,
    max_rounds: u32,
}

impl RiskDiscussionController {
    pub fn new(route: RiskRoute, max_rounds: u32) -> Self {
        Self { route, max_rounds }
    }

    pub fn route(&self) -> &RiskRoute {
        &self.route
    }

    /// Total turns allowed: three per round.
    pub fn max_turns(&self) -> u32 {
        self.max_rounds.saturating_mul(3)
    }

    pub fn is_complete(&self, state: &RiskDebateState) -> bool {
        state.turn_count >= self.max_turns()
    }

    /// Seat that spoke last, if the latest speaker is recognised.
    fn last_seat(&self, state: &RiskDebateState) -> Option<RiskSeat> {
        if state.latest_speaker.is_empty() {
            return None;
        }
        RiskSeat::ALL.into_iter().find(|seat| {
            let tag = &self.route.speaker(*seat).tag;
            !tag.is_empty() && state.latest_speaker.starts_with(tag.as_str())
        })
    }

    /// Seat that speaks next, or `None` once the discussion is complete.
    pub fn next_seat(&self, state: &RiskDebateState) -> Option<RiskSeat> {
        if self.is_complete(state) {
            return None;
        }
        Some(
            self.last_seat(state)
                .map(RiskSeat::next)
                .unwrap_or(RiskSeat::First),
        )
    }

    /// Next node to run.
    pub fn next(&self, state: &RiskDebateState) -> Target {
        let target = match self.next_seat(state) {
            Some(seat) => Target::node(&self.route.speaker(seat).node),
            None => self.route.judge.clone(),
        };
        debug!(
            turn = state.turn_count,
            max_turns = self.max_turns(),
            latest = %state.latest_speaker,
            next = %target,
            "Risk discussion routed"
        );
        target
    }

    /// Every target `next` can return.
    pub fn candidates(&self) -> Vec<Target> {
        let mut targets: Vec<Target> = self
            .route
            .participants
            .iter()
            .map(|p| Target::node(&p.node))
            .collect();
        targets.push(self.route.judge.clone());
        targets
    }
}
