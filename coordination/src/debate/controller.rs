//! Two-party debate controller: alternates bull and bear for a bounded
//! number of rounds, then routes to the stage that summarises the debate.
//!
//! The controller never mutates state. Each speaking node's update bumps
//! `turn_count`; the controller only reads it, so it is safe to call any
//! number of times against an externally advanced counter.

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::state::{DebateSide, DebateState};
use crate::topology::Target;

/// A debate participant: the node that speaks and the tag its utterances start with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Speaker {
    pub node: String,
    pub tag: String,
}

impl Speaker {
    pub fn new(node: impl Into<String>, tag: impl Into<String>) -> Self {
        Self {
            node: node.into(),
            tag: tag.into(),
        }
    }

    fn spoke_last(&self, last_speaker: &str) -> bool {
        !self.tag.is_empty() && last_speaker.starts_with(&self.tag)
    }

    fn target(&self) -> Target {
        Target::node(&self.node)
    }
}

/// Nodes the debate routes between.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DebateRoute {
    pub side_a: Speaker,
    pub side_b: Speaker,
    /// Where the debate goes once the rounds are used up. Resolved by the
    /// compiler from the enabled downstream phases.
    pub exit: Target,
}

impl DebateRoute {
    /// Standard bull/bear pairing.
    pub fn bull_bear(exit: Target) -> Self {
        Self {
            side_a: Speaker::new(BULL_NODE, "Bull"),
            side_b: Speaker::new(BEAR_NODE, "Bear"),
            exit,
        }
    }
}

/// Bull researcher node id.
pub const BULL_NODE: &str = "bull_researcher";
/// Bear researcher node id.
pub const BEAR_NODE: &str = "bear_researcher";

/// Bounded alternating two-party controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebateController {
    route: DebateRoute,
    max_rounds: u32,
}

impl DebateController {
    pub fn new(route: DebateRoute, max_rounds: u32) -> Self {
        Self { route, max_rounds }
    }

    pub fn route(&self) -> &DebateRoute {
        &self.route
    }

    pub fn max_rounds(&self) -> u32 {
        self.max_rounds
    }

    /// Total turns allowed: one per side per round.
    pub fn max_turns(&self) -> u32 {
        self.max_rounds.saturating_mul(2)
    }

    /// Whether the debate has used all of its turns.
    pub fn is_complete(&self, state: &DebateState) -> bool {
        state.turn_count >= self.max_turns()
    }

    /// Side that speaks next, or `None` when the debate is complete.
    pub fn next_side(&self, state: &DebateState) -> Option<DebateSide> {
        if self.is_complete(state) {
            return None;
        }
        // Side B, nobody, or an unrecognised speaker: side A opens.
        if self.route.side_a.spoke_last(&state.last_speaker) {
            Some(DebateSide::B)
        } else {
            Some(DebateSide::A)
        }
    }

    /// Next node to run.
    pub fn next(&self, state: &DebateState) -> Target {
        let target = match self.next_side(state) {
            Some(DebateSide::A) => self.route.side_a.target(),
            Some(DebateSide::B) => self.route.side_b.target(),
            None => self.route.exit.clone(),
        };
        debug!(
            status = %self.status_line(state),
            next = %target,
            "Debate routed"
        );
        target
    }

    /// Every target `next` can return.
    pub fn candidates(&self) -> Vec<Target> {
        vec![
            self.route.side_a.target(),
            self.route.side_b.target(),
            self.route.exit.clone(),
        ]
    }

    /// Compact status line.
    pub fn status_line(&self, state: &DebateState) -> String {
        let round = state.turn_count.div_ceil(2).min(self.max_rounds);
        format!(
            "[debate] turn {}/{} | round {}/{} | {}",
            state.turn_count,
            self.max_turns(),
            round,
            self.max_rounds,
            if self.is_complete(state) {
                "complete"
            } else {
                "in progress"
            }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::debate::state::DebateTurn;

    fn controller(rounds: u32) -> DebateController {
        DebateController::new(DebateRoute::bull_bear(Target::node("research_manager")), rounds)
    }

    fn speak(state: &mut DebateState, target: &Target) {
        let (side, tag) = match target.as_node() {
            Some(BULL_NODE) => (DebateSide::A, "Bull"),
            Some(BEAR_NODE) => (DebateSide::B, "Bear"),
            other => panic!("not a speaker: {:?}", other),
        };
        state.record(&DebateTurn::new(side, tag, "argument"));
    }

    #[test]
    fn test_starts_with_side_a() {
        let c = controller(2);
        assert_eq!(c.next(&DebateState::default()), Target::node(BULL_NODE));
    }

    #[test]
    fn test_alternates_then_exits() {
        let c = controller(2);
        let mut state = DebateState::default();
        let mut visited = Vec::new();

        loop {
            let next = c.next(&state);
            if next == Target::node("research_manager") {
                break;
            }
            visited.push(next.clone());
            speak(&mut state, &next);
            assert!(visited.len() <= 4, "debate ran past its bound");
        }

        assert_eq!(
            visited,
            vec![
                Target::node(BULL_NODE),
                Target::node(BEAR_NODE),
                Target::node(BULL_NODE),
                Target::node(BEAR_NODE),
            ]
        );
        assert_eq!(state.turn_count, 4);
        assert!(c.is_complete(&state));
    }

    #[test]
    fn test_bounded_for_any_round_count() {
        for rounds in 1..=5 {
            let c = controller(rounds);
            let mut state = DebateState::default();
            let mut turns = 0;
            while c.next_side(&state).is_some() {
                let next = c.next(&state);
                speak(&mut state, &next);
                turns += 1;
            }
            assert_eq!(turns, 2 * rounds);
        }
    }

    #[test]
    fn test_safe_to_call_repeatedly() {
        let c = controller(1);
        let mut state = DebateState::default();
        state.record(&DebateTurn::new(DebateSide::A, "Bull", "x"));
        let first = c.next(&state);
        assert_eq!(first, c.next(&state));
        assert_eq!(first, Target::node(BEAR_NODE));
    }

    #[test]
    fn test_external_counter_past_bound_exits() {
        let c = controller(1);
        let state = DebateState {
            turn_count: 7,
            last_speaker: "Bull Analyst: x".into(),
            ..Default::default()
        };
        assert_eq!(c.next(&state), Target::node("research_manager"));
    }

    #[test]
    fn test_unknown_speaker_restarts_at_side_a() {
        let c = controller(2);
        let state = DebateState {
            turn_count: 1,
            last_speaker: "Moderator: order".into(),
            ..Default::default()
        };
        assert_eq!(c.next(&state), Target::node(BULL_NODE));
    }

    #[test]
    fn test_configurable_exit() {
        let c = DebateController::new(DebateRoute::bull_bear(Target::End), 1);
        let state = DebateState {
            turn_count: 2,
            ..Default::default()
        };
        assert_eq!(c.next(&state), Target::End);
        assert!(c.candidates().contains(&Target::End));
    }

    #[test]
    fn test_status_line() {
        let c = controller(2);
        let mut state = DebateState::default();
        state.record(&DebateTurn::new(DebateSide::A, "Bull", "x"));
        let line = c.status_line(&state);
        assert!(line.contains("turn 1/4"));
        assert!(line.contains("round 1/2"));
        assert!(line.contains("in progress"));
    }
}
