//! Debate state: turn counters and argument histories.
//!
//! Both states are created empty at run start and mutated once per turn by
//! the speaking node's update. Controllers only ever read them.

use serde::{Deserialize, Serialize};

/// Which side of the two-party debate spoke.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DebateSide {
    A,
    B,
}

impl std::fmt::Display for DebateSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::A => write!(f, "side_a"),
            Self::B => write!(f, "side_b"),
        }
    }
}

/// One argument in the two-party debate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DebateTurn {
    pub side: DebateSide,
    /// Speaker tag, e.g. `Bull`. Becomes the prefix of `last_speaker`.
    pub speaker: String,
    pub argument: String,
}

impl DebateTurn {
    pub fn new(side: DebateSide, speaker: impl Into<String>, argument: impl Into<String>) -> Self {
        Self {
            side,
            speaker: speaker.into(),
            argument: argument.into(),
        }
    }

    fn utterance(&self) -> String {
        format!("{} Analyst: {}", self.speaker, self.argument)
    }
}

/// State of the two-party debate.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DebateState {
    /// Turns taken so far.
    pub turn_count: u32,
    /// Latest utterance, prefixed with the speaker tag. Empty before the first turn.
    pub last_speaker: String,
    pub history_a: String,
    pub history_b: String,
    pub combined_history: String,
}

impl DebateState {
    /// Record a turn: append to the speaker's and the combined history and
    /// bump the counter by exactly one.
    pub fn record(&mut self, turn: &DebateTurn) {
        let utterance = turn.utterance();
        let side_history = match turn.side {
            DebateSide::A => &mut self.history_a,
            DebateSide::B => &mut self.history_b,
        };
        append_line(side_history, &utterance);
        append_line(&mut self.combined_history, &utterance);
        self.last_speaker = utterance;
        self.turn_count += 1;
    }
}

/// Seat in the three-way risk discussion, in speaking order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskSeat {
    First,
    Second,
    Third,
}

impl RiskSeat {
    pub const ALL: [RiskSeat; 3] = [Self::First, Self::Second, Self::Third];

    pub fn index(self) -> usize {
        match self {
            Self::First => 0,
            Self::Second => 1,
            Self::Third => 2,
        }
    }

    /// Seat that speaks after this one.
    pub fn next(self) -> Self {
        match self {
            Self::First => Self::Second,
            Self::Second => Self::Third,
            Self::Third => Self::First,
        }
    }
}

/// One argument in the risk discussion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskTurn {
    pub seat: RiskSeat,
    /// Speaker tag, e.g. `Risky`. Stored as `latest_speaker`.
    pub speaker: String,
    pub argument: String,
}

impl RiskTurn {
    pub fn new(seat: RiskSeat, speaker: impl Into<String>, argument: impl Into<String>) -> Self {
        Self {
            seat,
            speaker: speaker.into(),
            argument: argument.into(),
        }
    }
}

/// State of the three-way risk discussion.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RiskDebateState {
    pub turn_count: u32,
    /// Tag of the latest speaker. Empty before the first turn.
    pub latest_speaker: String,
    /// Per-seat histories in speaking order.
    pub histories: [String; 3],
    /// Latest argument per seat.
    pub current_responses: [String; 3],
    pub combined_history: String,
}

impl RiskDebateState {
    pub fn record(&mut self, turn: &RiskTurn) {
        let utterance = format!("{} Analyst: {}", turn.speaker, turn.argument);
        let idx = turn.seat.index();
        append_line(&mut self.histories[idx], &utterance);
        append_line(&mut self.combined_history, &utterance);
        self.current_responses[idx] = turn.argument.clone();
        self.latest_speaker = turn.speaker.clone();
        self.turn_count += 1;
    }

    pub fn history(&self, seat: RiskSeat) -> &str {
        &self.histories[seat.index()]
    }
}

fn append_line(buf: &mut String, line: &str) {
    if !buf.is_empty() {
        buf.push('\n');
    }
    buf.push_str(line);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debate_record_turns() {
        let mut state = DebateState::default();
        assert_eq!(state.turn_count, 0);

        state.record(&DebateTurn::new(DebateSide::A, "Bull", "Revenue is accelerating"));
        state.record(&DebateTurn::new(DebateSide::B, "Bear", "Margins are shrinking"));

        assert_eq!(state.turn_count, 2);
        assert!(state.last_speaker.starts_with("Bear"));
        assert_eq!(state.history_a, "Bull Analyst: Revenue is accelerating");
        assert_eq!(state.history_b, "Bear Analyst: Margins are shrinking");
        assert_eq!(state.combined_history.lines().count(), 2);
    }

    #[test]
    fn test_risk_seat_cycle() {
        assert_eq!(RiskSeat::First.next(), RiskSeat::Second);
        assert_eq!(RiskSeat::Second.next(), RiskSeat::Third);
        assert_eq!(RiskSeat::Third.next(), RiskSeat::First);
    }

    #[test]
    fn test_risk_record_turns() {
        let mut state = RiskDebateState::default();
        state.record(&RiskTurn::new(RiskSeat::First, "Risky", "Size up"));
        state.record(&RiskTurn::new(RiskSeat::Second, "Safe", "Hedge first"));

        assert_eq!(state.turn_count, 2);
        assert_eq!(state.latest_speaker, "Safe");
        assert_eq!(state.history(RiskSeat::First), "Risky Analyst: Size up");
        assert_eq!(state.current_responses[1], "Hedge first");
        assert!(state.history(RiskSeat::Third).is_empty());
    }

    #[test]
    fn test_debate_state_json_roundtrip() {
        let mut state = DebateState::default();
        state.record(&DebateTurn::new(DebateSide::A, "Bull", "Up"));
        let json = serde_json::to_string(&state).unwrap();
        let parsed: DebateState = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, state);
    }
}
