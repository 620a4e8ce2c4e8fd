//! Bounded argumentation stages
//!
//! Two controllers drive the post-analysis discussion. Both are pure
//! functions of the debate state the speaking nodes advance:
//!
//! ```text
//! barrier ─▶ Bull ⇄ Bear ──(2 × rounds turns)──▶ exit (manager / trader / risk / END)
//!
//! Risky ─▶ Safe ─▶ Neutral ─▶ Risky … ──(3 × rounds turns)──▶ risk judge
//! ```

pub mod controller;
pub mod risk;
pub mod state;

pub use controller::{DebateController, DebateRoute, Speaker, BEAR_NODE, BULL_NODE};
pub use risk::{
    RiskDiscussionController, RiskRoute, NEUTRAL_NODE, RISKY_NODE, RISK_JUDGE_NODE, SAFE_NODE,
};
pub use state::{DebateSide, DebateState, DebateTurn, RiskDebateState, RiskSeat, RiskTurn};
