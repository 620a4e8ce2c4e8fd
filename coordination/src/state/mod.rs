//! Shared run state
//!
//! The single mutable object threaded through every node of a run. Each
//! node owns a disjoint set of fields, so concurrent branches never write
//! the same field; the substrate serialises the writes themselves.

pub mod report;
pub mod types;

pub use report::{
    is_final_report, is_placeholder, placeholder_report, placeholder_with_partial,
    PLACEHOLDER_PREFIX,
};
pub use types::{
    AgentMessage, RunState, StateUpdate, FINAL_DECISION_KEY, INDEX_INFO_KEY, INVESTMENT_PLAN_KEY,
    TRADER_PLAN_KEY,
};
