//! Loop and join guards
//!
//! Pure predicates the compiled graph uses as conditional-edge selectors:
//! the loop guard bounds an analyst's tool-call cycle and the barrier
//! joins the analyst fan-out.

pub mod barrier;
pub mod loop_guard;

pub use barrier::{BarrierDecision, BarrierSynchronizer};
pub use loop_guard::{LoopDecision, LoopGuard, LoopObservation, LoopPhase, LoopVerdict};
