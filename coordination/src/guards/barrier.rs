//! Barrier synchronizer: joins the analyst fan-out.
//!
//! Evaluated once per branch completion. Returns `Wait` until every
//! expected report is present and long enough (or is a placeholder written
//! by a failed branch), then fires `Continue` exactly once.

use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::catalog::{StepCatalog, StepId};
use crate::state::{is_placeholder, report::meets_min_len, RunState};

/// Barrier outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BarrierDecision {
    /// All branches reported; proceed downstream.
    Continue,
    /// At least one branch outstanding; end this path.
    Wait,
}

/// Single-fire join over a fixed set of branches.
#[derive(Debug)]
pub struct BarrierSynchronizer {
    /// `(branch, report key)` pairs in selection order.
    expected: Vec<(StepId, &'static str)>,
    min_report_len: usize,
    fired: AtomicBool,
}

impl BarrierSynchronizer {
    pub fn new(expected: &[StepId], catalog: &StepCatalog, min_report_len: usize) -> Self {
        Self {
            expected: expected
                .iter()
                .map(|s| (*s, catalog.report_key(*s)))
                .collect(),
            min_report_len,
            fired: AtomicBool::new(false),
        }
    }

    /// Whether `Continue` has already been returned.
    pub fn has_fired(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }

    /// Branches whose report is missing or too short.
    pub fn outstanding(&self, state: &RunState) -> Vec<StepId> {
        self.expected
            .iter()
            .filter(|(_, key)| !self.is_satisfied(state.report(key)))
            .map(|(step, _)| *step)
            .collect()
    }

    fn is_satisfied(&self, report: Option<&str>) -> bool {
        match report {
            None => false,
            Some(r) => is_placeholder(r) || meets_min_len(r, self.min_report_len),
        }
    }

    /// Evaluate the barrier against the current state.
    ///
    /// Idempotent while waiting. After `Continue` has fired, later calls
    /// return `Wait` so the downstream stages cannot be entered twice.
    pub fn should_continue(&self, state: &RunState) -> BarrierDecision {
        let outstanding = self.outstanding(state);
        if !outstanding.is_empty() {
            debug!(
                outstanding = ?outstanding,
                expected = self.expected.len(),
                "Barrier waiting on branches"
            );
            return BarrierDecision::Wait;
        }

        match self
            .fired
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
        {
            Ok(_) => {
                info!(branches = self.expected.len(), "All branches reported, barrier released");
                BarrierDecision::Continue
            }
            Err(_) => {
                warn!("Barrier evaluated after release, ignoring");
                BarrierDecision::Wait
            }
        }
    }
}
