//! Progress snapshot: the unit handed to callers and persisted per run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::plan::BlockKind;
use crate::error::{CoordinationError, CoordinationResult};

/// Tolerance when comparing a percent against cumulative step weights.
const WEIGHT_EPSILON: f64 = 1e-9;

/// Status of one progress step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Current,
    Completed,
    Failed,
}

/// Status of the run as a whole.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// One weighted display step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressStep {
    pub name: String,
    pub description: String,
    pub block: BlockKind,
    pub status: StepStatus,
    /// Share of the run; all weights of a run sum to 1.
    pub weight: f64,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Fragments that identify this step in free-text messages.
    #[serde(default)]
    pub keywords: Vec<String>,
}

/// Point-in-time view of a run's progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    /// Schema version for forward compatibility.
    pub version: u32,
    pub run_id: String,
    pub steps: Vec<ProgressStep>,
    /// Overall completion, 0 to 100.
    pub percent: f64,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub elapsed_secs: f64,
    pub estimated_total_secs: f64,
    pub remaining_secs: f64,
    /// Estimate computed when the run started.
    pub initial_estimate_secs: f64,
    pub current_step_index: usize,
    pub last_message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

impl ProgressSnapshot {
    /// Current schema version.
    pub const CURRENT_VERSION: u32 = 1;

    /// Fresh snapshot at 0 %.
    pub fn new(
        run_id: impl Into<String>,
        steps: Vec<ProgressStep>,
        estimate_secs: f64,
        now: DateTime<Utc>,
    ) -> Self {
        let mut snapshot = Self {
            version: Self::CURRENT_VERSION,
            run_id: run_id.into(),
            steps,
            percent: 0.0,
            status: RunStatus::Running,
            started_at: now,
            updated_at: now,
            elapsed_secs: 0.0,
            estimated_total_secs: estimate_secs,
            remaining_secs: estimate_secs,
            initial_estimate_secs: estimate_secs,
            current_step_index: 0,
            last_message: String::new(),
            failure_reason: None,
        };
        snapshot.refresh_step_statuses(now);
        snapshot
    }

    /// Recompute the time fields for `now`.
    ///
    /// Depends only on stored fields, so it can run on a snapshot loaded from
    /// storage without a live estimator. Terminal runs freeze their elapsed
    /// time at the last update.
    pub fn recompute_at(&mut self, now: DateTime<Utc>) {
        let until = if self.status.is_terminal() {
            self.updated_at
        } else {
            now
        };
        let elapsed_ms = until.signed_duration_since(self.started_at).num_milliseconds();
        self.elapsed_secs = (elapsed_ms.max(0) as f64) / 1000.0;

        if self.percent >= 100.0 {
            self.estimated_total_secs = self.elapsed_secs;
            self.remaining_secs = 0.0;
        } else {
            self.estimated_total_secs = self.initial_estimate_secs;
            self.remaining_secs = (self.estimated_total_secs - self.elapsed_secs).max(0.0);
        }
    }

    /// Copy of the snapshot recomputed for `now`.
    pub fn recomputed(&self, now: DateTime<Utc>) -> Self {
        let mut copy = self.clone();
        copy.recompute_at(now);
        copy
    }

    /// `(start, end)` of every step as fractions of the run.
    pub fn step_spans(&self) -> Vec<(f64, f64)> {
        let mut cumulative = 0.0;
        self.steps
            .iter()
            .map(|step| {
                let start = cumulative;
                cumulative += step.weight;
                (start, cumulative)
            })
            .collect()
    }

    pub fn current_step(&self) -> Option<&ProgressStep> {
        self.steps.get(self.current_step_index)
    }

    /// Derive every step's status from the percent.
    ///
    /// Completed and failed steps never change back.
    pub(crate) fn refresh_step_statuses(&mut self, now: DateTime<Utc>) {
        let fraction = self.percent / 100.0;
        let spans = self.step_spans();
        let last = spans.len().saturating_sub(1);

        for (i, (step, (start, end))) in self.steps.iter_mut().zip(spans).enumerate() {
            if matches!(step.status, StepStatus::Completed | StepStatus::Failed) {
                continue;
            }
            // The final span absorbs rounding so 100 % completes every step.
            let end = if i == last { end.min(1.0) } else { end };
            let next = if fraction >= end - WEIGHT_EPSILON {
                StepStatus::Completed
            } else if fraction > start && fraction < end {
                StepStatus::Current
            } else {
                StepStatus::Pending
            };
            match next {
                StepStatus::Current if step.started_at.is_none() => {
                    step.started_at = Some(now);
                }
                StepStatus::Completed => {
                    step.started_at.get_or_insert(now);
                    step.finished_at.get_or_insert(now);
                }
                _ => {}
            }
            step.status = next;
        }

        self.current_step_index = self.select_current_index();
    }

    /// First current step, else first pending, else last completed, else 0.
    fn select_current_index(&self) -> usize {
        let find = |status: StepStatus| self.steps.iter().position(|s| s.status == status);
        find(StepStatus::Current)
            .or_else(|| find(StepStatus::Pending))
            .or_else(|| {
                self.steps
                    .iter()
                    .rposition(|s| s.status == StepStatus::Completed)
            })
            .unwrap_or(0)
    }

    pub fn to_json(&self) -> CoordinationResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parse a stored snapshot, rejecting newer schema versions.
    pub fn from_json(json: &str) -> CoordinationResult<Self> {
        let snapshot: Self = serde_json::from_str(json)?;
        if snapshot.version > Self::CURRENT_VERSION {
            return Err(CoordinationError::store(format!(
                "snapshot version {} is newer than supported version {}",
                snapshot.version,
                Self::CURRENT_VERSION
            )));
        }
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 9, 30, 0).unwrap()
    }

    fn step(name: &str, weight: f64) -> ProgressStep {
        ProgressStep {
            name: name.into(),
            description: String::new(),
            block: BlockKind::Analysis,
            status: StepStatus::Pending,
            weight,
            started_at: None,
            finished_at: None,
            keywords: Vec::new(),
        }
    }

    fn snapshot() -> ProgressSnapshot {
        ProgressSnapshot::new(
            "run-1",
            vec![step("a", 0.25), step("b", 0.25), step("c", 0.5)],
            600.0,
            t0(),
        )
    }

    #[test]
    fn test_statuses_follow_percent() {
        let mut s = snapshot();
        s.percent = 30.0;
        s.refresh_step_statuses(t0());
        assert_eq!(s.steps[0].status, StepStatus::Completed);
        assert_eq!(s.steps[1].status, StepStatus::Current);
        assert_eq!(s.steps[2].status, StepStatus::Pending);
        assert_eq!(s.current_step_index, 1);
        assert_eq!(s.steps[1].started_at, Some(t0()));
    }

    #[test]
    fn test_boundary_percent_selects_next_pending() {
        let mut s = snapshot();
        s.percent = 50.0;
        s.refresh_step_statuses(t0());
        assert_eq!(s.steps[1].status, StepStatus::Completed);
        assert_eq!(s.steps[2].status, StepStatus::Pending);
        assert_eq!(s.current_step_index, 2);
    }

    #[test]
    fn test_completed_steps_do_not_revert() {
        let mut s = snapshot();
        s.percent = 60.0;
        s.refresh_step_statuses(t0());
        s.percent = 10.0;
        s.refresh_step_statuses(t0());
        assert_eq!(s.steps[0].status, StepStatus::Completed);
        assert_eq!(s.steps[1].status, StepStatus::Completed);
    }

    #[test]
    fn test_all_completed_selects_last() {
        let mut s = snapshot();
        s.percent = 100.0;
        s.refresh_step_statuses(t0());
        assert!(s.steps.iter().all(|st| st.status == StepStatus::Completed));
        assert_eq!(s.current_step_index, 2);
    }

    #[test]
    fn test_recompute_running() {
        let mut s = snapshot();
        s.recompute_at(t0() + Duration::seconds(200));
        assert_eq!(s.elapsed_secs, 200.0);
        assert_eq!(s.estimated_total_secs, 600.0);
        assert_eq!(s.remaining_secs, 400.0);

        s.recompute_at(t0() + Duration::seconds(900));
        assert_eq!(s.remaining_secs, 0.0);
    }

    #[test]
    fn test_recompute_complete_uses_elapsed() {
        let mut s = snapshot();
        s.percent = 100.0;
        s.recompute_at(t0() + Duration::seconds(450));
        assert_eq!(s.estimated_total_secs, 450.0);
        assert_eq!(s.remaining_secs, 0.0);
    }

    #[test]
    fn test_recompute_is_idempotent() {
        let mut s = snapshot();
        s.percent = 42.0;
        let now = t0() + Duration::seconds(321);
        let once = s.recomputed(now);
        let twice = once.recomputed(now);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_terminal_run_freezes_elapsed() {
        let mut s = snapshot();
        s.status = RunStatus::Failed;
        s.updated_at = t0() + Duration::seconds(90);
        s.recompute_at(t0() + Duration::days(2));
        assert_eq!(s.elapsed_secs, 90.0);
    }

    #[test]
    fn test_json_version_check() {
        let mut s = snapshot();
        let restored = ProgressSnapshot::from_json(&s.to_json().unwrap()).unwrap();
        assert_eq!(restored, s);

        s.version = ProgressSnapshot::CURRENT_VERSION + 1;
        let err = ProgressSnapshot::from_json(&s.to_json().unwrap()).unwrap_err();
        assert!(matches!(err, CoordinationError::Store { .. }));
    }
}
