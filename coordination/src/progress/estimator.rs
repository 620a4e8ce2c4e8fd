//! Live progress tracking for one run.

use std::sync::Arc;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::plan::{build_steps, estimate_duration_secs};
use super::snapshot::{ProgressSnapshot, ProgressStep, RunStatus, StepStatus};
use crate::catalog::{StepCatalog, StepId};
use crate::config::{PhaseFlags, RoundConfig};
use crate::context::{Clock, RunContext};
use crate::error::CoordinationResult;

/// What a pipeline reports about itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type", content = "value")]
pub enum ProgressEvent {
    /// Free-text status line, matched against step keywords.
    Text(String),
    /// Named step has started.
    StepStarted(String),
    /// Named step has finished.
    StepCompleted(String),
}

impl ProgressEvent {
    fn message(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::StepStarted(name) => format!("{} started", name),
            Self::StepCompleted(name) => format!("{} completed", name),
        }
    }
}

impl From<&str> for ProgressEvent {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<String> for ProgressEvent {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

/// Tracks one run's progress from messages and explicit percentages.
#[derive(Debug)]
pub struct ProgressEstimator {
    clock: Arc<dyn Clock>,
    snapshot: ProgressSnapshot,
    matchers: Vec<Option<Regex>>,
}

impl ProgressEstimator {
    /// Start tracking a run at 0 %.
    pub fn init(ctx: &RunContext, steps: &[StepId], phases: PhaseFlags, rounds: &RoundConfig) -> Self {
        let plan = build_steps(&StepCatalog::builtin(), steps, phases, rounds);
        let estimate = estimate_duration_secs(steps.len(), phases, rounds);
        let snapshot = ProgressSnapshot::new(ctx.run_id.clone(), plan, estimate, ctx.now());

        info!(
            run_id = %snapshot.run_id,
            steps = snapshot.steps.len(),
            estimate_secs = estimate,
            "Progress tracking started"
        );
        Self::resume(ctx, snapshot)
    }

    /// Start tracking using the selection, phases and rounds of the context's config.
    pub fn from_config(ctx: &RunContext) -> CoordinationResult<Self> {
        let config = &ctx.config;
        let steps = StepCatalog::builtin().resolve_selection(&config.requested_steps(), config.shape)?;
        Ok(Self::init(ctx, &steps, config.phases, &config.rounds))
    }

    /// Continue tracking from a stored snapshot.
    pub fn resume(ctx: &RunContext, snapshot: ProgressSnapshot) -> Self {
        let matchers = snapshot.steps.iter().map(step_matcher).collect();
        Self {
            clock: ctx.clock.clone(),
            snapshot,
            matchers,
        }
    }

    /// Current snapshot with time fields recomputed for now.
    pub fn snapshot(&self) -> ProgressSnapshot {
        self.snapshot.recomputed(self.clock.now())
    }

    pub fn status(&self) -> RunStatus {
        self.snapshot.status
    }

    /// Apply one event. An explicit percent wins over inference from the event.
    ///
    /// Percent never decreases. Once the run is terminal only the message
    /// changes.
    pub fn update(&mut self, event: impl Into<ProgressEvent>, percent: Option<f64>) -> ProgressSnapshot {
        let event = event.into();
        self.snapshot.last_message = event.message();
        if self.snapshot.status.is_terminal() {
            return self.snapshot();
        }

        let now = self.clock.now();
        self.snapshot.updated_at = now;

        let target = match percent {
            Some(p) => Some(p),
            None => self.infer_percent(&event, now),
        };
        if let Some(p) = target {
            let clamped = if p.is_finite() { p.clamp(0.0, 100.0) } else { 0.0 };
            if clamped > self.snapshot.percent {
                self.snapshot.percent = clamped;
            }
        }

        let before = self.snapshot.current_step_index;
        self.snapshot.refresh_step_statuses(now);
        let after = self.snapshot.current_step_index;
        if after != before {
            if let Some(step) = self.snapshot.current_step() {
                info!(
                    run_id = %self.snapshot.run_id,
                    step = %step.name,
                    percent = self.snapshot.percent,
                    "Progress moved to step"
                );
            }
        }
        self.snapshot()
    }

    /// Percent implied by an event, if it names a step.
    fn infer_percent(&mut self, event: &ProgressEvent, now: chrono::DateTime<chrono::Utc>) -> Option<f64> {
        let spans = self.snapshot.step_spans();
        match event {
            ProgressEvent::Text(text) => {
                let from = self.snapshot.current_step_index;
                let index = self
                    .matchers
                    .iter()
                    .enumerate()
                    .skip(from)
                    .find(|(_, m)| matches!(m, Some(re) if re.is_match(text)))
                    .map(|(i, _)| i);
                match index {
                    Some(i) => {
                        debug!(step = %self.snapshot.steps[i].name, "Message matched step");
                        self.snapshot.steps[i].started_at.get_or_insert(now);
                        Some(spans[i].0 * 100.0)
                    }
                    None => {
                        debug!(message = %text, "Message matched no step");
                        None
                    }
                }
            }
            ProgressEvent::StepStarted(name) => self.step_index(name).map(|i| {
                self.snapshot.steps[i].started_at.get_or_insert(now);
                spans[i].0 * 100.0
            }),
            ProgressEvent::StepCompleted(name) => self.step_index(name).map(|i| spans[i].1 * 100.0),
        }
    }

    fn step_index(&self, name: &str) -> Option<usize> {
        self.snapshot
            .steps
            .iter()
            .position(|s| s.name.eq_ignore_ascii_case(name))
    }

    /// Force the run to 100 % and complete every step that has not failed.
    pub fn mark_completed(&mut self) -> ProgressSnapshot {
        if self.snapshot.status.is_terminal() {
            return self.snapshot();
        }
        let now = self.clock.now();
        self.snapshot.percent = 100.0;
        for step in &mut self.snapshot.steps {
            if step.status != StepStatus::Failed {
                step.status = StepStatus::Completed;
                step.started_at.get_or_insert(now);
                step.finished_at.get_or_insert(now);
            }
        }
        self.finish(RunStatus::Completed, now);
        self.snapshot()
    }

    /// Fail the run. Percent is kept; unfinished steps are marked failed.
    pub fn mark_failed(&mut self, reason: impl Into<String>) -> ProgressSnapshot {
        if self.snapshot.status.is_terminal() {
            return self.snapshot();
        }
        let now = self.clock.now();
        let reason = reason.into();
        for step in &mut self.snapshot.steps {
            if matches!(step.status, StepStatus::Pending | StepStatus::Current) {
                step.status = StepStatus::Failed;
            }
        }
        self.snapshot.last_message = reason.clone();
        self.snapshot.failure_reason = Some(reason);
        self.finish(RunStatus::Failed, now);
        self.snapshot()
    }

    fn finish(&mut self, status: RunStatus, now: chrono::DateTime<chrono::Utc>) {
        let previous = self.snapshot.status;
        self.snapshot.status = status;
        self.snapshot.updated_at = now;
        self.snapshot.refresh_step_statuses(now);
        if previous != status {
            info!(
                run_id = %self.snapshot.run_id,
                from = %previous,
                to = %status,
                percent = self.snapshot.percent,
                "Run status changed"
            );
        }
    }
}

/// Case-insensitive alternation of a step's keywords, or its name.
fn step_matcher(step: &ProgressStep) -> Option<Regex> {
    let mut fragments: Vec<String> = step
        .keywords
        .iter()
        .filter(|k| !k.trim().is_empty())
        .map(|k| regex::escape(k.trim()))
        .collect();
    if fragments.is_empty() {
        fragments.push(regex::escape(&step.name));
    }
    Regex::new(&format!("(?i)(?:{})", fragments.join("|"))).ok()
}
