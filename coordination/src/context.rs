//! Per-run context handed to the compiler and the progress estimator.

use std::sync::{Arc, RwLock};

use chrono::{DateTime, Duration, Utc};

use crate::config::PipelineConfig;

/// Source of wall-clock time.
pub trait Clock: Send + Sync + std::fmt::Debug {
    fn now(&self) -> DateTime<Utc>;
}

/// Real time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually advanced clock for deterministic timing.
#[derive(Debug)]
pub struct ManualClock {
    now: RwLock<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: RwLock::new(start),
        }
    }

    /// Move the clock forward.
    pub fn advance(&self, by: Duration) {
        if let Ok(mut now) = self.now.write() {
            *now += by;
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        match self.now.read() {
            Ok(now) => *now,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

/// Everything one pipeline run needs that is not part of the shared run state.
///
/// Created per run and dropped when the run ends.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub run_id: String,
    pub config: PipelineConfig,
    pub clock: Arc<dyn Clock>,
}

impl RunContext {
    /// New context with a fresh run id and the system clock.
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            config,
            clock: Arc::new(SystemClock),
        }
    }

    /// Replace the run id.
    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = run_id.into();
        self
    }

    /// Replace the clock.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_advance() {
        let start = Utc::now();
        let clock = ManualClock::new(start);
        clock.advance(Duration::seconds(90));
        assert_eq!(clock.now() - start, Duration::seconds(90));
    }

    #[test]
    fn test_run_ids_are_unique() {
        let a = RunContext::new(PipelineConfig::default());
        let b = RunContext::new(PipelineConfig::default());
        assert_ne!(a.run_id, b.run_id);
        assert_eq!(a.with_run_id("run-1").run_id, "run-1");
    }
}
