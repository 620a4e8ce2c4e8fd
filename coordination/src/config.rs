//! Pipeline configuration
//!
//! Defaults mirror the reference pipeline: every phase enabled, one round
//! per phase, a tool-call ceiling of three, and a 100-character threshold
//! for treating a report as final.
//!
//! # Environment Variables
//!
//! | Variable | Default | Description |
//! |---|---|---|
//! | `PIPELINE_SHAPE` | `per_entity` | `per_entity` or `per_index` |
//! | `PIPELINE_STEPS` | all steps of the shape | Comma-separated analyst steps |
//! | `PIPELINE_DEBATE_ENABLED` | `true` | Bull/bear debate phase |
//! | `PIPELINE_RISK_ENABLED` | `true` | Three-way risk discussion phase |
//! | `PIPELINE_TRADER_ENABLED` | `true` | Trader stage |
//! | `PIPELINE_RESEARCH_DEPTH` | unset | Preset 1-5, sets debate and risk rounds |
//! | `PIPELINE_DEBATE_ROUNDS` | `1` | Bull/bear exchanges |
//! | `PIPELINE_RISK_ROUNDS` | `1` | Full risk discussion cycles |
//! | `PIPELINE_TRADER_ROUNDS` | `1` | Trader passes (duration estimate only) |
//! | `PIPELINE_MAX_TOOL_CALLS` | `3` | Loop guard ceiling per analyst |

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::catalog::PipelineShape;
use crate::error::{CoordinationError, CoordinationResult};

/// Which optional phases run downstream of the analyst barrier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhaseFlags {
    /// Bull/bear debate plus the research manager summary.
    pub debate: bool,
    /// Three-way risk discussion plus the final judge.
    pub risk: bool,
    /// Trader stage between the research summary and risk discussion.
    pub trader: bool,
}

impl Default for PhaseFlags {
    fn default() -> Self {
        Self {
            debate: true,
            risk: true,
            trader: true,
        }
    }
}

impl PhaseFlags {
    /// Only the analyst fan-out runs.
    pub fn analysts_only() -> Self {
        Self {
            debate: false,
            risk: false,
            trader: false,
        }
    }

    /// Returns a list of enabled phase names.
    pub fn enabled_phases(&self) -> Vec<&'static str> {
        let mut phases = Vec::new();
        if self.debate {
            phases.push("debate");
        }
        if self.trader {
            phases.push("trader");
        }
        if self.risk {
            phases.push("risk");
        }
        phases
    }
}

impl std::fmt::Display for PhaseFlags {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "debate={} trader={} risk={}",
            flag_str(self.debate),
            flag_str(self.trader),
            flag_str(self.risk)
        )
    }
}

/// Round counts per phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoundConfig {
    /// Rounds of bull/bear exchange (2 turns each).
    pub debate_rounds: u32,
    /// Full risk discussion cycles (3 turns each).
    pub risk_rounds: u32,
    /// Trader passes. Only feeds the duration estimate.
    pub trader_rounds: u32,
}

impl Default for RoundConfig {
    fn default() -> Self {
        Self {
            debate_rounds: 1,
            risk_rounds: 1,
            trader_rounds: 1,
        }
    }
}

/// Research depth presets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResearchDepth {
    Quick,
    Basic,
    Standard,
    Deep,
    Comprehensive,
}

impl ResearchDepth {
    /// Map a 1-5 level to a preset.
    pub fn from_level(level: u8) -> CoordinationResult<Self> {
        match level {
            1 => Ok(Self::Quick),
            2 => Ok(Self::Basic),
            3 => Ok(Self::Standard),
            4 => Ok(Self::Deep),
            5 => Ok(Self::Comprehensive),
            other => Err(CoordinationError::config(format!(
                "research depth must be 1-5, got {}",
                other
            ))),
        }
    }

    /// `(debate_rounds, risk_rounds)` for this preset.
    pub fn rounds(self) -> (u32, u32) {
        match self {
            Self::Quick | Self::Basic => (1, 1),
            Self::Standard => (1, 2),
            Self::Deep => (2, 2),
            Self::Comprehensive => (3, 3),
        }
    }

    /// Apply this preset to a round config, leaving trader rounds alone.
    pub fn apply(self, rounds: &mut RoundConfig) {
        let (debate, risk) = self.rounds();
        rounds.debate_rounds = debate;
        rounds.risk_rounds = risk;
    }
}

/// Loop guard limits for analyst tool-call cycles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopGuardConfig {
    /// Tool-call cycles after which the analyst is forced to advance.
    pub max_tool_calls: u32,
    /// Minimum report length for the report to count as final.
    pub min_report_len: usize,
}

impl Default for LoopGuardConfig {
    fn default() -> Self {
        Self {
            max_tool_calls: 3,
            min_report_len: 100,
        }
    }
}

/// Consensus aggregation settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsensusConfig {
    /// Per-participant weights. Missing participants get an even split.
    pub weights: BTreeMap<String, f64>,
    /// Weighted confidence below this adds a low-confidence warning.
    pub low_confidence_floor: f64,
    /// Max-min confidence spread above this is a minor conflict.
    pub confidence_spread_threshold: f64,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            weights: BTreeMap::new(),
            low_confidence_floor: 0.6,
            confidence_spread_threshold: 0.4,
        }
    }
}

/// Complete configuration for one pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub shape: PipelineShape,
    /// Requested analyst steps, in order. `None` means all steps of the shape;
    /// an explicit empty list is rejected at compile time.
    pub steps: Option<Vec<String>>,
    pub phases: PhaseFlags,
    pub rounds: RoundConfig,
    pub loop_guard: LoopGuardConfig,
    /// Minimum report length for the analyst barrier.
    pub barrier_min_report_len: usize,
    pub consensus: ConsensusConfig,
    /// How long stored progress snapshots are retained after their last update.
    pub progress_retention_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            shape: PipelineShape::PerEntity,
            steps: None,
            phases: PhaseFlags::default(),
            rounds: RoundConfig::default(),
            loop_guard: LoopGuardConfig::default(),
            barrier_min_report_len: 100,
            consensus: ConsensusConfig::default(),
            progress_retention_secs: 24 * 60 * 60,
        }
    }
}

impl PipelineConfig {
    /// Create config from environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(shape) = std::env::var("PIPELINE_SHAPE") {
            match shape.parse() {
                Ok(s) => config.shape = s,
                Err(e) => tracing::warn!(error = %e, "Ignoring PIPELINE_SHAPE"),
            }
        }
        if let Ok(steps) = std::env::var("PIPELINE_STEPS") {
            config.steps = Some(split_list(&steps));
        }
        if let Some(v) = parse_opt_bool_env("PIPELINE_DEBATE_ENABLED") {
            config.phases.debate = v;
        }
        if let Some(v) = parse_opt_bool_env("PIPELINE_RISK_ENABLED") {
            config.phases.risk = v;
        }
        if let Some(v) = parse_opt_bool_env("PIPELINE_TRADER_ENABLED") {
            config.phases.trader = v;
        }
        if let Some(level) = parse_env::<u8>("PIPELINE_RESEARCH_DEPTH") {
            match ResearchDepth::from_level(level) {
                Ok(depth) => depth.apply(&mut config.rounds),
                Err(e) => tracing::warn!(error = %e, "Ignoring PIPELINE_RESEARCH_DEPTH"),
            }
        }
        if let Some(n) = parse_env("PIPELINE_DEBATE_ROUNDS") {
            config.rounds.debate_rounds = n;
        }
        if let Some(n) = parse_env("PIPELINE_RISK_ROUNDS") {
            config.rounds.risk_rounds = n;
        }
        if let Some(n) = parse_env("PIPELINE_TRADER_ROUNDS") {
            config.rounds.trader_rounds = n;
        }
        if let Some(n) = parse_env("PIPELINE_MAX_TOOL_CALLS") {
            config.loop_guard.max_tool_calls = n;
        }

        config
    }

    /// Load a TOML or YAML config file, chosen by extension.
    pub fn from_path(path: impl AsRef<Path>) -> CoordinationResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => Self::from_toml_str(&raw),
            Some("yaml") | Some("yml") => Self::from_yaml_str(&raw),
            Some("json") => Ok(serde_json::from_str(&raw)?),
            _ => Err(CoordinationError::config(format!(
                "unsupported config file extension: {}",
                path.display()
            ))),
        }
    }

    /// Parse a TOML document.
    pub fn from_toml_str(raw: &str) -> CoordinationResult<Self> {
        Ok(toml::from_str(raw)?)
    }

    /// Parse a YAML document.
    pub fn from_yaml_str(raw: &str) -> CoordinationResult<Self> {
        Ok(serde_yaml::from_str(raw)?)
    }

    /// Apply per-run overrides. Only `Some` values are applied.
    pub fn apply_overrides(&mut self, overrides: &ConfigOverrides) {
        if let Some(shape) = overrides.shape {
            self.shape = shape;
        }
        if let Some(steps) = &overrides.steps {
            self.steps = Some(steps.clone());
        }
        if let Some(v) = overrides.debate_enabled {
            self.phases.debate = v;
        }
        if let Some(v) = overrides.risk_enabled {
            self.phases.risk = v;
        }
        if let Some(v) = overrides.trader_enabled {
            self.phases.trader = v;
        }
        if let Some(depth) = overrides.research_depth {
            depth.apply(&mut self.rounds);
        }
        if let Some(n) = overrides.debate_rounds {
            self.rounds.debate_rounds = n;
        }
        if let Some(n) = overrides.risk_rounds {
            self.rounds.risk_rounds = n;
        }
    }

    /// Steps to compile: the explicit selection, or every step of the shape.
    pub fn requested_steps(&self) -> Vec<String> {
        match &self.steps {
            Some(steps) => steps.clone(),
            None => self
                .shape
                .available_steps()
                .iter()
                .map(|s| s.as_str().to_string())
                .collect(),
        }
    }

    /// Reject values that would make a phase unbounded or empty.
    pub fn validate(&self) -> CoordinationResult<()> {
        self.validate_for(self.phases)
    }

    /// Like [`validate`](Self::validate), but checks round counts against
    /// `phases` instead of the configured phase flags.
    pub fn validate_for(&self, phases: PhaseFlags) -> CoordinationResult<()> {
        if self.loop_guard.max_tool_calls == 0 {
            return Err(CoordinationError::config(
                "loop_guard.max_tool_calls must be at least 1",
            ));
        }
        if phases.debate && self.rounds.debate_rounds == 0 {
            return Err(CoordinationError::config(
                "debate phase is enabled but debate_rounds is 0",
            ));
        }
        if phases.risk && self.rounds.risk_rounds == 0 {
            return Err(CoordinationError::config(
                "risk phase is enabled but risk_rounds is 0",
            ));
        }
        if self.barrier_min_report_len > self.loop_guard.min_report_len {
            // A branch could finish with a final report the barrier never accepts.
            return Err(CoordinationError::config(format!(
                "barrier_min_report_len ({}) must not exceed loop_guard.min_report_len ({})",
                self.barrier_min_report_len, self.loop_guard.min_report_len
            )));
        }
        for (participant, weight) in &self.consensus.weights {
            if !weight.is_finite() || *weight < 0.0 {
                return Err(CoordinationError::config(format!(
                    "consensus weight for '{}' must be a non-negative number",
                    participant
                )));
            }
        }
        Ok(())
    }
}

/// Per-run overrides for pipeline config.
///
/// `None` means "don't override".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigOverrides {
    pub shape: Option<PipelineShape>,
    pub steps: Option<Vec<String>>,
    pub debate_enabled: Option<bool>,
    pub risk_enabled: Option<bool>,
    pub trader_enabled: Option<bool>,
    pub research_depth: Option<ResearchDepth>,
    pub debate_rounds: Option<u32>,
    pub risk_rounds: Option<u32>,
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_env<T: std::str::FromStr>(var: &str) -> Option<T> {
    std::env::var(var).ok().and_then(|v| v.trim().parse().ok())
}

/// Accepts "1", "true", or "yes" (case-insensitive) as enabled and
/// "0", "false", or "no" as disabled. Anything else is ignored.
fn parse_opt_bool_env(var: &str) -> Option<bool> {
    let value = std::env::var(var).ok()?;
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => Some(true),
        "0" | "false" | "no" => Some(false),
        _ => None,
    }
}

fn flag_str(enabled: bool) -> &'static str {
    if enabled {
        "on"
    } else {
        "off"
    }
}
