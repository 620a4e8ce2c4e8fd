//! Consensus aggregation: folds weighted participant opinions into one trade
//! decision with a conflict classification.
//!
//! Decisions map onto a symmetric signed score, the weighted score maps back
//! through fixed thresholds, and conflict is classified by the mix of
//! categories present rather than by the aggregate value.

use std::collections::{BTreeMap, HashSet};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::catalog::StepId;
use crate::config::ConsensusConfig;
use crate::error::{CoordinationError, CoordinationResult};

/// Weighted value at or above which the decision is a strong buy.
pub const STRONG_BUY_THRESHOLD: f64 = 1.5;
/// Weighted value at or above which the decision is a buy.
pub const BUY_THRESHOLD: f64 = 0.5;
/// Weighted value at or below which the decision is a strong sell.
pub const STRONG_SELL_THRESHOLD: f64 = -1.5;
/// Weighted value at or below which the decision is a sell.
pub const SELL_THRESHOLD: f64 = -0.5;
/// Absolute weighted value at or below which the decision is neutral.
pub const NEUTRAL_BAND: f64 = 0.2;

/// Categorical trade decision, ordered from most bearish to most bullish.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeDecision {
    StrongSell,
    Sell,
    Hold,
    Neutral,
    Buy,
    StrongBuy,
}

impl TradeDecision {
    /// Signed score on the -2..=2 scale.
    pub fn score(self) -> f64 {
        match self {
            Self::StrongSell => -2.0,
            Self::Sell => -1.0,
            Self::Hold | Self::Neutral => 0.0,
            Self::Buy => 1.0,
            Self::StrongBuy => 2.0,
        }
    }

    /// Map a weighted value back onto the scale.
    pub fn from_value(value: f64) -> Self {
        if value >= STRONG_BUY_THRESHOLD {
            Self::StrongBuy
        } else if value >= BUY_THRESHOLD {
            Self::Buy
        } else if value <= STRONG_SELL_THRESHOLD {
            Self::StrongSell
        } else if value <= SELL_THRESHOLD {
            Self::Sell
        } else if value.abs() <= NEUTRAL_BAND {
            Self::Neutral
        } else {
            Self::Hold
        }
    }

    pub fn is_buy_side(self) -> bool {
        matches!(self, Self::Buy | Self::StrongBuy)
    }

    pub fn is_sell_side(self) -> bool {
        matches!(self, Self::Sell | Self::StrongSell)
    }
}

impl std::fmt::Display for TradeDecision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::StrongSell => write!(f, "strong_sell"),
            Self::Sell => write!(f, "sell"),
            Self::Hold => write!(f, "hold"),
            Self::Neutral => write!(f, "neutral"),
            Self::Buy => write!(f, "buy"),
            Self::StrongBuy => write!(f, "strong_buy"),
        }
    }
}

impl FromStr for TradeDecision {
    type Err = CoordinationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace([' ', '-'], "_");
        match normalized.as_str() {
            "strong_sell" => Ok(Self::StrongSell),
            "sell" => Ok(Self::Sell),
            "hold" => Ok(Self::Hold),
            "neutral" => Ok(Self::Neutral),
            "buy" => Ok(Self::Buy),
            "strong_buy" => Ok(Self::StrongBuy),
            _ => Err(CoordinationError::config(format!(
                "unknown trade decision '{}'",
                s
            ))),
        }
    }
}

/// One participant's view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Opinion {
    pub participant: String,
    pub decision: TradeDecision,
    /// Confidence in `[0, 1]`. Out-of-range values are clamped on aggregation.
    pub confidence: f64,
    #[serde(default)]
    pub rationale: String,
    #[serde(default)]
    pub risk_warnings: Vec<String>,
}

impl Opinion {
    pub fn new(participant: impl Into<String>, decision: TradeDecision, confidence: f64) -> Self {
        Self {
            participant: participant.into(),
            decision,
            confidence,
            rationale: String::new(),
            risk_warnings: Vec::new(),
        }
    }

    pub fn with_rationale(mut self, rationale: impl Into<String>) -> Self {
        self.rationale = rationale.into();
        self
    }

    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.risk_warnings.push(warning.into());
        self
    }
}

/// Severity of disagreement between participants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictLevel {
    None,
    Minor,
    Major,
    Critical,
}

impl std::fmt::Display for ConflictLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Minor => write!(f, "minor"),
            Self::Major => write!(f, "major"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

/// Aggregated outcome. Built once per run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsensusResult {
    pub decision: TradeDecision,
    /// Weighted signed score the decision was derived from.
    pub weighted_value: f64,
    pub confidence: f64,
    pub conflict: ConflictLevel,
    pub conflict_reasons: Vec<String>,
    pub risk_warnings: Vec<String>,
    pub participants: usize,
    /// Major conflict or low confidence: a human should look before acting.
    pub needs_remediation: bool,
}

impl ConsensusResult {
    /// One-line summary for logs and CLI output.
    pub fn summary(&self) -> String {
        format!(
            "{} (value {:.2}, confidence {:.2}, conflict {}, {} warning(s))",
            self.decision,
            self.weighted_value,
            self.confidence,
            self.conflict,
            self.risk_warnings.len()
        )
    }
}

/// Weighted consensus over a fixed list of opinions.
#[derive(Debug, Clone, PartialEq)]
pub struct ConsensusAggregator {
    low_confidence_floor: f64,
    confidence_spread_threshold: f64,
}

impl ConsensusAggregator {
    pub fn new(config: &ConsensusConfig) -> Self {
        Self {
            low_confidence_floor: config.low_confidence_floor,
            confidence_spread_threshold: config.confidence_spread_threshold,
        }
    }

    /// Aggregate `opinions` under `weights`.
    ///
    /// Participants without a weight get `1/N`. Negative or non-finite weights
    /// count as zero, and if nothing is left the opinions are weighted evenly.
    pub fn aggregate(
        &self,
        opinions: &[Opinion],
        weights: &BTreeMap<String, f64>,
    ) -> CoordinationResult<ConsensusResult> {
        if opinions.is_empty() {
            return Err(CoordinationError::NoOpinions);
        }

        let n = opinions.len();
        let even = 1.0 / n as f64;
        let mut resolved: Vec<f64> = opinions
            .iter()
            .map(|o| {
                let w = weights.get(&o.participant).copied().unwrap_or(even);
                if w.is_finite() && w > 0.0 {
                    w
                } else {
                    0.0
                }
            })
            .collect();
        let mut total: f64 = resolved.iter().sum();
        if total <= 0.0 {
            warn!(participants = n, "All consensus weights are zero, using an even split");
            resolved = vec![even; n];
            total = 1.0;
        }

        let confidences: Vec<f64> = opinions.iter().map(|o| clamp_confidence(o.confidence)).collect();

        let mut value_sum = 0.0;
        let mut confidence_sum = 0.0;
        for ((opinion, weight), confidence) in opinions.iter().zip(&resolved).zip(&confidences) {
            value_sum += opinion.decision.score() * weight * confidence;
            confidence_sum += confidence * weight;
        }
        let weighted_value = value_sum / total;
        let confidence = confidence_sum / total;

        // Unanimous panels keep their category; the confidence scaling would
        // otherwise pull a low-confidence "buy" down into "hold".
        let first = opinions[0].decision;
        let decision = if opinions.iter().all(|o| o.decision == first) {
            first
        } else {
            TradeDecision::from_value(weighted_value)
        };

        let (conflict, conflict_reasons) = self.classify_conflict(opinions, &confidences);

        let mut risk_warnings = Vec::new();
        let mut seen = HashSet::new();
        if confidence < self.low_confidence_floor {
            risk_warnings.push(format!(
                "consensus: low confidence {:.2} is below the {:.2} floor",
                confidence, self.low_confidence_floor
            ));
        }
        let low_confidence = !risk_warnings.is_empty();
        for opinion in opinions {
            for warning in &opinion.risk_warnings {
                let entry = format!("{}: {}", opinion.participant, warning);
                if seen.insert(entry.clone()) {
                    risk_warnings.push(entry);
                }
            }
        }

        let result = ConsensusResult {
            decision,
            weighted_value,
            confidence,
            conflict,
            conflict_reasons,
            risk_warnings,
            participants: n,
            needs_remediation: conflict >= ConflictLevel::Major || low_confidence,
        };

        if conflict >= ConflictLevel::Major {
            warn!(
                conflict = %conflict,
                reasons = ?result.conflict_reasons,
                "Participants disagree on direction"
            );
        }
        info!(
            decision = %result.decision,
            value = result.weighted_value,
            confidence = result.confidence,
            conflict = %result.conflict,
            participants = n,
            "Consensus aggregated"
        );

        Ok(result)
    }

    /// Aggregate and surface degraded analyst branches as risk warnings.
    pub fn aggregate_with_degraded(
        &self,
        opinions: &[Opinion],
        weights: &BTreeMap<String, f64>,
        degraded: &[StepId],
    ) -> CoordinationResult<ConsensusResult> {
        let mut result = self.aggregate(opinions, weights)?;
        for step in degraded {
            let warning = format!(
                "pipeline: {} analysis unavailable, decision made on partial input",
                step
            );
            if !result.risk_warnings.contains(&warning) {
                result.risk_warnings.push(warning);
            }
        }
        Ok(result)
    }

    /// Priority order: critical, major, minor, none. First match wins.
    fn classify_conflict(
        &self,
        opinions: &[Opinion],
        confidences: &[f64],
    ) -> (ConflictLevel, Vec<String>) {
        let has = |d: TradeDecision| opinions.iter().any(|o| o.decision == d);

        if has(TradeDecision::StrongBuy) && has(TradeDecision::StrongSell) {
            return (
                ConflictLevel::Critical,
                vec!["strong_buy and strong_sell opinions are both present".to_string()],
            );
        }

        let buy_side: Vec<&str> = opinions
            .iter()
            .filter(|o| o.decision.is_buy_side())
            .map(|o| o.participant.as_str())
            .collect();
        let sell_side: Vec<&str> = opinions
            .iter()
            .filter(|o| o.decision.is_sell_side())
            .map(|o| o.participant.as_str())
            .collect();
        if !buy_side.is_empty() && !sell_side.is_empty() {
            return (
                ConflictLevel::Major,
                vec![format!(
                    "buy side ({}) opposes sell side ({})",
                    buy_side.join(", "),
                    sell_side.join(", ")
                )],
            );
        }

        let mut reasons = Vec::new();
        let max = confidences.iter().copied().fold(f64::MIN, f64::max);
        let min = confidences.iter().copied().fold(f64::MAX, f64::min);
        let spread = max - min;
        if spread > self.confidence_spread_threshold {
            reasons.push(format!(
                "confidence spread {:.2} exceeds {:.2}",
                spread, self.confidence_spread_threshold
            ));
        }
        let warning_count: usize = opinions.iter().map(|o| o.risk_warnings.len()).sum();
        if warning_count > 2 * opinions.len() {
            reasons.push(format!(
                "{} risk warnings across {} participants",
                warning_count,
                opinions.len()
            ));
        }
        if reasons.is_empty() {
            (ConflictLevel::None, reasons)
        } else {
            (ConflictLevel::Minor, reasons)
        }
    }
}

impl Default for ConsensusAggregator {
    fn default() -> Self {
        Self::new(&ConsensusConfig::default())
    }
}

fn clamp_confidence(c: f64) -> f64 {
    if c.is_finite() {
        c.clamp(0.0, 1.0)
    } else {
        0.0
    }
}
