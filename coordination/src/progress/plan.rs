//! Progress plan: the weighted step list and the duration estimate.
//!
//! Progress steps are display units, not graph nodes. They are grouped into
//! blocks with fixed base weights; disabled blocks drop out and the active
//! ones are renormalised so the step weights always sum to 1.

use serde::{Deserialize, Serialize};

use super::snapshot::{ProgressStep, StepStatus};
use crate::catalog::{StepCatalog, StepId};
use crate::config::{PhaseFlags, RoundConfig};

/// Base duration of any run, in seconds.
pub const BASE_DURATION_SECS: f64 = 300.0;
/// Added per debate round.
pub const DEBATE_ROUND_SECS: f64 = 180.0;
/// Added per risk round.
pub const RISK_ROUND_SECS: f64 = 180.0;
/// Added per trader round.
pub const TRADER_ROUND_SECS: f64 = 120.0;
/// Extra fraction of the total per analyst beyond the first.
pub const PER_ANALYST_OVERHEAD: f64 = 0.2;

/// Step blocks in display order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockKind {
    Preparation,
    Analysis,
    Debate,
    Risk,
    Final,
}

impl BlockKind {
    /// Share of the run before renormalisation.
    pub fn base_weight(self) -> f64 {
        match self {
            Self::Preparation => 0.10,
            Self::Analysis => 0.35,
            Self::Debate => 0.25,
            Self::Risk => 0.15,
            Self::Final => 0.15,
        }
    }
}

struct Draft {
    name: String,
    description: String,
    keywords: Vec<String>,
}

fn draft(name: impl Into<String>, description: impl Into<String>, keywords: &[&str]) -> Draft {
    Draft {
        name: name.into(),
        description: description.into(),
        keywords: keywords.iter().map(|k| k.to_string()).collect(),
    }
}

/// Build the weighted step list for a run.
pub fn build_steps(
    catalog: &StepCatalog,
    steps: &[StepId],
    phases: PhaseFlags,
    rounds: &RoundConfig,
) -> Vec<ProgressStep> {
    let mut blocks: Vec<(BlockKind, Vec<Draft>)> = Vec::new();

    blocks.push((
        BlockKind::Preparation,
        vec![
            draft("Validate request", "Check the requested entity and options", &["validat"]),
            draft("Check environment", "Verify data sources and credentials", &["environment"]),
            draft("Estimate cost", "Estimate model usage for the run", &["cost"]),
            draft("Configure parameters", "Resolve models and round counts", &["configur", "parameter"]),
        ],
    ));

    blocks.push((
        BlockKind::Analysis,
        steps
            .iter()
            .map(|step| {
                let d = catalog.get(*step);
                Draft {
                    name: d.display_name.to_string(),
                    description: d.description.to_string(),
                    keywords: d.progress_keywords.iter().map(|k| k.to_string()).collect(),
                }
            })
            .collect(),
    ));

    if phases.debate {
        let mut debate = vec![
            draft("Bull researcher", "Argue the bullish case", &["bull"]),
            draft("Bear researcher", "Argue the bearish case", &["bear"]),
        ];
        for round in 1..=rounds.debate_rounds {
            debate.push(Draft {
                name: format!("Debate round {}", round),
                description: format!("Bull/bear exchange, round {}", round),
                keywords: vec![format!("debate round {}", round), format!("round {}", round)],
            });
        }
        debate.push(draft(
            "Research manager",
            "Summarise the debate into an investment plan",
            &["research manager", "investment plan"],
        ));
        blocks.push((BlockKind::Debate, debate));
    }

    if phases.risk {
        blocks.push((
            BlockKind::Risk,
            vec![
                draft("Aggressive risk view", "Argue for taking the risk", &["risky", "aggressive"]),
                draft("Conservative risk view", "Argue for capital protection", &["safe analyst", "conservative"]),
                draft("Neutral risk view", "Balance the two positions", &["neutral"]),
                draft("Risk manager verdict", "Judge the risk discussion", &["risk manager", "risk judge"]),
            ],
        ));
    }

    let mut final_block = Vec::new();
    if phases.trader {
        final_block.push(draft("Trader plan", "Turn the plan into a trade proposal", &["trader"]));
    }
    final_block.push(draft("Final decision", "Issue the trade decision", &["final decision", "final trade"]));
    final_block.push(draft("Report generation", "Assemble the run report", &["report generat", "generating report"]));
    blocks.push((BlockKind::Final, final_block));

    // An empty analyst selection leaves an empty block; it carries no weight.
    let active_total: f64 = blocks
        .iter()
        .filter(|(_, drafts)| !drafts.is_empty())
        .map(|(kind, _)| kind.base_weight())
        .sum();

    let mut out = Vec::new();
    for (kind, drafts) in blocks {
        if drafts.is_empty() {
            continue;
        }
        let weight = kind.base_weight() / active_total / drafts.len() as f64;
        for d in drafts {
            out.push(ProgressStep {
                name: d.name,
                description: d.description,
                block: kind,
                status: StepStatus::Pending,
                weight,
                started_at: None,
                finished_at: None,
                keywords: d.keywords,
            });
        }
    }
    out
}

/// Heuristic run duration in seconds. Not measured; tuned by hand.
pub fn estimate_duration_secs(analyst_count: usize, phases: PhaseFlags, rounds: &RoundConfig) -> f64 {
    let mut total = BASE_DURATION_SECS;
    if phases.debate {
        total += DEBATE_ROUND_SECS * rounds.debate_rounds as f64;
    }
    if phases.risk {
        total += RISK_ROUND_SECS * rounds.risk_rounds as f64;
    }
    if phases.trader {
        total += TRADER_ROUND_SECS * rounds.trader_rounds as f64;
    }
    let extra_analysts = analyst_count.saturating_sub(1) as f64;
    total * (1.0 + PER_ANALYST_OVERHEAD * extra_analysts)
}
