//! Step catalogue: the analyst steps a pipeline can be assembled from.
//!
//! Every analyst step is a tagged variant with a static descriptor: which
//! node names it compiles to, which report field it owns, and how it is
//! presented in progress output. The compiler and the progress estimator
//! both read from the same table, so a step can never be wired into the
//! graph under one name and tracked under another.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{CoordinationError, CoordinationResult};

/// Overall shape of the analysis pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PipelineShape {
    /// One entity (a single stock) analysed by the entity analysts.
    #[default]
    PerEntity,
    /// A market index analysed by the index-domain analysts.
    PerIndex,
}

impl PipelineShape {
    /// Steps that may be requested for this shape, in catalogue order.
    pub fn available_steps(self) -> &'static [StepId] {
        match self {
            Self::PerEntity => &[
                StepId::Market,
                StepId::Social,
                StepId::News,
                StepId::Fundamentals,
            ],
            Self::PerIndex => &[
                StepId::Macro,
                StepId::Policy,
                StepId::IndexNews,
                StepId::Sector,
                StepId::Technical,
            ],
        }
    }

    /// Whether a collector node runs before the analyst fan-out.
    pub fn has_info_collector(self) -> bool {
        matches!(self, Self::PerIndex)
    }
}

impl std::fmt::Display for PipelineShape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PerEntity => write!(f, "per_entity"),
            Self::PerIndex => write!(f, "per_index"),
        }
    }
}

impl FromStr for PipelineShape {
    type Err = CoordinationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "per_entity" | "entity" | "stock" => Ok(Self::PerEntity),
            "per_index" | "index" => Ok(Self::PerIndex),
            other => Err(CoordinationError::config(format!(
                "unknown pipeline shape '{}'",
                other
            ))),
        }
    }
}

/// Analyst step identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepId {
    Market,
    Social,
    News,
    Fundamentals,
    Macro,
    Policy,
    IndexNews,
    Sector,
    Technical,
}

impl StepId {
    /// Canonical identifier string.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Market => "market",
            Self::Social => "social",
            Self::News => "news",
            Self::Fundamentals => "fundamentals",
            Self::Macro => "macro",
            Self::Policy => "policy",
            Self::IndexNews => "index_news",
            Self::Sector => "sector",
            Self::Technical => "technical",
        }
    }

    /// Shape this step belongs to.
    pub fn shape(self) -> PipelineShape {
        match self {
            Self::Market | Self::Social | Self::News | Self::Fundamentals => {
                PipelineShape::PerEntity
            }
            _ => PipelineShape::PerIndex,
        }
    }

    /// Resolve an identifier in the context of a shape.
    ///
    /// `news` is shared vocabulary: under the index shape it means the
    /// index news analyst.
    pub fn parse_for(id: &str, shape: PipelineShape) -> CoordinationResult<Self> {
        let step: StepId = id.parse()?;
        let step = match (step, shape) {
            (Self::News, PipelineShape::PerIndex) => Self::IndexNews,
            (s, _) => s,
        };
        if step.shape() != shape {
            return Err(CoordinationError::step_not_in_shape(
                step.as_str(),
                shape.to_string(),
            ));
        }
        Ok(step)
    }
}

impl std::fmt::Display for StepId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StepId {
    type Err = CoordinationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "market" => Ok(Self::Market),
            "social" | "sentiment" => Ok(Self::Social),
            "news" => Ok(Self::News),
            "fundamentals" => Ok(Self::Fundamentals),
            "macro" => Ok(Self::Macro),
            "policy" => Ok(Self::Policy),
            "index_news" => Ok(Self::IndexNews),
            "sector" => Ok(Self::Sector),
            "technical" => Ok(Self::Technical),
            other => Err(CoordinationError::unknown_step(other)),
        }
    }
}

/// Kind tag carried by every compiled node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    Analyst,
    Tool,
    Clear,
    Debate,
    Risk,
    Manager,
    Trader,
    Barrier,
    Collector,
}

impl std::fmt::Display for StepKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Analyst => "analyst",
            Self::Tool => "tool",
            Self::Clear => "clear",
            Self::Debate => "debate",
            Self::Risk => "risk",
            Self::Manager => "manager",
            Self::Trader => "trader",
            Self::Barrier => "barrier",
            Self::Collector => "collector",
        };
        f.write_str(s)
    }
}

/// Static behaviour descriptor for one analyst step.
#[derive(Debug, Clone, Serialize)]
pub struct StepDescriptor {
    pub id: StepId,
    /// Analyst node id.
    pub analyst_node: &'static str,
    /// Tool-execution node id for the analyst's retry loop.
    pub tool_node: &'static str,
    /// Message-clear node id that terminates the branch.
    pub clear_node: &'static str,
    /// Report field owned by this branch.
    pub report_key: &'static str,
    /// Progress display name.
    pub display_name: &'static str,
    /// Progress description.
    pub description: &'static str,
    /// Lowercase fragments that identify this step in free-text status messages.
    pub progress_keywords: &'static [&'static str],
}

const DESCRIPTORS: &[StepDescriptor] = &[
    StepDescriptor {
        id: StepId::Market,
        analyst_node: "market_analyst",
        tool_node: "tools_market",
        clear_node: "clear_market",
        report_key: "market_report",
        display_name: "Market analysis",
        description: "Price action, volume and technical indicators",
        progress_keywords: &["market analyst", "market analysis", "market_analyst"],
    },
    StepDescriptor {
        id: StepId::Social,
        analyst_node: "social_analyst",
        tool_node: "tools_social",
        clear_node: "clear_social",
        report_key: "sentiment_report",
        display_name: "Sentiment analysis",
        description: "Social media and investor sentiment",
        progress_keywords: &["social", "sentiment"],
    },
    StepDescriptor {
        id: StepId::News,
        analyst_node: "news_analyst",
        tool_node: "tools_news",
        clear_node: "clear_news",
        report_key: "news_report",
        display_name: "News analysis",
        description: "Company and macro news flow",
        progress_keywords: &["news analyst", "news analysis", "news_analyst"],
    },
    StepDescriptor {
        id: StepId::Fundamentals,
        analyst_node: "fundamentals_analyst",
        tool_node: "tools_fundamentals",
        clear_node: "clear_fundamentals",
        report_key: "fundamentals_report",
        display_name: "Fundamentals analysis",
        description: "Financial statements and valuation",
        progress_keywords: &["fundamental"],
    },
    StepDescriptor {
        id: StepId::Macro,
        analyst_node: "macro_analyst",
        tool_node: "tools_macro",
        clear_node: "clear_macro",
        report_key: "macro_report",
        display_name: "Macro analysis",
        description: "Macroeconomic backdrop for the index",
        progress_keywords: &["macro"],
    },
    StepDescriptor {
        id: StepId::Policy,
        analyst_node: "policy_analyst",
        tool_node: "tools_policy",
        clear_node: "clear_policy",
        report_key: "policy_report",
        display_name: "Policy analysis",
        description: "Monetary and regulatory policy signals",
        progress_keywords: &["policy"],
    },
    StepDescriptor {
        id: StepId::IndexNews,
        analyst_node: "index_news_analyst",
        tool_node: "tools_index_news",
        clear_node: "clear_index_news",
        report_key: "index_news_report",
        display_name: "Index news analysis",
        description: "News flow affecting the index constituents",
        progress_keywords: &["index news", "index_news", "news analyst"],
    },
    StepDescriptor {
        id: StepId::Sector,
        analyst_node: "sector_analyst",
        tool_node: "tools_sector",
        clear_node: "clear_sector",
        report_key: "sector_report",
        display_name: "Sector analysis",
        description: "Sector rotation and breadth",
        progress_keywords: &["sector"],
    },
    StepDescriptor {
        id: StepId::Technical,
        analyst_node: "technical_analyst",
        tool_node: "tools_technical",
        clear_node: "clear_technical",
        report_key: "technical_report",
        display_name: "Technical analysis",
        description: "Index trend, momentum and support levels",
        progress_keywords: &["technical"],
    },
];

/// Lookup table from step id to descriptor, built once per compiler.
#[derive(Debug, Clone)]
pub struct StepCatalog {
    // Indexed by `StepId as usize`; DESCRIPTORS is declared in variant order.
    entries: Vec<&'static StepDescriptor>,
}

impl StepCatalog {
    /// Build the catalogue from the built-in descriptors.
    pub fn builtin() -> Self {
        Self {
            entries: DESCRIPTORS.iter().collect(),
        }
    }

    /// Descriptor for a step.
    pub fn get(&self, step: StepId) -> &'static StepDescriptor {
        self.entries[step as usize]
    }

    /// Report field owned by a step.
    pub fn report_key(&self, step: StepId) -> &'static str {
        self.get(step).report_key
    }

    /// Resolve and validate a requested selection into an ordered,
    /// de-duplicated list of steps.
    pub fn resolve_selection<S: AsRef<str>>(
        &self,
        requested: &[S],
        shape: PipelineShape,
    ) -> CoordinationResult<Vec<StepId>> {
        if requested.is_empty() {
            return Err(CoordinationError::EmptySelection);
        }

        let mut steps = Vec::with_capacity(requested.len());
        for id in requested {
            let step = StepId::parse_for(id.as_ref(), shape)?;
            if !steps.contains(&step) {
                steps.push(step);
            }
        }
        Ok(steps)
    }
}

impl Default for StepCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}
