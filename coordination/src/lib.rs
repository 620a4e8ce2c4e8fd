//! Trading Pipeline Coordination Library
//!
//! Control layer for multi-agent trading pipelines. It does not call models
//! or fetch data; it decides which node runs next and when a run is done.
//!
//! # Components
//!
//! - `topology`: compiles a step selection and phase flags into a validated
//!   node/edge graph (analyst fan-out, join barrier, debate, trader, risk)
//! - `guards`: the per-branch tool-call loop guard and the join barrier
//! - `debate`: bounded bull/bear and three-way risk discussion routing
//! - `consensus`: weighted aggregation of trade opinions with conflict detection
//! - `progress`: weighted progress plan, live estimator and snapshot stores
//! - `runtime`: a sequential reference runner over a compiled graph
//!
//! # Usage
//!
//! ```bash
//! # Print the compiled graph and progress plan for a selection
//! pipeline-plan plan --steps market,news --debate-rounds 2
//!
//! # Poll a stored progress snapshot
//! pipeline-plan status --store-dir ./progress --run-id <RUN_ID>
//! ```

#![allow(clippy::uninlined_format_args)]

pub mod catalog;
pub mod config;
pub mod consensus;
pub mod context;
pub mod debate;
pub mod error;
pub mod guards;
pub mod progress;
pub mod runtime;
pub mod state;
pub mod telemetry;
pub mod topology;

// Re-export configuration and context
pub use config::{
    ConfigOverrides, ConsensusConfig, LoopGuardConfig, PhaseFlags, PipelineConfig,
    ResearchDepth, RoundConfig,
};
pub use context::{Clock, ManualClock, RunContext, SystemClock};
pub use error::{CoordinationError, CoordinationResult};

// Re-export catalogue and state types
pub use catalog::{PipelineShape, StepCatalog, StepDescriptor, StepId, StepKind};
pub use state::{AgentMessage, RunState, StateUpdate};

// Re-export guard and routing types
pub use debate::{DebateController, RiskDiscussionController};
pub use guards::{BarrierDecision, BarrierSynchronizer, LoopDecision, LoopGuard};

// Re-export consensus types
pub use consensus::{
    ConflictLevel, ConsensusAggregator, ConsensusResult, Opinion, TradeDecision,
};

// Re-export topology and runtime types
pub use runtime::{NodeBody, NodeRegistry, RunOutcome, SequentialRunner};
pub use topology::{Graph, Target, TopologyCompiler, TopologyDescription};

// Re-export progress types
pub use progress::{
    FileProgressStore, MemoryProgressStore, ProgressEstimator, ProgressEvent, ProgressSnapshot,
    ProgressStore, RunStatus,
};
