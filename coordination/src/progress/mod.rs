//! Progress estimation
//!
//! Turns a run's selection and phase flags into a weighted list of display
//! steps, tracks completion from status messages or explicit percentages,
//! and persists snapshots so another process can poll them.
//!
//! ```text
//! plan::build_steps ──► ProgressEstimator::update ──► ProgressSnapshot
//!                                                        │
//!                                       ProgressStore::save / load
//!                                       (load recomputes time fields)
//! ```

pub mod estimator;
pub mod plan;
pub mod snapshot;
pub mod store;

pub use estimator::{ProgressEstimator, ProgressEvent};
pub use plan::{build_steps, estimate_duration_secs, BlockKind};
pub use snapshot::{ProgressSnapshot, ProgressStep, RunStatus, StepStatus};
pub use store::{FileProgressStore, MemoryProgressStore, ProgressStore, DEFAULT_RETENTION};
