//! Reference execution substrate
//!
//! Node bodies, the branch wrappers the compiled graph relies on, and a
//! sequential runner used by tests and the CLI. Production substrates that
//! run branches concurrently only need the wrappers.

pub mod node;
pub mod runner;

pub use node::{from_fn, ClearNode, NodeBody, NodeRegistry, PassThrough, ToolNode};
pub use runner::{RunOutcome, SequentialRunner, DEFAULT_MAX_VISITS};
