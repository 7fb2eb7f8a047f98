//! Session orchestration.
//!
//! Covers the session registry, per-session prompt scheduling, agent process
//! supervision, and the glue that runs one prompt end to end.

pub mod execution;
pub mod launch;
pub mod registry;
pub mod scheduler;
pub mod supervisor;

pub use execution::{ExecutionContext, SessionRunner};
pub use registry::{SessionRegistry, SessionSetup, SessionSummary};
pub use scheduler::{PromptExecutor, PromptScheduler};
