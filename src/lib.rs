#![forbid(unsafe_code)]

//! `agent-relay` library: bridges an ACP editor to a headless coding agent
//! that is launched once per prompt.

pub mod acp;
pub mod config;
pub mod errors;
pub mod models;
pub mod orchestrator;
pub mod permission;
pub mod relay;
pub mod tailer;
pub mod translate;

pub use config::GlobalConfig;
pub use errors::{AppError, Result};
