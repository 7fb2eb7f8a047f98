//! Domain model module declarations.

pub mod event;
pub mod permission;
pub mod prompt;
pub mod session;
pub mod tool_call;
pub mod update;
