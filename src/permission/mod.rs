//! Permission bridge between the agent's callback requests and the editor.

pub mod bridge;

pub use bridge::{PermissionBridge, CALLBACK_PATH};
