//! Error types shared across the relay.

use std::fmt::{Display, Formatter};

/// Shared application result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error enumeration covering all relay failure modes.
#[derive(Debug)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// Caller supplied a malformed argument (e.g. a relative `cwd`).
    InvalidArgument(String),
    /// Session id is not known to the registry or the agent's index.
    UnknownSession(String),
    /// The external agent process could not be started.
    Launch(String),
    /// Wire-level framing, decoding, or encoding failure.
    Protocol(String),
    /// Permission bridge could not start or the client round-trip failed.
    Permission(String),
    /// A peer task or channel went away before the operation completed.
    ChannelClosed(String),
    /// File-system or I/O operation failure.
    Io(String),
}

impl AppError {
    /// Whether this error is the caller's fault (surfaced as invalid params).
    #[must_use]
    pub fn is_usage_error(&self) -> bool {
        matches!(self, Self::InvalidArgument(_) | Self::UnknownSession(_))
    }
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::InvalidArgument(msg) => write!(f, "invalid argument: {msg}"),
            Self::UnknownSession(msg) => write!(f, "unknown session: {msg}"),
            Self::Launch(msg) => write!(f, "launch: {msg}"),
            Self::Protocol(msg) => write!(f, "protocol: {msg}"),
            Self::Permission(msg) => write!(f, "permission: {msg}"),
            Self::ChannelClosed(msg) => write!(f, "channel closed: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::Protocol(format!("json: {err}"))
    }
}
