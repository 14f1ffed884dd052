//! Error types shared across the application.

use std::fmt::{Display, Formatter};

/// Shared application result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error enumeration covering all domain failure modes.
#[derive(Debug)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// ACP stream framing, decoding, or protocol failure.
    Acp(String),
    /// Agent process spawn or handshake failure.
    Startup(String),
    /// Agent session is in the wrong state for the requested operation.
    Session(String),
    /// Permission policy or mediation failure.
    Policy(String),
    /// Upstream relay transport failure.
    Relay(String),
    /// Requested entity does not exist.
    NotFound(String),
    /// File-system or I/O operation failure.
    Io(String),
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Acp(msg) => write!(f, "acp: {msg}"),
            Self::Startup(msg) => write!(f, "startup: {msg}"),
            Self::Session(msg) => write!(f, "session: {msg}"),
            Self::Policy(msg) => write!(f, "policy: {msg}"),
            Self::Relay(msg) => write!(f, "relay: {msg}"),
            Self::NotFound(msg) => write!(f, "not found: {msg}"),
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
