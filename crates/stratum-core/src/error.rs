use thiserror::Error;

/// Unified error type for the entire Stratum engine.
#[derive(Error, Debug)]
pub enum StratumError {
    // ── Registration errors ────────────────────────────────────
    #[error("nil or invalid source supplied: {0}")]
    InvalidSource(String),

    #[error("duplicate source supplied: {0}")]
    DuplicateSource(String),

    #[error("source not registered: {0}")]
    UnknownSource(String),

    #[error("invalid key format for {key} key: {reason}")]
    InvalidPattern { key: String, reason: String },

    #[error("invalid key format for {0} key")]
    InvalidKey(String),

    #[error("invalid object supplied: {0}")]
    InvalidObject(String),

    // ── Resolution outcomes ────────────────────────────────────
    #[error("key does not exist: {0}")]
    KeyNotExist(String),

    #[error("ignore key changed: {0}")]
    IgnoreChange(String),

    #[error("nil or invalid event supplied: {0}")]
    InvalidEvent(String),

    // ── Value access ───────────────────────────────────────────
    #[error("type mismatch for {key}: expected {expected}")]
    TypeMismatch { key: String, expected: String },

    // ── Source errors ──────────────────────────────────────────
    #[error("source is read-only: {0}")]
    ReadOnly(String),

    #[error("source error: {source_name}: {reason}")]
    Source { source_name: String, reason: String },

    // ── Engine errors ──────────────────────────────────────────
    #[error("config error: {0}")]
    Config(String),

    #[error("engine is shut down")]
    Shutdown,

    // ── Generic wrappers ───────────────────────────────────────
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl StratumError {
    /// Shorthand for a [`StratumError::Source`] failure.
    pub fn source_failure(source_name: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::Source {
            source_name: source_name.into(),
            reason: reason.to_string(),
        }
    }

    /// Whether this is a resolution no-op rather than a real failure.
    pub fn is_ignore(&self) -> bool {
        matches!(self, Self::IgnoreChange(_))
    }
}

pub type Result<T> = std::result::Result<T, StratumError>;
