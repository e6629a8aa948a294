use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Why a single provider branch did not produce results
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// Connectivity dropped while the call was in flight
    Connectivity,
    /// The branch exceeded its deadline
    Timeout,
    /// Network or protocol error other than a timeout
    Transport,
    /// The remote side refused because of rate limits or exhausted credit
    Quota,
    /// A rule table without a default rule had nothing to say
    NoMatch,
}

impl FailureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureReason::Connectivity => "connectivity",
            FailureReason::Timeout => "timeout",
            FailureReason::Transport => "transport",
            FailureReason::Quota => "quota",
            FailureReason::NoMatch => "no_match",
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-branch provider failure. Recovered by the orchestrator, never surfaced
/// on its own.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("{provider} failed ({reason}): {message}")]
pub struct ProviderFailure {
    pub provider: String,
    pub reason: FailureReason,
    pub message: String,
}

impl ProviderFailure {
    pub fn new(provider: impl Into<String>, reason: FailureReason, message: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            reason,
            message: message.into(),
        }
    }

    pub fn timeout(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(provider, FailureReason::Timeout, message)
    }

    pub fn transport(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(provider, FailureReason::Transport, message)
    }

    pub fn quota(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(provider, FailureReason::Quota, message)
    }

    pub fn connectivity(provider: impl Into<String>) -> Self {
        Self::new(
            provider,
            FailureReason::Connectivity,
            "connectivity lost while the request was in flight",
        )
    }

    /// Whether retrying the same call later has a reasonable chance of success
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.reason,
            FailureReason::Timeout | FailureReason::Transport | FailureReason::Connectivity
        )
    }

    /// Maps a reqwest error onto a failure reason.
    pub fn from_reqwest(provider: impl Into<String>, err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::timeout(provider, err.to_string())
        } else {
            Self::transport(provider, err.to_string())
        }
    }
}

/// Conversation history errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HistoryError {
    #[error("System turns can only occupy the leading position")]
    SystemTurnNotAllowed,

    #[error("Restored history must start with a system turn")]
    MissingSystemTurn,
}

/// Errors surfaced to the host application
#[derive(Error, Debug)]
pub enum EngineError {
    /// Every invoked adapter, including the local fallback, failed.
    #[error("All providers exhausted ({} failures)", failures.len())]
    AllProvidersExhausted { failures: Vec<ProviderFailure> },

    #[error("Query was superseded by a newer query in the same session")]
    Superseded,

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Session already exists: {0}")]
    SessionExists(String),

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Storage Error: {0}")]
    Storage(String),

    #[error(transparent)]
    History(#[from] HistoryError),

    #[error(transparent)]
    Serde(#[from] serde_json::Error),

    #[error("Internal Error: {0}")]
    Internal(String),
}

/// Result type for engine operations
pub type EngineResult<T> = Result<T, EngineError>;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Read(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Result type for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_reasons() {
        assert!(ProviderFailure::timeout("ai", "slow").is_retryable());
        assert!(ProviderFailure::transport("ai", "reset").is_retryable());
        assert!(ProviderFailure::connectivity("ai").is_retryable());
        assert!(!ProviderFailure::quota("ai", "429").is_retryable());
    }

    #[test]
    fn test_failure_display_includes_reason() {
        let failure = ProviderFailure::quota("openai", "rate limited");
        assert_eq!(failure.to_string(), "openai failed (quota): rate limited");
    }

    #[test]
    fn test_exhausted_counts_failures() {
        let err = EngineError::AllProvidersExhausted {
            failures: vec![
                ProviderFailure::timeout("ai", "slow"),
                ProviderFailure::new("local", FailureReason::NoMatch, "no rule"),
            ],
        };
        assert_eq!(err.to_string(), "All providers exhausted (2 failures)");
    }
}
