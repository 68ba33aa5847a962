//! Error type for agent adapters.

use thiserror::Error;

/// Errors surfaced by adapter operations: hook parsing, transcript access,
/// and hook install/uninstall.
#[derive(Debug, Error)]
pub enum AgentError {
    /// The hook payload could not be parsed as the agent's expected shape.
    #[error("malformed hook payload for `{hook_name}`: {message}")]
    MalformedHook {
        /// The hook event name that failed to parse.
        hook_name: String,
        /// Details about what was wrong.
        message: String,
    },

    /// Reading or writing a transcript or hook-config file failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A hook-config file could not be parsed as JSON, or the parsed value
    /// did not have the shape this adapter expects.
    #[error("invalid hook config at `{path}`: {message}")]
    InvalidHookConfig {
        /// Path to the config file.
        path: String,
        /// Details about what was wrong.
        message: String,
    },

    /// JSON (de)serialization failure not covered by [`Self::InvalidHookConfig`].
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
