//! Unified error type for entire-core.
//!
//! Aggregates git, I/O, and state-machine failures behind one enum with
//! agent-friendly `Display` messages, following the root crate's
//! `ManifoldError` pattern. `entire-cli` maps variants to the exit codes
//! described in the design notes (0 handled, 1 validation, 2 conflict,
//! 3 fatal).

use thiserror::Error;

use crate::ids::IdError;

/// Errors surfaced by the checkpoint store, state machine, and orchestrator.
#[derive(Debug, Error)]
pub enum EntireError {
    /// Malformed hook input, an invalid identifier, or any other caller
    /// mistake. No state was mutated.
    #[error("validation error: {message}")]
    Validation {
        /// What was wrong.
        message: String,
    },

    /// A ref compare-and-swap conflict that survived all retries.
    #[error("conflict updating `{what}` after {attempts} attempt(s): {message}")]
    Conflict {
        /// What was being updated (e.g. "metadata branch").
        what: String,
        /// How many retries were attempted.
        attempts: u32,
        /// The underlying message from the last attempt.
        message: String,
    },

    /// An event was semantically invalid for the session's current phase
    /// (e.g. `SubagentEnd` with no matching `SubagentStart`). Not a fault:
    /// the orchestrator logs and continues without mutating state.
    #[error("semantic error: {message}")]
    Semantic {
        /// Description of the invalid transition.
        message: String,
    },

    /// Filesystem or object-store I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A failure from the git object layer.
    #[error("git error: {0}")]
    Git(#[from] entire_git::GitError),

    /// Session-state JSON failed to serialize or deserialize.
    #[error("state serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// An identifier failed validation.
    #[error("invalid identifier: {0}")]
    InvalidId(#[from] IdError),

    /// An unrecoverable invariant violation: checkpoint id collision,
    /// corrupted session state that cannot be recovered, or a tree-surgery
    /// result that violates the equivalence property. Requires aborting and
    /// surfacing to the user.
    #[error("fatal error: {message}")]
    Fatal {
        /// What invariant was violated.
        message: String,
    },
}

impl EntireError {
    /// Map this error to the process exit code described in the design
    /// notes: 0 = handled (semantic, logged but not an error to the agent),
    /// 1 = validation, 2 = conflict, 3 = fatal/io/git/serde.
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::Semantic { .. } => 0,
            Self::Validation { .. } | Self::InvalidId(_) => 1,
            Self::Conflict { .. } => 2,
            Self::Io(_) | Self::Git(_) | Self::Serde(_) | Self::Fatal { .. } => 3,
        }
    }
}
