//! Checkpoint storage engine, session state machine, and turn orchestrator
//! for entire.
//!
//! This crate owns everything in the distilled spec's components 2 and 3
//! except the agent-specific glue (which lives in `entire-agents`): the
//! pure session state machine ([`state_machine`]), the checkpoint store that
//! turns state-machine actions into shadow-branch and metadata-branch
//! commits ([`checkpoint_store`]), the per-session state files that make a
//! session resumable across hook processes ([`state_store`]), and the
//! [`orchestrator`] that wires the three together under a per-session lock.
//!
//! # Crate layout
//!
//! - [`model`] — [`Event`], [`SessionState`], [`Checkpoint`], and the other
//!   domain types threaded through everything else.
//! - [`ids`] — validated [`SessionId`], [`ToolUseId`], and
//!   [`ids::CheckpointId`].
//! - [`state_machine`] — the pure `(phase, event) -> (phase, actions)`
//!   transition function.
//! - [`state_store`] — atomic, lock-protected session-state persistence.
//! - [`checkpoint_store`] — shadow-branch writes, metadata-branch
//!   condensation, rewind-point listing, and rewind.
//! - [`orchestrator`] — the concrete `ActionHandler` that drives the above
//!   three from a single hook event.
//! - [`carry_forward`] — commit-time carry-forward: folding sessions onto
//!   the metadata branch when the user's own commit touches their files, and
//!   the `Entire-Checkpoint:` trailer that links the commit back.
//! - [`canonical`] — canonical JSON and checkpoint-id hashing.
//! - [`config`] — internal tunables (lock timeout, CAS retry count, chunk size).
//! - [`error`] — the unified [`EntireError`] type.

pub mod canonical;
pub mod carry_forward;
pub mod checkpoint_store;
pub mod config;
pub mod error;
pub mod ids;
pub mod model;
pub mod orchestrator;
pub mod state_machine;
pub mod state_store;

pub use carry_forward::{CarryForwardReport, CommitContext};
pub use config::Config;
pub use error::EntireError;
pub use ids::{CheckpointId, IdError, SessionId, ToolUseId};
pub use model::{
    Checkpoint, CommitLinkPolicy, Event, Phase, RewindPoint, SessionRecord, SessionState,
    ShadowBranchState, TaskCheckpointRecord, TokenUsage,
};
pub use orchestrator::{OrchestratorContext, TurnPayload};
pub use state_machine::{transition, Action, InvalidTransition};
pub use state_store::StateStore;
