//! Core domain types: events fed into the state machine, the per-session
//! state persisted between hook invocations, and the checkpoint/rewind-point
//! records that make up the metadata branch.

use std::time::SystemTime;

use entire_git::GitOid;
use serde::{Deserialize, Serialize};

use crate::ids::{CheckpointId, SessionId, ToolUseId};

/// An event delivered to the state machine by the orchestrator, one per
/// agent hook invocation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Event {
    /// The agent started a new session.
    SessionStart {
        /// Session this event belongs to.
        session_id: SessionId,
        /// The user's first prompt, if the agent exposes it at this hook.
        first_prompt: Option<String>,
    },
    /// The agent is about to begin processing a user turn.
    TurnStart {
        /// Session this event belongs to.
        session_id: SessionId,
    },
    /// The agent finished a user turn (tool calls settled, response sent).
    TurnEnd {
        /// Session this event belongs to.
        session_id: SessionId,
    },
    /// The agent session ended (process exit, explicit `/exit`, etc.).
    SessionEnd {
        /// Session this event belongs to.
        session_id: SessionId,
    },
    /// A subagent (sub-task, nested invocation) started.
    SubagentStart {
        /// Parent session this event belongs to.
        session_id: SessionId,
        /// Identifier for the subagent invocation, if the adapter assigns one.
        tool_use_id: Option<ToolUseId>,
    },
    /// A subagent finished.
    SubagentEnd {
        /// Parent session this event belongs to.
        session_id: SessionId,
        /// Identifier for the subagent invocation, matching the corresponding
        /// [`Event::SubagentStart`].
        tool_use_id: Option<ToolUseId>,
    },
    /// The agent compacted or summarized its own transcript.
    Compaction {
        /// Session this event belongs to.
        session_id: SessionId,
    },
}

impl Event {
    /// The session this event applies to, regardless of variant.
    #[must_use]
    pub const fn session_id(&self) -> &SessionId {
        match self {
            Self::SessionStart { session_id, .. }
            | Self::TurnStart { session_id }
            | Self::TurnEnd { session_id }
            | Self::SessionEnd { session_id }
            | Self::SubagentStart { session_id, .. }
            | Self::SubagentEnd { session_id, .. }
            | Self::Compaction { session_id } => session_id,
        }
    }
}

/// Which checkpoint-store phase a session is currently in.
///
/// See [`crate::state_machine`] for the transition table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    /// No session tracked; the shadow branch, if any, has been condensed away.
    Dormant,
    /// A session has started but no turn is in progress yet.
    SessionStarted,
    /// A turn is actively running (tools executing, response streaming).
    TurnInProgress,
    /// Between turns: the agent is waiting on the user.
    TurnIdle,
    /// A subagent is running nested inside the current turn.
    SubagentActive,
    /// The shadow branch is being condensed onto the metadata branch.
    Condensing,
}

impl Phase {
    /// Whether this phase has no further transitions (only `Dormant`).
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Dormant)
    }
}

/// State tracked for the session's disposable shadow branch.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShadowBranchState {
    /// `refs/heads/entire/session/<session-id>`.
    pub ref_name: String,
    /// Current tip commit, if the branch has been written to at least once.
    pub tip: Option<GitOid>,
    /// Commit the shadow branch was forked from.
    pub base: GitOid,
}

/// Per-session state persisted to `<git-common-dir>/entire-sessions/<id>.json`
/// between hook invocations.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionState {
    /// This session's identifier.
    pub session_id: SessionId,
    /// Which registered agent adapter owns this session.
    pub agent_name: String,
    /// Current state-machine phase.
    pub phase: Phase,
    /// Wall-clock time the session started.
    #[serde(with = "time_serde")]
    pub started_at: SystemTime,
    /// Wall-clock time of the most recent hook event.
    #[serde(with = "time_serde")]
    pub last_activity_at: SystemTime,
    /// Absolute path to the worktree the agent is operating in.
    pub worktree_root: std::path::PathBuf,
    /// Paths (relative to `worktree_root`) touched since the last checkpoint,
    /// in first-touched order, deduplicated.
    pub files_touched: Vec<String>,
    /// Byte offset into the agent's transcript at the start of the current
    /// turn, so `TurnEnd` only condenses the delta.
    pub transcript_position: u64,
    /// The session's shadow branch, once created.
    pub shadow_branch: Option<ShadowBranchState>,
    /// Subagent tool-use ids currently open (nested subagents push/pop here).
    pub open_subagents: Vec<ToolUseId>,
    /// The first prompt of the session, captured at `SessionStart`.
    pub first_prompt: Option<String>,
}

mod time_serde {
    use std::time::{Duration, SystemTime, UNIX_EPOCH};

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(value: &SystemTime, serializer: S) -> Result<S::Ok, S::Error> {
        let duration = value.duration_since(UNIX_EPOCH).unwrap_or_default();
        duration.as_secs_f64().serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<SystemTime, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Ok(UNIX_EPOCH + Duration::from_secs_f64(secs))
    }
}

/// Token-usage counters for a turn, when the agent's transcript exposes them.
///
/// Every field is optional independently: some agents report cache-aware
/// accounting, some report only input/output totals, some report nothing.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Input tokens consumed.
    pub input_tokens: Option<u64>,
    /// Output tokens produced.
    pub output_tokens: Option<u64>,
    /// Tokens served from a prompt cache.
    pub cache_read_tokens: Option<u64>,
    /// Tokens written to a prompt cache.
    pub cache_creation_tokens: Option<u64>,
    /// Number of API calls made during the turn.
    pub api_calls: Option<u64>,
}

/// A condensed session record stored on the metadata branch.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    /// Which session this record summarizes.
    pub session_id: SessionId,
    /// Which agent produced it.
    pub agent_name: String,
    /// The agent's own identifier for the session, if distinct from
    /// `session_id` (some adapters generate their own UUID).
    pub agent_session_id: Option<String>,
    /// The first user prompt of the session.
    pub first_prompt: Option<String>,
    /// When the session started.
    #[serde(with = "time_serde")]
    pub started_at: SystemTime,
    /// Cumulative token usage across the session, if known.
    pub token_usage: Option<TokenUsage>,
}

/// A checkpoint: one condensation of one or more sessions' shadow branches
/// onto the metadata branch, carrying the session records and an optional
/// human-readable summary.
///
/// A single checkpoint pools more than one session when a real commit's
/// changes overlap files touched by multiple concurrent sessions. Each
/// pooled session's metadata, transcript, and
/// modified-file contents live under its own `session-<n>/` subtree at
/// `<shard>/<rest>/session-<n>/`; this record is stored alongside them at
/// `<shard>/<rest>/checkpoint.json` and carries no file contents itself.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Content-derived identifier.
    pub id: CheckpointId,
    /// The checkpoint this one was condensed on top of, if any.
    pub parent: Option<CheckpointId>,
    /// Sessions folded into this checkpoint, in the same order as their
    /// `session-<n>/` subtrees.
    pub sessions: Vec<SessionRecord>,
    /// Optional human- or agent-generated summary of the work done.
    pub summary: Option<String>,
    /// Wall-clock time the checkpoint was condensed.
    #[serde(with = "time_serde")]
    pub when: SystemTime,
}

/// Which event triggered a shadow-branch checkpoint commit.
///
/// Threaded through [`crate::state_machine::Action::WriteShadowCheckpoint`]
/// so the shadow commit message records why the snapshot was taken.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CheckpointKind {
    /// Written at the end of a user turn.
    Turn,
    /// Written at the end of a subagent invocation.
    Subagent,
    /// Written mid-turn for an individual tool call, when the agent adapter
    /// supports incremental capture.
    Incremental,
}

impl CheckpointKind {
    /// The label used in the shadow commit's subject line.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Turn => "turn",
            Self::Subagent => "subagent",
            Self::Incremental => "incremental",
        }
    }
}

/// A subagent/incremental task's checkpoint record, written under
/// `.entire/metadata/<session-id>/tasks/<tool-use-id>/` on the shadow
/// branch: once as the task's current `checkpoint.json`, and again under
/// `checkpoints/<NNN>-<tool-use-id>.json` as an entry in that task's
/// incremental history.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskCheckpointRecord {
    /// The subagent invocation this checkpoint belongs to.
    pub tool_use_id: String,
    /// Which event produced this checkpoint.
    pub kind: CheckpointKind,
    /// Files touched by this checkpoint.
    pub files_touched: Vec<String>,
    /// When this checkpoint was written.
    #[serde(with = "time_serde")]
    pub when: SystemTime,
}

/// One entry in `list_rewind_points()`: a point in history the user can
/// restore their worktree to.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewindPoint {
    /// The checkpoint identifier to rewind to.
    pub id: CheckpointId,
    /// Commit message / summary shown to the user.
    pub message: String,
    /// When the checkpoint was taken.
    #[serde(with = "time_serde")]
    pub when: SystemTime,
    /// Files modified relative to the previous rewind point.
    pub modified_files: Vec<String>,
    /// Whether this rewind point corresponds to a completed task (vs. an
    /// in-progress turn).
    pub is_task_boundary: bool,
    /// Which session produced it.
    pub session_id: SessionId,
    /// Which agent produced it.
    pub agent_name: String,
}

/// How a checkpoint's tree should be linked into the repository's real
/// history, if at all.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommitLinkPolicy {
    /// Never create a real commit; the checkpoint lives only on the
    /// metadata branch.
    Never,
    /// Add an `Entire-Checkpoint:` trailer to the next real commit the user
    /// makes, linking it back to the checkpoint that preceded it.
    TrailerOnNextCommit,
}
