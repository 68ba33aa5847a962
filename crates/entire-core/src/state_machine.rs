//! Pure `(phase, event, ctx) -> (phase, actions)` transition function.
//!
//! Modeled on the teacher's `MergePhase` (`valid_transitions` /
//! `can_transition_to` / `is_terminal`): no I/O happens here. The
//! orchestrator calls [`transition`], then hands the returned [`Action`]s to
//! an `ActionHandler` that actually touches git and the filesystem. Keeping
//! the decision and the effect apart is what makes the phase table testable
//! without a repository.

use crate::model::{CheckpointKind, Phase};
use crate::{Event, SessionId, ToolUseId};

/// Information the pure transition function needs beyond `(phase, event)`
/// alone — specifically, how many subagents are open so `SubagentEnd` can
/// decide whether to fall back to `TurnInProgress` or stay `SubagentActive`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TransitionContext {
    /// Number of subagents open *before* this event is applied.
    pub open_subagent_count: usize,
}

/// A side effect the orchestrator must perform in response to a transition.
/// Produced by [`transition`], executed by `crate::orchestrator::ActionHandler`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Action {
    /// Create the session's shadow branch and persist its initial state.
    CreateShadowBranch,
    /// Snapshot the transcript bytes written since the session's recorded
    /// position and advance that position to `new_position`.
    AppendTranscript {
        /// The transcript position to record after this action runs.
        new_position: u64,
    },
    /// Append the turn's transcript delta to the shadow branch. The second
    /// field is the subagent this checkpoint belongs to, for `Subagent` and
    /// `Incremental` kinds — `None` for a plain `Turn` checkpoint.
    WriteShadowCheckpoint(CheckpointKind, Option<ToolUseId>),
    /// Push `tool_use_id` onto the session's open-subagent stack.
    BeginSubagent(Option<ToolUseId>),
    /// Pop the matching subagent off the session's open-subagent stack.
    EndSubagent(Option<ToolUseId>),
    /// Gather the data a condensation needs (files touched, transcript,
    /// session record) while the session lock is still held.
    PrepareForCondensation,
    /// Fold the shadow branch onto the metadata branch and delete it.
    CondenseAndReset,
    /// Emit a structured log event for observability; never fails.
    EmitEvent(&'static str),
}

/// A transition rejected by the phase table: the event made no sense for
/// the session's current phase. Not a process-level error — the
/// orchestrator logs it and leaves state untouched.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("event `{event}` is invalid in phase `{phase:?}`")]
pub struct InvalidTransition {
    /// Phase the session was in.
    pub phase: Phase,
    /// Description of the rejected event.
    pub event: &'static str,
}

/// Apply `event` to `phase`, returning the new phase and the actions the
/// orchestrator must perform, or an [`InvalidTransition`] if the event
/// doesn't apply to this phase.
///
/// `ctx` carries the small amount of session state the pure table needs to
/// decide `SubagentEnd`'s destination phase (how many subagents are
/// currently open) without making the function itself stateful.
///
/// # Errors
/// Returns [`InvalidTransition`] when `event` has no valid transition from
/// `phase`. Session identifiers inside `event` are not checked against the
/// session this phase belongs to — that's the orchestrator's job.
pub fn transition(
    phase: Phase,
    event: &Event,
    ctx: TransitionContext,
) -> Result<(Phase, Vec<Action>), InvalidTransition> {
    use Phase::{Dormant, SessionStarted, SubagentActive, TurnIdle, TurnInProgress};

    match (phase, event) {
        (Dormant, Event::SessionStart { .. }) => Ok((
            SessionStarted,
            vec![Action::CreateShadowBranch, Action::EmitEvent("session_start")],
        )),

        // Implicit session init: some agents never emit SessionStart and the
        // first hook we see is the turn starting.
        (Dormant, Event::TurnStart { .. }) => Ok((
            TurnInProgress,
            vec![
                Action::CreateShadowBranch,
                Action::AppendTranscript { new_position: 0 },
                Action::EmitEvent("turn_start"),
            ],
        )),

        (SessionStarted | TurnIdle, Event::TurnStart { .. }) => Ok((
            TurnInProgress,
            vec![
                Action::AppendTranscript { new_position: 0 },
                Action::EmitEvent("turn_start"),
            ],
        )),

        (TurnInProgress | SubagentActive, Event::SubagentStart { tool_use_id, .. }) => Ok((
            SubagentActive,
            vec![Action::BeginSubagent(tool_use_id.clone())],
        )),

        (SubagentActive, Event::SubagentEnd { tool_use_id, .. }) => {
            let next = if ctx.open_subagent_count > 1 { SubagentActive } else { TurnInProgress };
            Ok((
                next,
                vec![
                    Action::WriteShadowCheckpoint(CheckpointKind::Subagent, tool_use_id.clone()),
                    Action::EndSubagent(tool_use_id.clone()),
                ],
            ))
        }

        (TurnInProgress, Event::TurnEnd { .. }) => Ok((
            TurnIdle,
            vec![
                Action::WriteShadowCheckpoint(CheckpointKind::Turn, None),
                Action::EmitEvent("turn_end"),
            ],
        )),

        (TurnIdle | TurnInProgress, Event::Compaction { .. }) => Ok((
            phase,
            vec![
                Action::AppendTranscript { new_position: 0 },
                Action::EmitEvent("compaction"),
            ],
        )),

        // Any active phase may end; the orchestrator folds
        // PrepareForCondensation and CondenseAndReset into the same
        // handler call (there is no separate hook event for the internal
        // Condensing -> Dormant step the phase diagram shows).
        (SessionStarted | TurnInProgress | TurnIdle | SubagentActive, Event::SessionEnd { .. }) => {
            Ok((
                Dormant,
                vec![
                    Action::PrepareForCondensation,
                    Action::CondenseAndReset,
                    Action::EmitEvent("session_end"),
                ],
            ))
        }

        (other, event) => Err(InvalidTransition {
            phase: other,
            event: event_label(event),
        }),
    }
}

const fn event_label(event: &Event) -> &'static str {
    match event {
        Event::SessionStart { .. } => "SessionStart",
        Event::TurnStart { .. } => "TurnStart",
        Event::TurnEnd { .. } => "TurnEnd",
        Event::SessionEnd { .. } => "SessionEnd",
        Event::SubagentStart { .. } => "SubagentStart",
        Event::SubagentEnd { .. } => "SubagentEnd",
        Event::Compaction { .. } => "Compaction",
    }
}

/// Whether `phase` has any valid transition at all (used by recovery logic
/// to decide whether a session file left in this phase can simply be
/// resumed or must be force-condensed).
#[must_use]
pub const fn is_terminal(phase: Phase) -> bool {
    phase.is_terminal()
}
