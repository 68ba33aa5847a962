//! Wires the pure state machine to real git and filesystem effects.
//!
//! [`OrchestratorContext`] is the entry point `entire-cli` calls for every
//! agent hook invocation: it loads session state, feeds the event through
//! [`crate::state_machine::transition`], executes the resulting actions
//! against the repository, and persists the updated state — all under the
//! per-session lock from [`crate::state_store`].

use std::path::PathBuf;
use std::time::SystemTime;

use entire_git::GitRepo;
use tracing::{info, instrument};

use crate::checkpoint_store::{self, CondensationInput, TouchedFile};
use crate::config::Config;
use crate::error::EntireError;
use crate::ids::SessionId;
use crate::model::{Phase, SessionRecord, SessionState, ShadowBranchState, TokenUsage};
use crate::state_machine::{self, Action, TransitionContext};
use crate::state_store::StateStore;
use crate::Event;

/// Everything the orchestrator needs to process one hook invocation: the
/// repository to act on, where the session-state store lives, and the
/// tunables governing locking and retries.
pub struct OrchestratorContext<'a> {
    /// The repository the agent is operating in.
    pub repo: &'a dyn GitRepo,
    /// Absolute path to the worktree the agent is operating in.
    pub worktree_root: PathBuf,
    /// Session-state store rooted at the repository's git common dir.
    pub state_store: StateStore,
    /// Tunables for locking, retries, and chunk sizing.
    pub config: Config,
}

/// Data the orchestrator needs beyond the bare event to execute actions,
/// supplied by the caller (`entire-cli`) from the agent adapter: files
/// touched since the last checkpoint, the transcript bytes to append, and
/// the transcript's new position after that append.
#[derive(Default)]
pub struct TurnPayload {
    /// Files touched since the last checkpoint.
    pub files_touched: Vec<TouchedFile>,
    /// Raw transcript bytes to append (JSONL), empty if none.
    pub transcript_delta: Vec<u8>,
    /// The transcript position to record when an `AppendTranscript` action
    /// fires, from `TranscriptAnalyzer::transcript_position`. Left at the
    /// session's current position (no-op) if the caller doesn't supply one.
    pub new_transcript_position: Option<u64>,
    /// Token usage accumulated since the last checkpoint, if the agent
    /// reports it.
    pub token_usage: Option<TokenUsage>,
    /// Optional human-readable summary, supplied at condensation time.
    pub summary: Option<String>,
}

impl OrchestratorContext<'_> {
    /// Process one hook event: acquire the session lock, run it through the
    /// state machine, execute the resulting actions, and persist the
    /// updated session state.
    ///
    /// # Errors
    /// Returns [`EntireError::Conflict`] if the session lock cannot be
    /// acquired in time, [`EntireError::Semantic`] if `event` is invalid for
    /// the session's current phase, or a git/IO/serde error from the
    /// underlying operations.
    #[instrument(skip(self, payload))]
    pub fn handle_event(
        &self,
        event: Event,
        agent_name: &str,
        payload: TurnPayload,
    ) -> Result<(), EntireError> {
        let session_id = event.session_id().clone();
        let _lock = self.state_store.lock(&session_id, self.config.lock_timeout)?;

        let mut state = self
            .state_store
            .read(&session_id)?
            .unwrap_or_else(|| new_session_state(&session_id, agent_name, &self.worktree_root, &event));

        let ctx = TransitionContext { open_subagent_count: state.open_subagents.len() };
        let (new_phase, actions) = state_machine::transition(state.phase, &event, ctx)
            .map_err(|err| EntireError::Semantic { message: err.to_string() })?;

        for action in &actions {
            self.execute_action(action, &mut state, &payload)?;
        }

        state.phase = new_phase;
        state.last_activity_at = SystemTime::now();

        if new_phase.is_terminal() {
            self.state_store.remove(&session_id)?;
        } else {
            self.state_store.write(&state)?;
        }

        info!(%session_id, ?new_phase, "processed hook event");
        Ok(())
    }

    fn execute_action(
        &self,
        action: &Action,
        state: &mut SessionState,
        payload: &TurnPayload,
    ) -> Result<(), EntireError> {
        match action {
            Action::CreateShadowBranch => {
                if state.shadow_branch.is_none() {
                    let base = self.repo.rev_parse_opt("HEAD")?.unwrap_or(entire_git::GitOid::ZERO);
                    state.shadow_branch = Some(ShadowBranchState {
                        ref_name: format!("refs/heads/entire/session/{}", state.session_id),
                        tip: None,
                        base,
                    });
                }
            }
            Action::AppendTranscript { new_position } => {
                state.transcript_position = payload.new_transcript_position.unwrap_or(*new_position);
            }
            Action::WriteShadowCheckpoint(kind, tool_use_id) => {
                let shadow = state.shadow_branch.as_mut().ok_or_else(|| EntireError::Fatal {
                    message: "WriteShadowCheckpoint with no shadow branch".to_owned(),
                })?;
                checkpoint_store::write_shadow_checkpoint(
                    self.repo,
                    &state.session_id,
                    shadow,
                    *kind,
                    &payload.files_touched,
                    &payload.transcript_delta,
                    tool_use_id.as_ref(),
                )?;
                for file in &payload.files_touched {
                    if !state.files_touched.contains(&file.path) {
                        state.files_touched.push(file.path.clone());
                    }
                }
            }
            Action::BeginSubagent(tool_use_id) => {
                if let Some(id) = tool_use_id {
                    state.open_subagents.push(id.clone());
                }
            }
            Action::EndSubagent(tool_use_id) => {
                if let Some(id) = tool_use_id {
                    state.open_subagents.retain(|open| open != id);
                }
            }
            // Reading the data a condensation needs happens inside
            // `condense_sessions_to_metadata_branch` itself, straight from
            // the shadow branch's tip tree, so there is nothing to
            // pre-gather here beyond what the session lock already
            // guarantees is stable.
            Action::PrepareForCondensation => {}
            Action::CondenseAndReset => {
                if let Some(shadow) = state.shadow_branch.clone() {
                    if shadow.tip.is_some() {
                        let session = SessionRecord {
                            session_id: state.session_id.clone(),
                            agent_name: state.agent_name.clone(),
                            agent_session_id: None,
                            first_prompt: state.first_prompt.clone(),
                            started_at: state.started_at,
                            token_usage: payload.token_usage,
                        };
                        checkpoint_store::condense_sessions_to_metadata_branch(
                            self.repo,
                            &[CondensationInput {
                                session,
                                shadow: shadow.clone(),
                                files_touched: state.files_touched.clone(),
                                summary: payload.summary.clone(),
                            }],
                            &self.config,
                        )?;
                    }
                    let ref_name = entire_git::RefName::new(&shadow.ref_name).map_err(|err| EntireError::Fatal {
                        message: err.to_string(),
                    })?;
                    self.repo.delete_ref(&ref_name)?;
                }
                state.shadow_branch = None;
                state.files_touched.clear();
            }
            Action::EmitEvent(name) => {
                info!(event = name, session_id = %state.session_id, "state machine event");
            }
        }
        Ok(())
    }
}

fn new_session_state(
    session_id: &SessionId,
    agent_name: &str,
    worktree_root: &std::path::Path,
    event: &Event,
) -> SessionState {
    let first_prompt = match event {
        Event::SessionStart { first_prompt, .. } => first_prompt.clone(),
        _ => None,
    };
    SessionState {
        session_id: session_id.clone(),
        agent_name: agent_name.to_owned(),
        phase: Phase::Dormant,
        started_at: SystemTime::now(),
        last_activity_at: SystemTime::now(),
        worktree_root: worktree_root.to_path_buf(),
        files_touched: Vec::new(),
        transcript_position: 0,
        shadow_branch: None,
        open_subagents: Vec::new(),
        first_prompt,
    }
}

#[cfg(test)]
mod tests {
    use std::process::Command;

    use entire_git::GixRepo;
    use tempfile::tempdir;

    use super::*;

    fn init_repo() -> (tempfile::TempDir, GixRepo) {
        let dir = tempdir().unwrap();
        Command::new("git").arg("init").arg("-q").arg(dir.path()).status().unwrap();
        Command::new("git")
            .args(["commit", "--allow-empty", "-q", "-m", "root"])
            .current_dir(dir.path())
            .status()
            .unwrap();
        let repo = GixRepo::open(dir.path()).unwrap();
        (dir, repo)
    }

    #[test]
    fn session_start_then_turn_cycle_persists_state() {
        let (dir, repo) = init_repo();
        let state_store = StateStore::open(dir.path().join(".git").as_path()).unwrap();
        let ctx = OrchestratorContext {
            repo: &repo,
            worktree_root: dir.path().to_path_buf(),
            state_store,
            config: Config::default(),
        };

        let session_id = SessionId::new("s1").unwrap();
        ctx.handle_event(
            Event::SessionStart { session_id: session_id.clone(), first_prompt: Some("hi".to_owned()) },
            "claude-code",
            TurnPayload::default(),
        )
        .unwrap();

        let persisted = ctx.state_store.read(&session_id).unwrap().unwrap();
        assert_eq!(persisted.phase, Phase::SessionStarted);
        assert!(persisted.shadow_branch.is_some());

        ctx.handle_event(
            Event::TurnStart { session_id: session_id.clone() },
            "claude-code",
            TurnPayload::default(),
        )
        .unwrap();
        let persisted = ctx.state_store.read(&session_id).unwrap().unwrap();
        assert_eq!(persisted.phase, Phase::TurnInProgress);

        let payload = TurnPayload {
            files_touched: vec![TouchedFile { path: "a.txt".to_owned(), contents: b"hi".to_vec() }],
            transcript_delta: b"{}\n".to_vec(),
            new_transcript_position: Some(3),
            token_usage: None,
            summary: None,
        };
        ctx.handle_event(Event::TurnEnd { session_id: session_id.clone() }, "claude-code", payload).unwrap();
        let persisted = ctx.state_store.read(&session_id).unwrap().unwrap();
        assert_eq!(persisted.phase, Phase::TurnIdle);
        assert_eq!(persisted.files_touched, vec!["a.txt".to_owned()]);
    }

    #[test]
    fn invalid_event_for_phase_is_semantic_error() {
        let (dir, repo) = init_repo();
        let state_store = StateStore::open(dir.path().join(".git").as_path()).unwrap();
        let ctx = OrchestratorContext {
            repo: &repo,
            worktree_root: dir.path().to_path_buf(),
            state_store,
            config: Config::default(),
        };
        let session_id = SessionId::new("s1").unwrap();
        let result = ctx.handle_event(
            Event::TurnEnd { session_id },
            "claude-code",
            TurnPayload::default(),
        );
        assert!(matches!(result, Err(EntireError::Semantic { .. })));
    }

    #[test]
    fn session_end_removes_persisted_state() {
        let (dir, repo) = init_repo();
        let state_store = StateStore::open(dir.path().join(".git").as_path()).unwrap();
        let ctx = OrchestratorContext {
            repo: &repo,
            worktree_root: dir.path().to_path_buf(),
            state_store,
            config: Config::default(),
        };
        let session_id = SessionId::new("s1").unwrap();
        ctx.handle_event(
            Event::SessionStart { session_id: session_id.clone(), first_prompt: None },
            "claude-code",
            TurnPayload::default(),
        )
        .unwrap();
        ctx.handle_event(
            Event::SessionEnd { session_id: session_id.clone() },
            "claude-code",
            TurnPayload::default(),
        )
        .unwrap();
        assert!(ctx.state_store.read(&session_id).unwrap().is_none());
    }

    #[test]
    fn subagent_start_and_end_write_shadow_checkpoint_and_track_open_set() {
        let (dir, repo) = init_repo();
        let state_store = StateStore::open(dir.path().join(".git").as_path()).unwrap();
        let ctx = OrchestratorContext {
            repo: &repo,
            worktree_root: dir.path().to_path_buf(),
            state_store,
            config: Config::default(),
        };
        let session_id = SessionId::new("s1").unwrap();
        ctx.handle_event(
            Event::TurnStart { session_id: session_id.clone() },
            "claude-code",
            TurnPayload::default(),
        )
        .unwrap();

        let tool_use_id = crate::ToolUseId::new("t1").unwrap();
        ctx.handle_event(
            Event::SubagentStart { session_id: session_id.clone(), tool_use_id: Some(tool_use_id.clone()) },
            "claude-code",
            TurnPayload::default(),
        )
        .unwrap();
        let persisted = ctx.state_store.read(&session_id).unwrap().unwrap();
        assert_eq!(persisted.phase, Phase::SubagentActive);
        assert_eq!(persisted.open_subagents, vec![tool_use_id.clone()]);

        let payload = TurnPayload {
            files_touched: vec![TouchedFile { path: "sub.txt".to_owned(), contents: b"x".to_vec() }],
            ..TurnPayload::default()
        };
        ctx.handle_event(
            Event::SubagentEnd { session_id: session_id.clone(), tool_use_id: Some(tool_use_id) },
            "claude-code",
            payload,
        )
        .unwrap();
        let persisted = ctx.state_store.read(&session_id).unwrap().unwrap();
        assert_eq!(persisted.phase, Phase::TurnInProgress);
        assert!(persisted.open_subagents.is_empty());
        assert_eq!(persisted.files_touched, vec!["sub.txt".to_owned()]);
    }
}
