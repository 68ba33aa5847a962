//! Commit-time carry-forward: folds concurrent sessions onto the metadata
//! branch when the user's own commit touches files they were working on, and
//! computes the `Entire-Checkpoint:` trailer that links the commit back.
//!
//! This runs outside the hook state machine — there is no `Event` for "the
//! user ran `git commit`" — so it talks to [`checkpoint_store`] and
//! [`StateStore`] directly rather than going through
//! [`crate::orchestrator::OrchestratorContext::handle_event`]. The entry
//! point is `entire hooks commit post-commit`; resolving which branch `HEAD`
//! points at and rewriting the commit are the caller's job, the same way the
//! teacher leaves `git push` itself to a subprocess and only does the
//! decision-making in-process.

use std::collections::BTreeSet;

use entire_git::{GitOid, GitRepo, RefName};
use tracing::{debug, info};

use crate::checkpoint_store::{self, CondensationInput};
use crate::config::Config;
use crate::error::EntireError;
use crate::ids::{CheckpointId, SessionId};
use crate::model::{Checkpoint, CommitLinkPolicy, SessionRecord};
use crate::state_store::StateStore;

/// The trailer key written to link a real commit back to the checkpoint that
/// preceded it.
pub const CHECKPOINT_TRAILER_KEY: &str = "Entire-Checkpoint";

/// What happened at HEAD, gathered by the caller before calling
/// [`run_post_commit`].
#[derive(Clone, Debug)]
pub struct CommitContext {
    /// The commit's own tree.
    pub tree: GitOid,
    /// The commit's first parent's tree, if any (a root commit has none).
    pub parent_tree: Option<GitOid>,
    /// The commit's full message, trailers and all.
    pub message: String,
}

/// Result of a `post-commit` carry-forward pass.
#[derive(Clone, Debug, Default)]
pub struct CarryForwardReport {
    /// The checkpoint condensation produced, if any sessions matched.
    pub checkpoint: Option<Checkpoint>,
    /// Sessions folded into `checkpoint` and reset to a clean shadow state.
    pub condensed_sessions: Vec<SessionId>,
}

/// Run commit-time carry-forward for one real commit.
///
/// 0. If `link_policy` is [`CommitLinkPolicy::Never`], do nothing — a user
///    who has opted out of commit linking gets no shadow-branch folding at
///    commit time either, since the only thing this pass exists to produce
///    is the trailer that links a commit to a checkpoint.
/// 1. If `commit.message` already carries an `Entire-Checkpoint:` trailer,
///    this commit is itself the product of a previous amend; do nothing.
/// 2. Diff `commit.parent_tree` against `commit.tree` to get the file set the
///    user just committed.
/// 3. Find every tracked session whose `files_touched` overlaps that set.
/// 4. Condense the matching sessions into a single metadata-branch commit,
///    pooling them the same way a multi-session `SessionEnd` race would.
/// 5. Reset each matched session's shadow branch (delete the ref, clear
///    `files_touched`) but keep its phase and transcript position — the
///    session is still open from the agent's point of view, only the
///    content already folded into the real commit needed condensing.
///
/// Sessions are locked and processed in sorted order to keep lock
/// acquisition order consistent across concurrent `post-commit` runs.
///
/// # Errors
/// Returns [`EntireError::Conflict`] if a session lock cannot be acquired in
/// time, or a git/IO/serde error from the underlying operations.
pub fn run_post_commit(
    repo: &dyn GitRepo,
    state_store: &StateStore,
    config: &Config,
    commit: &CommitContext,
    link_policy: CommitLinkPolicy,
) -> Result<CarryForwardReport, EntireError> {
    if link_policy == CommitLinkPolicy::Never {
        return Ok(CarryForwardReport::default());
    }
    if has_checkpoint_trailer(&commit.message) {
        debug!("commit already carries an Entire-Checkpoint trailer, skipping");
        return Ok(CarryForwardReport::default());
    }

    let diff = repo.diff_trees(commit.parent_tree, commit.tree)?;
    let changed: BTreeSet<&str> = diff.iter().map(|entry| entry.path.as_str()).collect();
    if changed.is_empty() {
        return Ok(CarryForwardReport::default());
    }

    let mut session_ids = state_store.list_sessions()?;
    session_ids.sort();

    let mut inputs = Vec::new();
    let mut locks = Vec::new();
    for session_id in session_ids {
        let lock = state_store.lock(&session_id, config.lock_timeout)?;
        let Some(state) = state_store.read(&session_id)? else {
            continue;
        };
        let Some(shadow) = state.shadow_branch.clone() else {
            continue;
        };
        if shadow.tip.is_none() {
            continue;
        }
        if !state.files_touched.iter().any(|path| changed.contains(path.as_str())) {
            continue;
        }

        let session = SessionRecord {
            session_id: state.session_id.clone(),
            agent_name: state.agent_name.clone(),
            agent_session_id: None,
            first_prompt: state.first_prompt.clone(),
            started_at: state.started_at,
            token_usage: None,
        };
        inputs.push(CondensationInput {
            session,
            shadow,
            files_touched: state.files_touched.clone(),
            summary: None,
        });
        locks.push((session_id, lock));
    }

    if inputs.is_empty() {
        return Ok(CarryForwardReport::default());
    }

    let checkpoint = checkpoint_store::condense_sessions_to_metadata_branch(repo, &inputs, config)?;

    let mut condensed_sessions = Vec::with_capacity(locks.len());
    for (session_id, _lock) in locks {
        let Some(mut state) = state_store.read(&session_id)? else { continue };
        if let Some(shadow) = state.shadow_branch.take() {
            let ref_name = RefName::new(&shadow.ref_name).map_err(|err| EntireError::Fatal {
                message: err.to_string(),
            })?;
            repo.delete_ref(&ref_name)?;
        }
        state.files_touched.clear();
        state_store.write(&state)?;
        condensed_sessions.push(session_id);
    }

    info!(
        checkpoint_id = %checkpoint.id,
        sessions = condensed_sessions.len(),
        "carried forward sessions at commit"
    );
    Ok(CarryForwardReport { checkpoint: Some(checkpoint), condensed_sessions })
}

fn has_checkpoint_trailer(message: &str) -> bool {
    message.lines().any(|line| {
        line.strip_prefix(CHECKPOINT_TRAILER_KEY)
            .and_then(|rest| rest.strip_prefix(':'))
            .is_some()
    })
}

/// Append an `Entire-Checkpoint: <id>` trailer to a commit message.
///
/// Leaves a blank line before the trailer block unless the message is empty
/// or already ends with one, following the same trailer convention as
/// `Signed-off-by:`/`Co-authored-by:`.
#[must_use]
pub fn append_checkpoint_trailer(message: &str, checkpoint_id: CheckpointId) -> String {
    let trimmed = message.trim_end_matches('\n');
    let trailer = format!("{CHECKPOINT_TRAILER_KEY}: {checkpoint_id}");
    if trimmed.is_empty() {
        return format!("{trailer}\n");
    }
    let last_line = trimmed.lines().next_back().unwrap_or_default();
    if looks_like_trailer_line(last_line) {
        format!("{trimmed}\n{trailer}\n")
    } else {
        format!("{trimmed}\n\n{trailer}\n")
    }
}

fn looks_like_trailer_line(line: &str) -> bool {
    match line.split_once(':') {
        Some((key, _)) => !key.is_empty() && key.chars().all(|c| c.is_ascii_alphanumeric() || c == '-'),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use std::process::Command;

    use entire_git::GixRepo;
    use tempfile::tempdir;

    use super::*;
    use crate::checkpoint_store::{write_shadow_checkpoint, TouchedFile};
    use crate::model::{CheckpointKind, Phase, SessionState, ShadowBranchState};
    use std::time::SystemTime;

    fn init_repo() -> (tempfile::TempDir, GixRepo) {
        let dir = tempdir().unwrap();
        Command::new("git").arg("init").arg("-q").arg(dir.path()).status().unwrap();
        let repo = GixRepo::open(dir.path()).unwrap();
        (dir, repo)
    }

    fn tracked_session(
        repo: &GixRepo,
        state_store: &StateStore,
        session_id: &str,
        path: &str,
        contents: &[u8],
    ) {
        let sid = SessionId::new(session_id).unwrap();
        let mut shadow = ShadowBranchState {
            ref_name: format!("refs/heads/entire/session/{session_id}"),
            tip: None,
            base: GitOid::ZERO,
        };
        write_shadow_checkpoint(
            repo,
            &sid,
            &mut shadow,
            CheckpointKind::Turn,
            &[TouchedFile { path: path.to_owned(), contents: contents.to_vec() }],
            b"{}\n",
            None,
        )
        .unwrap();
        state_store
            .write(&SessionState {
                session_id: sid,
                agent_name: "claude-code".to_owned(),
                phase: Phase::TurnIdle,
                started_at: SystemTime::UNIX_EPOCH,
                last_activity_at: SystemTime::UNIX_EPOCH,
                worktree_root: std::env::temp_dir(),
                files_touched: vec![path.to_owned()],
                transcript_position: 0,
                shadow_branch: Some(shadow),
                open_subagents: vec![],
                first_prompt: None,
            })
            .unwrap();
    }

    fn blank_tree(repo: &GixRepo) -> GitOid {
        repo.write_tree(&[]).unwrap()
    }

    #[test]
    fn never_policy_skips_condensation_entirely() {
        let (dir, repo) = init_repo();
        let state_store = StateStore::open(&dir.path().join(".git")).unwrap();
        tracked_session(&repo, &state_store, "s1", "a.txt", b"hello");

        let empty = blank_tree(&repo);
        let commit = CommitContext {
            tree: repo
                .edit_tree(empty, &[entire_git::TreeEdit::Upsert {
                    path: "a.txt".to_owned(),
                    mode: entire_git::EntryMode::Blob,
                    oid: repo.write_blob(b"hello").unwrap(),
                }])
                .unwrap(),
            parent_tree: Some(empty),
            message: "fix the thing".to_owned(),
        };

        let config = Config::default();
        let report = run_post_commit(&repo, &state_store, &config, &commit, CommitLinkPolicy::Never).unwrap();
        assert!(report.checkpoint.is_none());
        let persisted = state_store.read(&SessionId::new("s1").unwrap()).unwrap().unwrap();
        assert!(persisted.shadow_branch.is_some(), "Never policy leaves the session untouched");
    }

    #[test]
    fn overlapping_session_is_condensed_and_reset() {
        let (dir, repo) = init_repo();
        let state_store = StateStore::open(&dir.path().join(".git")).unwrap();
        tracked_session(&repo, &state_store, "s1", "a.txt", b"hello");

        let empty = blank_tree(&repo);
        let commit = CommitContext {
            tree: repo
                .edit_tree(empty, &[entire_git::TreeEdit::Upsert {
                    path: "a.txt".to_owned(),
                    mode: entire_git::EntryMode::Blob,
                    oid: repo.write_blob(b"hello").unwrap(),
                }])
                .unwrap(),
            parent_tree: Some(empty),
            message: "fix the thing".to_owned(),
        };

        let config = Config::default();
        let report = run_post_commit(&repo, &state_store, &config, &commit, CommitLinkPolicy::TrailerOnNextCommit).unwrap();
        assert!(report.checkpoint.is_some());
        assert_eq!(report.condensed_sessions, vec![SessionId::new("s1").unwrap()]);

        let persisted = state_store.read(&SessionId::new("s1").unwrap()).unwrap().unwrap();
        assert!(persisted.shadow_branch.is_none());
        assert!(persisted.files_touched.is_empty());
        assert_eq!(persisted.phase, Phase::TurnIdle, "phase is left untouched");
    }

    #[test]
    fn non_overlapping_session_is_left_alone() {
        let (dir, repo) = init_repo();
        let state_store = StateStore::open(&dir.path().join(".git")).unwrap();
        tracked_session(&repo, &state_store, "s1", "unrelated.txt", b"hello");

        let empty = blank_tree(&repo);
        let commit = CommitContext {
            tree: repo
                .edit_tree(empty, &[entire_git::TreeEdit::Upsert {
                    path: "a.txt".to_owned(),
                    mode: entire_git::EntryMode::Blob,
                    oid: repo.write_blob(b"hello").unwrap(),
                }])
                .unwrap(),
            parent_tree: Some(empty),
            message: "fix the thing".to_owned(),
        };

        let config = Config::default();
        let report = run_post_commit(&repo, &state_store, &config, &commit, CommitLinkPolicy::TrailerOnNextCommit).unwrap();
        assert!(report.checkpoint.is_none());
        let persisted = state_store.read(&SessionId::new("s1").unwrap()).unwrap().unwrap();
        assert!(persisted.shadow_branch.is_some());
    }

    #[test]
    fn commit_already_carrying_trailer_is_skipped() {
        let (dir, repo) = init_repo();
        let state_store = StateStore::open(&dir.path().join(".git")).unwrap();
        tracked_session(&repo, &state_store, "s1", "a.txt", b"hello");

        let empty = blank_tree(&repo);
        let commit = CommitContext {
            tree: repo
                .edit_tree(empty, &[entire_git::TreeEdit::Upsert {
                    path: "a.txt".to_owned(),
                    mode: entire_git::EntryMode::Blob,
                    oid: repo.write_blob(b"hello").unwrap(),
                }])
                .unwrap(),
            parent_tree: Some(empty),
            message: "fix the thing\n\nEntire-Checkpoint: abc123def456\n".to_owned(),
        };

        let config = Config::default();
        let report = run_post_commit(&repo, &state_store, &config, &commit, CommitLinkPolicy::TrailerOnNextCommit).unwrap();
        assert!(report.checkpoint.is_none());
    }

    #[test]
    fn trailer_is_appended_after_a_blank_line() {
        let id = CheckpointId::from_hex_prefix("abcdef123456");
        let message = append_checkpoint_trailer("fix the thing", id);
        assert_eq!(message, "fix the thing\n\nEntire-Checkpoint: abcdef123456\n");
    }

    #[test]
    fn trailer_is_appended_directly_after_another_trailer() {
        let id = CheckpointId::from_hex_prefix("abcdef123456");
        let message = append_checkpoint_trailer("fix the thing\n\nCo-authored-by: a <a@example.com>", id);
        assert!(message.ends_with("Entire-Checkpoint: abcdef123456\n"));
        assert!(!message.contains("\n\n\n"));
    }
}
