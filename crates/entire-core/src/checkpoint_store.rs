//! Checkpoint storage: writing shadow-branch checkpoints, condensing them
//! onto the append-only metadata branch, listing rewind points, and
//! restoring a worktree to one.
//!
//! The shadow branch (`refs/heads/entire/session/<session-id>`) is
//! disposable and rewritten freely — every `WriteShadowCheckpoint` creates a
//! new commit on it. The metadata branch (`refs/heads/entire/checkpoints/v1`)
//! is append-only and shared across sessions, so every write to it goes
//! through the same compare-and-swap retry loop the teacher's
//! `atomic_ref_update` was built for.
//!
//! A single condensation may pool more than one session — this is how
//! commit-time carry-forward folds several sessions' shadow branches into
//! one metadata-branch commit when a real commit's files were touched by
//! more than one of them. Each pooled session gets its own `session-<n>/`
//! subtree under the checkpoint's shard path, holding that session's
//! metadata, transcript, and the contents of every file it touched.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::SystemTime;

use entire_git::{apply_tree_changes, ChangeType, EntryMode, GitOid, GitRepo, RefEdit, RefName, TreeChange};
use tracing::{debug, warn};

use crate::canonical::{canonical_json, checkpoint_id};
use crate::config::Config;
use crate::error::EntireError;
use crate::ids::{CheckpointId, SessionId, ToolUseId};
use crate::model::{
    Checkpoint, CheckpointKind, RewindPoint, SessionRecord, ShadowBranchState, TaskCheckpointRecord,
};

/// `refs/heads/entire/checkpoints/v1`, the append-only metadata branch.
pub const METADATA_BRANCH: &str = "refs/heads/entire/checkpoints/v1";

/// A file touched since the last checkpoint, with its worktree-relative
/// path and current contents.
#[derive(Clone, Debug)]
pub struct TouchedFile {
    /// Path relative to the worktree root.
    pub path: String,
    /// Current file contents.
    pub contents: Vec<u8>,
}

/// Append one checkpoint commit to a session's shadow branch.
///
/// `kind` records which event triggered the checkpoint in the commit
/// subject.
/// `tool_use_id` is the subagent this checkpoint belongs to, for `Subagent`
/// and `Incremental` kinds; when present, a task checkpoint record is also
/// written under that subagent's `tasks/<tool-use-id>/` subtree.
///
/// # Errors
/// Returns [`EntireError::Git`] if the underlying git operations fail.
pub fn write_shadow_checkpoint(
    repo: &dyn GitRepo,
    session_id: &SessionId,
    shadow: &mut ShadowBranchState,
    kind: CheckpointKind,
    files: &[TouchedFile],
    transcript_delta: &[u8],
    tool_use_id: Option<&ToolUseId>,
) -> Result<(), EntireError> {
    let changes: Vec<TreeChange> = files
        .iter()
        .map(|file| {
            let oid = repo.write_blob(&file.contents)?;
            Ok(TreeChange::Upsert {
                path: file.path.clone(),
                mode: EntryMode::Blob,
                oid,
            })
        })
        .collect::<Result<_, EntireError>>()?;

    let base_tree = shadow.tip.map_or(Ok(None), |tip| repo_tree_of(repo, tip))?;
    let new_tree = apply_tree_changes(repo, base_tree, &changes)?;
    let new_tree = append_transcript(repo, new_tree, session_id, transcript_delta)?;
    let new_tree = match (kind, tool_use_id) {
        (CheckpointKind::Subagent | CheckpointKind::Incremental, Some(id)) => {
            write_task_checkpoint(repo, new_tree, session_id, id, kind, files)?
        }
        _ => new_tree,
    };

    let parents = shadow.tip.map_or_else(Vec::new, |tip| vec![tip]);
    let commit_oid = repo.create_commit(
        new_tree,
        &parents,
        &format!("entire: {} checkpoint for session {session_id}", kind.label()),
        None,
    )?;

    let ref_name = RefName::new(&shadow.ref_name).map_err(|err| EntireError::Validation {
        message: err.to_string(),
    })?;
    let expected = shadow.tip.unwrap_or(GitOid::ZERO);
    repo.atomic_ref_update(&[RefEdit {
        name: ref_name,
        new_oid: commit_oid,
        expected_old_oid: expected,
    }])?;

    shadow.tip = Some(commit_oid);
    debug!(%session_id, %commit_oid, kind = kind.label(), "wrote shadow checkpoint");
    Ok(())
}

fn repo_tree_of(repo: &dyn GitRepo, commit: GitOid) -> Result<Option<GitOid>, EntireError> {
    Ok(Some(repo.read_commit(commit)?.tree_oid))
}

/// Path to a session's transcript under the shadow branch's
/// `.entire/metadata/<session-id>/` directory: `transcript.jsonl`, or
/// `.json` for OpenCode's structural export.
fn transcript_path(session_id: &SessionId, agent_name: &str) -> String {
    let ext = if agent_name == "opencode" { "json" } else { "jsonl" };
    format!(".entire/metadata/{session_id}/transcript.{ext}")
}

fn append_transcript(
    repo: &dyn GitRepo,
    tree: GitOid,
    session_id: &SessionId,
    delta: &[u8],
) -> Result<GitOid, EntireError> {
    if delta.is_empty() {
        return Ok(tree);
    }
    // The shadow branch is per-agent-session, so the plain JSONL extension is
    // always correct here; OpenCode's structural transcript lives in its own
    // session file and is captured whole at condensation time via the agent
    // adapter, not appended incrementally.
    let path = format!(".entire/metadata/{session_id}/transcript.jsonl");
    let existing = read_existing_blob(repo, tree, &path)?;
    let mut combined = existing;
    combined.extend_from_slice(delta);
    let oid = repo.write_blob(&combined)?;
    apply_tree_changes(
        repo,
        Some(tree),
        &[TreeChange::Upsert { path, mode: EntryMode::Blob, oid }],
    )
    .map_err(Into::into)
}

/// Write a subagent/incremental task's checkpoint record under
/// `.entire/metadata/<session-id>/tasks/<tool-use-id>/`: the current
/// `checkpoint.json` (overwritten each call) and a new numbered entry under
/// `checkpoints/` (never overwritten).
fn write_task_checkpoint(
    repo: &dyn GitRepo,
    tree: GitOid,
    session_id: &SessionId,
    tool_use_id: &ToolUseId,
    kind: CheckpointKind,
    files: &[TouchedFile],
) -> Result<GitOid, EntireError> {
    let record = TaskCheckpointRecord {
        tool_use_id: tool_use_id.to_string(),
        kind,
        files_touched: files.iter().map(|f| f.path.clone()).collect(),
        when: SystemTime::now(),
    };
    let bytes = canonical_json(&record)?;
    let record_oid = repo.write_blob(&bytes)?;

    let task_prefix = format!(".entire/metadata/{session_id}/tasks/{tool_use_id}");
    let checkpoints_prefix = format!("{task_prefix}/checkpoints");
    let existing_count = read_tree_entries_at(repo, tree, &checkpoints_prefix)?.len();
    let incremental_path = format!("{checkpoints_prefix}/{existing_count:03}-{tool_use_id}.json");

    apply_tree_changes(
        repo,
        Some(tree),
        &[
            TreeChange::Upsert {
                path: format!("{task_prefix}/checkpoint.json"),
                mode: EntryMode::Blob,
                oid: record_oid,
            },
            TreeChange::Upsert { path: incremental_path, mode: EntryMode::Blob, oid: record_oid },
        ],
    )
    .map_err(Into::into)
}

/// Read the entries of the tree found by descending `path` within `tree`,
/// or an empty list if any segment along the way doesn't exist.
fn read_tree_entries_at(
    repo: &dyn GitRepo,
    tree: GitOid,
    path: &str,
) -> Result<Vec<entire_git::TreeEntry>, EntireError> {
    let mut current = tree;
    for segment in path.split('/') {
        let entries = repo.read_tree(current)?;
        let Some(entry) = entries.into_iter().find(|e| e.name == segment) else {
            return Ok(Vec::new());
        };
        current = entry.oid;
    }
    repo.read_tree(current).map_err(Into::into)
}

fn read_existing_blob(repo: &dyn GitRepo, tree: GitOid, path: &str) -> Result<Vec<u8>, EntireError> {
    let mut current = tree;
    let segments: Vec<&str> = path.split('/').collect();
    for (i, segment) in segments.iter().enumerate() {
        let entries = repo.read_tree(current)?;
        let Some(entry) = entries.into_iter().find(|e| e.name == *segment) else {
            return Ok(Vec::new());
        };
        if i + 1 == segments.len() {
            return match repo.read_blob(entry.oid) {
                Ok(bytes) => Ok(bytes),
                Err(_) => Ok(Vec::new()),
            };
        }
        current = entry.oid;
    }
    Ok(Vec::new())
}

/// One session's contribution to a condensation: its record, its shadow
/// branch (read for the cumulative tree of files it touched and its
/// transcript), and the session-relative paths to pull out of that tree.
#[derive(Clone, Debug)]
pub struct CondensationInput {
    /// The session record to embed in the checkpoint.
    pub session: SessionRecord,
    /// The session's shadow branch. Must have a tip — condensing a session
    /// with no commits is a semantic error.
    pub shadow: ShadowBranchState,
    /// Worktree-relative paths touched by this session, read from the
    /// shadow branch's cumulative tree rather than passed as content
    /// directly, so condensation always reflects the full session, not just
    /// the last hook's delta.
    pub files_touched: Vec<String>,
    /// Optional human- or agent-generated summary for this session's work.
    pub summary: Option<String>,
}

/// Fold one session's shadow branch onto the metadata branch.
///
/// Convenience wrapper around [`condense_sessions_to_metadata_branch`] for
/// the common single-session case (`CondenseAndReset` on a normal
/// `SessionEnd`).
///
/// # Errors
/// See [`condense_sessions_to_metadata_branch`].
pub fn condense_to_metadata_branch(
    repo: &dyn GitRepo,
    session: &SessionRecord,
    shadow: &ShadowBranchState,
    files_touched: &[String],
    summary: Option<String>,
    config: &Config,
) -> Result<Checkpoint, EntireError> {
    condense_sessions_to_metadata_branch(
        repo,
        &[CondensationInput {
            session: session.clone(),
            shadow: shadow.clone(),
            files_touched: files_touched.to_vec(),
            summary,
        }],
        config,
    )
}

#[derive(Clone)]
struct PreparedSession {
    session: SessionRecord,
    metadata_bytes: Vec<u8>,
    transcript_bytes: Vec<u8>,
    files: Vec<(String, Vec<u8>)>,
}

/// Fold one or more sessions' shadow branches onto the metadata branch in a
/// single commit, producing a new [`Checkpoint`].
///
/// Every session's files and transcript are read straight from its shadow
/// branch's current tip tree — the cumulative state written by every
/// `WriteShadowCheckpoint` since the session started — not from any
/// caller-supplied delta, so a session condensed mid-stream (e.g. folded
/// into a carry-forward commit before its own `SessionEnd`) still produces a
/// complete snapshot.
///
/// Retries the metadata-branch CAS write up to `config.cas_retry_count`
/// times on conflict, re-reading the current tip and rebuilding the commit
/// each time, so multiple sessions condensing concurrently don't spuriously
/// fail on ref contention.
///
/// # Errors
/// Returns [`EntireError::Validation`] if `inputs` is empty or any session's
/// shadow branch has no commits, [`EntireError::Fatal`] if the computed
/// checkpoint id already exists at its shard path with different content (a
/// 12-hex CheckpointID collision), [`EntireError::Conflict`] if every retry
/// loses the CAS race, or [`EntireError::Git`]/[`EntireError::Serde`] on
/// lower-level failures.
pub fn condense_sessions_to_metadata_branch(
    repo: &dyn GitRepo,
    inputs: &[CondensationInput],
    config: &Config,
) -> Result<Checkpoint, EntireError> {
    if inputs.is_empty() {
        return Err(EntireError::Validation {
            message: "condensation requires at least one session".to_owned(),
        });
    }

    let mut prepared = Vec::with_capacity(inputs.len());
    for input in inputs {
        let shadow_tip = input.shadow.tip.ok_or_else(|| EntireError::Validation {
            message: format!(
                "cannot condense session {} with no shadow commits",
                input.session.session_id
            ),
        })?;
        let shadow_tree = repo.read_commit(shadow_tip)?.tree_oid;
        let path = transcript_path(&input.session.session_id, &input.session.agent_name);
        let transcript_bytes = read_existing_blob(repo, shadow_tree, &path)?;
        let metadata_bytes = canonical_json(&input.session)?;
        let mut files = Vec::with_capacity(input.files_touched.len());
        for path in &input.files_touched {
            let contents = read_existing_blob(repo, shadow_tree, path)?;
            files.push((path.clone(), contents));
        }
        prepared.push(PreparedSession { session: input.session.clone(), metadata_bytes, transcript_bytes, files });
    }

    let metadata_ref = RefName::new(METADATA_BRANCH).map_err(|err| EntireError::Fatal {
        message: err.to_string(),
    })?;
    let mut attempts = 0u32;

    loop {
        let current_tip = repo.read_ref(&metadata_ref)?;
        let parent_checkpoint = current_tip
            .map(|tip| read_latest_checkpoint_id(repo, tip))
            .transpose()?
            .flatten();

        let id = compute_checkpoint_id(parent_checkpoint, &prepared)?;

        if let Some(tip) = current_tip {
            if let Some((_existing, existing_tree)) = find_checkpoint(repo, tip, id)? {
                if existing_checkpoint_payload_differs(repo, existing_tree, &prepared)? {
                    return Err(EntireError::Fatal {
                        message: format!(
                            "checkpoint id {id} collides with an existing checkpoint holding different content"
                        ),
                    });
                }
            }
        }

        let summary = inputs.iter().find_map(|i| i.summary.clone());
        let checkpoint = Checkpoint {
            id,
            parent: parent_checkpoint,
            sessions: prepared.iter().map(|p| p.session.clone()).collect(),
            summary,
            when: SystemTime::now(),
        };

        let mut changes = Vec::new();
        let shard_path = format!("{}/{}", id.shard(), id.rest());
        for (n, prepared_session) in prepared.iter().enumerate() {
            let session_prefix = format!("{shard_path}/session-{n}");
            let is_opencode = prepared_session.session.agent_name == "opencode";

            let metadata_oid = repo.write_blob(&prepared_session.metadata_bytes)?;
            changes.push(TreeChange::Upsert {
                path: format!("{session_prefix}/metadata.json"),
                mode: EntryMode::Blob,
                oid: metadata_oid,
            });

            let transcript_name = if is_opencode { "transcript.json" } else { "transcript.jsonl" };
            let transcript_oid = repo.write_blob(&prepared_session.transcript_bytes)?;
            changes.push(TreeChange::Upsert {
                path: format!("{session_prefix}/{transcript_name}"),
                mode: EntryMode::Blob,
                oid: transcript_oid,
            });

            for (path, contents) in &prepared_session.files {
                let oid = repo.write_blob(contents)?;
                changes.push(TreeChange::Upsert {
                    path: format!("{session_prefix}/files/{path}"),
                    mode: EntryMode::Blob,
                    oid,
                });
            }
        }

        let checkpoint_bytes = canonical_json(&checkpoint)?;
        let checkpoint_oid = repo.write_blob(&checkpoint_bytes)?;
        changes.push(TreeChange::Upsert {
            path: format!("{shard_path}/checkpoint.json"),
            mode: EntryMode::Blob,
            oid: checkpoint_oid,
        });

        let base_metadata_tree = current_tip.map_or(Ok(None), |tip| repo_tree_of(repo, tip))?;
        let new_tree = apply_tree_changes(repo, base_metadata_tree, &changes)?;

        let parents = current_tip.map_or_else(Vec::new, |tip| vec![tip]);
        let commit_oid = repo.create_commit(new_tree, &parents, &format!("entire: checkpoint {id}"), None)?;

        let expected = current_tip.unwrap_or(GitOid::ZERO);
        let result = repo.atomic_ref_update(&[RefEdit {
            name: metadata_ref.clone(),
            new_oid: commit_oid,
            expected_old_oid: expected,
        }]);

        match result {
            Ok(()) => return Ok(checkpoint),
            Err(entire_git::GitError::RefConflict { .. }) if attempts < config.cas_retry_count => {
                attempts += 1;
                warn!(attempt = attempts, "metadata branch CAS conflict, retrying");
            }
            Err(err) => {
                return Err(EntireError::Conflict {
                    what: "metadata branch".to_owned(),
                    attempts,
                    message: err.to_string(),
                });
            }
        }
    }
}

fn compute_checkpoint_id(
    parent: Option<CheckpointId>,
    prepared: &[PreparedSession],
) -> Result<CheckpointId, EntireError> {
    let session_ids: Vec<String> =
        prepared.iter().map(|p| p.session.session_id.to_string()).collect();
    let header = canonical_json(&serde_json::json!({ "parent": parent, "sessions": session_ids }))?;

    let mut combined_files = Vec::new();
    let mut combined_tail = Vec::new();
    for (n, p) in prepared.iter().enumerate() {
        for (path, contents) in &p.files {
            combined_files.push((format!("session-{n}/{path}"), contents.clone()));
        }
        combined_tail.extend_from_slice(&p.metadata_bytes);
        combined_tail.extend_from_slice(&p.transcript_bytes);
    }
    Ok(checkpoint_id(&header, &combined_files, &combined_tail))
}

/// Whether an already-written checkpoint at `existing_tree` (the tree half
/// of [`find_checkpoint`]'s result) holds different session content than
/// `prepared` — the guard against a genuine CheckpointID collision (two
/// different payloads hashing to the same 12 hex characters) silently
/// overwriting one another on the metadata branch.
fn existing_checkpoint_payload_differs(
    repo: &dyn GitRepo,
    existing_tree: GitOid,
    prepared: &[PreparedSession],
) -> Result<bool, EntireError> {
    let existing_session_count = repo
        .read_tree(existing_tree)?
        .into_iter()
        .filter(|e| e.mode == EntryMode::Tree && e.name.starts_with("session-"))
        .count();
    if existing_session_count != prepared.len() {
        return Ok(true);
    }

    for (n, p) in prepared.iter().enumerate() {
        let session_prefix = format!("session-{n}");
        let Some(session_dir) = find_named(repo, existing_tree, &session_prefix)? else {
            return Ok(true);
        };
        let Some(metadata_entry) = find_named(repo, session_dir.oid, "metadata.json")? else {
            return Ok(true);
        };
        if repo.read_blob(metadata_entry.oid)? != p.metadata_bytes {
            return Ok(true);
        }

        let is_opencode = p.session.agent_name == "opencode";
        let transcript_name = if is_opencode { "transcript.json" } else { "transcript.jsonl" };
        let transcript_bytes = match find_named(repo, session_dir.oid, transcript_name)? {
            Some(entry) => repo.read_blob(entry.oid)?,
            None => Vec::new(),
        };
        if transcript_bytes != p.transcript_bytes {
            return Ok(true);
        }

        let mut existing_files = BTreeMap::new();
        if let Some(files_dir) = find_named(repo, session_dir.oid, "files")? {
            collect_files(repo, files_dir.oid, String::new(), &mut existing_files)?;
        }
        if existing_files.len() != p.files.len() {
            return Ok(true);
        }
        for (path, contents) in &p.files {
            let Some(oid) = existing_files.get(path) else { return Ok(true) };
            if repo.read_blob(*oid)? != *contents {
                return Ok(true);
            }
        }
    }
    Ok(false)
}

fn read_latest_checkpoint_id(repo: &dyn GitRepo, tip: GitOid) -> Result<Option<CheckpointId>, EntireError> {
    Ok(list_rewind_points(repo, tip, 1)?.into_iter().next().map(|rp| rp.id))
}

/// Walk the metadata branch's commit history starting at `tip`, returning up
/// to `limit` [`RewindPoint`]s, most recent first.
///
/// Each metadata-branch commit adds exactly the shard entries for the
/// checkpoint(s) it introduced; the new `checkpoint.json` blob(s) at each
/// commit are found by diffing against the parent commit's tree, rather than
/// by scanning the (cumulative, ever-growing) full tree.
///
/// # Errors
/// Returns [`EntireError::Git`] or [`EntireError::Serde`] if history or
/// checkpoint records cannot be read.
pub fn list_rewind_points(
    repo: &dyn GitRepo,
    tip: GitOid,
    limit: usize,
) -> Result<Vec<RewindPoint>, EntireError> {
    let mut out = Vec::new();
    let mut current = Some(tip);
    while let Some(oid) = current {
        if out.len() >= limit {
            break;
        }
        let commit = repo.read_commit(oid)?;
        let parent = commit.parents.first().copied();
        let parent_tree = parent.map(|p| repo.read_commit(p)).transpose()?.map(|c| c.tree_oid);
        let diff = repo.diff_trees(parent_tree, commit.tree_oid)?;

        for entry in &diff {
            if entry.change_type != ChangeType::Added || !entry.path.ends_with("/checkpoint.json") {
                continue;
            }
            let bytes = repo.read_blob(entry.new_oid)?;
            let checkpoint: Checkpoint = serde_json::from_slice(&bytes)?;
            let prefix = entry.path.trim_end_matches("checkpoint.json");
            let modified_files: Vec<String> = diff
                .iter()
                .filter(|e| {
                    e.change_type == ChangeType::Added
                        && e.path.starts_with(prefix)
                        && e.path.contains("/files/")
                })
                .map(|e| e.path.clone())
                .collect();
            let session = checkpoint.sessions.first();
            out.push(RewindPoint {
                id: checkpoint.id,
                message: checkpoint.summary.clone().unwrap_or_else(|| commit.message.clone()),
                when: checkpoint.when,
                modified_files,
                is_task_boundary: checkpoint.summary.is_some(),
                session_id: session.map_or_else(|| SessionId::new("unknown").unwrap(), |s| s.session_id.clone()),
                agent_name: session.map_or_else(|| "unknown".to_owned(), |s| s.agent_name.clone()),
            });
        }
        current = parent;
    }
    Ok(out)
}

/// Locate a specific checkpoint's record and the tree containing its
/// `session-<n>/` subtrees, by walking directly to its shard path rather
/// than scanning history.
///
/// # Errors
/// Returns [`EntireError::Git`] or [`EntireError::Serde`] if the tree cannot
/// be read or the record fails to parse.
pub fn find_checkpoint(
    repo: &dyn GitRepo,
    metadata_tip: GitOid,
    id: CheckpointId,
) -> Result<Option<(Checkpoint, GitOid)>, EntireError> {
    let root_tree = repo.read_commit(metadata_tip)?.tree_oid;
    let Some(shard_entry) = find_named(repo, root_tree, id.shard())? else { return Ok(None) };
    let Some(rest_entry) = find_named(repo, shard_entry.oid, id.rest())? else { return Ok(None) };
    let Some(leaf) = find_named(repo, rest_entry.oid, "checkpoint.json")? else { return Ok(None) };
    let bytes = repo.read_blob(leaf.oid)?;
    let checkpoint: Checkpoint = serde_json::from_slice(&bytes)?;
    Ok(Some((checkpoint, rest_entry.oid)))
}

fn find_named(
    repo: &dyn GitRepo,
    tree: GitOid,
    name: &str,
) -> Result<Option<entire_git::TreeEntry>, EntireError> {
    Ok(repo.read_tree(tree)?.into_iter().find(|e| e.name == name))
}

/// Every file under a checkpoint's `session-<n>/files/` subtrees, relative
/// to the worktree root, with the blob that holds each one's contents.
///
/// # Errors
/// Returns [`EntireError::Git`] if the tree cannot be walked.
pub fn checkpoint_files(
    repo: &dyn GitRepo,
    checkpoint_tree: GitOid,
) -> Result<Vec<(String, GitOid)>, EntireError> {
    let mut out = BTreeMap::new();
    for entry in repo.read_tree(checkpoint_tree)? {
        if entry.mode != EntryMode::Tree || !entry.name.starts_with("session-") {
            continue;
        }
        if let Some(files_dir) = find_named(repo, entry.oid, "files")? {
            collect_files(repo, files_dir.oid, String::new(), &mut out)?;
        }
    }
    Ok(out.into_iter().collect())
}

fn collect_files(
    repo: &dyn GitRepo,
    tree: GitOid,
    prefix: String,
    out: &mut BTreeMap<String, GitOid>,
) -> Result<(), EntireError> {
    for entry in repo.read_tree(tree)? {
        let path = if prefix.is_empty() { entry.name.clone() } else { format!("{prefix}/{}", entry.name) };
        if entry.mode == EntryMode::Tree {
            collect_files(repo, entry.oid, path, out)?;
        } else {
            out.insert(path, entry.oid);
        }
    }
    Ok(())
}

/// Every file under a plain worktree-shaped tree (e.g. a shadow-branch
/// turn commit), excluding entire's own `.entire/` metadata directory.
///
/// Used for within-session rewind to an earlier turn, before the session
/// has been condensed onto the metadata branch.
///
/// # Errors
/// Returns [`EntireError::Git`] if the tree cannot be walked.
pub fn worktree_files(repo: &dyn GitRepo, tree: GitOid) -> Result<Vec<(String, GitOid)>, EntireError> {
    let mut out = BTreeMap::new();
    collect_worktree_files(repo, tree, String::new(), &mut out)?;
    Ok(out.into_iter().collect())
}

fn collect_worktree_files(
    repo: &dyn GitRepo,
    tree: GitOid,
    prefix: String,
    out: &mut BTreeMap<String, GitOid>,
) -> Result<(), EntireError> {
    for entry in repo.read_tree(tree)? {
        let path = if prefix.is_empty() { entry.name.clone() } else { format!("{prefix}/{}", entry.name) };
        if entry.mode == EntryMode::Tree {
            if entry.name == ".entire" {
                continue;
            }
            collect_worktree_files(repo, entry.oid, path, out)?;
        } else {
            out.insert(path, entry.oid);
        }
    }
    Ok(())
}

/// Error returned by [`rewind`] when some files were restored before a
/// failure occurred, so the caller knows the worktree is in a mixed state.
#[derive(Debug, thiserror::Error)]
#[error("rewind partially completed: {restored} of {total} files restored before failing: {message}")]
pub struct PartialRewind {
    /// Files successfully restored/removed before the failure.
    pub restored: usize,
    /// Total files that were to be restored or removed.
    pub total: usize,
    /// The underlying error.
    pub message: String,
}

/// Restore a worktree to a rewind point.
///
/// `restore` is every `(path, blob)` pair that must exist with that exact
/// content at the target point; `delete` is every path that must not exist
/// (present now, absent at the target — e.g. a file created in a later
/// turn). Restoration is transactional at the file-set boundary: the first
/// I/O failure stops the walk and reports how much had already completed.
///
/// # Errors
/// Returns [`PartialRewind`] if a failure occurs partway through, so the
/// caller can report exactly how much of the restore succeeded.
pub fn rewind(
    repo: &dyn GitRepo,
    restore: &[(String, GitOid)],
    delete: &[String],
    worktree_root: &Path,
) -> Result<(), PartialRewind> {
    let total = restore.len() + delete.len();
    let mut done = 0;

    for (path, oid) in restore {
        if let Err(err) = restore_one_file(repo, *oid, path, worktree_root) {
            return Err(PartialRewind { restored: done, total, message: err.to_string() });
        }
        done += 1;
    }
    for path in delete {
        let dest = worktree_root.join(path);
        if dest.exists() {
            if let Err(err) = std::fs::remove_file(&dest) {
                return Err(PartialRewind { restored: done, total, message: err.to_string() });
            }
        }
        done += 1;
    }
    Ok(())
}

fn restore_one_file(repo: &dyn GitRepo, oid: GitOid, path: &str, worktree_root: &Path) -> Result<(), EntireError> {
    let bytes = repo.read_blob(oid)?;
    let dest = worktree_root.join(path);
    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(dest, bytes)?;
    Ok(())
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
        let repo = GixRepo::open(dir.path()).unwrap();
        (dir, repo)
    }

    fn sample_session() -> SessionRecord {
        SessionRecord {
            session_id: SessionId::new("s1").unwrap(),
            agent_name: "claude-code".to_owned(),
            agent_session_id: None,
            first_prompt: Some("do the thing".to_owned()),
            started_at: std::time::SystemTime::UNIX_EPOCH,
            token_usage: None,
        }
    }

    #[test]
    fn write_shadow_checkpoint_then_condense_roundtrips() {
        let (dir, repo) = init_repo();
        let session_id = SessionId::new("s1").unwrap();
        let mut shadow = ShadowBranchState {
            ref_name: "refs/heads/entire/session/s1".to_owned(),
            tip: None,
            base: GitOid::ZERO,
        };
        let files = vec![TouchedFile { path: "a.txt".to_owned(), contents: b"hello".to_vec() }];
        write_shadow_checkpoint(
            &repo,
            &session_id,
            &mut shadow,
            CheckpointKind::Turn,
            &files,
            b"{\"type\":\"turn\"}\n",
            None,
        )
        .unwrap();
        assert!(shadow.tip.is_some());

        let config = Config::default();
        let checkpoint = condense_to_metadata_branch(
            &repo,
            &sample_session(),
            &shadow,
            &["a.txt".to_owned()],
            Some("did the thing".to_owned()),
            &config,
        )
        .unwrap();

        let metadata_ref = RefName::new(METADATA_BRANCH).unwrap();
        let tip = repo.read_ref(&metadata_ref).unwrap().unwrap();
        let points = list_rewind_points(&repo, tip, 10).unwrap();
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].id, checkpoint.id);
        assert_eq!(points[0].modified_files.len(), 1);

        let (found, checkpoint_tree) = find_checkpoint(&repo, tip, checkpoint.id).unwrap().unwrap();
        assert_eq!(found.id, checkpoint.id);
        let files = checkpoint_files(&repo, checkpoint_tree).unwrap();
        assert_eq!(files, vec![("a.txt".to_owned(), files[0].1)]);

        let worktree = dir.path();
        rewind(&repo, &files, &[], worktree).unwrap();
        let restored = std::fs::read(worktree.join("a.txt")).unwrap();
        assert_eq!(restored, b"hello");
    }

    #[test]
    fn condense_is_deterministic_for_identical_input() {
        let (_dir, repo) = init_repo();
        let session_id = SessionId::new("s1").unwrap();
        let mut shadow = ShadowBranchState {
            ref_name: "refs/heads/entire/session/s1".to_owned(),
            tip: None,
            base: GitOid::ZERO,
        };
        let files = vec![TouchedFile { path: "a.txt".to_owned(), contents: b"hello".to_vec() }];
        write_shadow_checkpoint(&repo, &session_id, &mut shadow, CheckpointKind::Turn, &files, b"t\n", None).unwrap();

        let config = Config::default();
        let first =
            condense_to_metadata_branch(&repo, &sample_session(), &shadow, &["a.txt".to_owned()], None, &config)
                .unwrap();

        let mut shadow2 = ShadowBranchState {
            ref_name: "refs/heads/entire/session/s2".to_owned(),
            tip: None,
            base: GitOid::ZERO,
        };
        let session_id2 = SessionId::new("s2").unwrap();
        write_shadow_checkpoint(&repo, &session_id2, &mut shadow2, CheckpointKind::Turn, &files, b"t\n", None).unwrap();
        let mut session2 = sample_session();
        session2.session_id = SessionId::new("s1").unwrap();
        let second =
            condense_to_metadata_branch(&repo, &session2, &shadow2, &["a.txt".to_owned()], None, &config).unwrap();

        assert_ne!(first.id, second.id, "differing parent checkpoints must change the id");
    }

    #[test]
    fn condense_sessions_pools_multiple_sessions_under_one_commit() {
        let (_dir, repo) = init_repo();
        let mut shadow_a = ShadowBranchState {
            ref_name: "refs/heads/entire/session/a".to_owned(),
            tip: None,
            base: GitOid::ZERO,
        };
        let sid_a = SessionId::new("a").unwrap();
        let files_a = vec![TouchedFile { path: "a.txt".to_owned(), contents: b"from a".to_vec() }];
        write_shadow_checkpoint(&repo, &sid_a, &mut shadow_a, CheckpointKind::Turn, &files_a, b"a\n", None).unwrap();

        let mut shadow_b = ShadowBranchState {
            ref_name: "refs/heads/entire/session/b".to_owned(),
            tip: None,
            base: GitOid::ZERO,
        };
        let sid_b = SessionId::new("b").unwrap();
        let files_b = vec![TouchedFile { path: "b.txt".to_owned(), contents: b"from b".to_vec() }];
        write_shadow_checkpoint(&repo, &sid_b, &mut shadow_b, CheckpointKind::Turn, &files_b, b"b\n", None).unwrap();

        let mut session_a = sample_session();
        session_a.session_id = sid_a;
        let mut session_b = sample_session();
        session_b.session_id = sid_b;

        let config = Config::default();
        let checkpoint = condense_sessions_to_metadata_branch(
            &repo,
            &[
                CondensationInput {
                    session: session_a,
                    shadow: shadow_a,
                    files_touched: vec!["a.txt".to_owned()],
                    summary: None,
                },
                CondensationInput {
                    session: session_b,
                    shadow: shadow_b,
                    files_touched: vec!["b.txt".to_owned()],
                    summary: None,
                },
            ],
            &config,
        )
        .unwrap();

        assert_eq!(checkpoint.sessions.len(), 2);

        let metadata_ref = RefName::new(METADATA_BRANCH).unwrap();
        let tip = repo.read_ref(&metadata_ref).unwrap().unwrap();
        let (_found, tree) = find_checkpoint(&repo, tip, checkpoint.id).unwrap().unwrap();
        let mut files = checkpoint_files(&repo, tree).unwrap();
        files.sort();
        assert_eq!(files.iter().map(|(p, _)| p.as_str()).collect::<Vec<_>>(), vec!["a.txt", "b.txt"]);
    }

    #[test]
    fn shadow_checkpoint_writes_transcript_under_metadata_dir() {
        let (_dir, repo) = init_repo();
        let session_id = SessionId::new("s1").unwrap();
        let mut shadow = ShadowBranchState {
            ref_name: "refs/heads/entire/session/s1".to_owned(),
            tip: None,
            base: GitOid::ZERO,
        };
        write_shadow_checkpoint(&repo, &session_id, &mut shadow, CheckpointKind::Turn, &[], b"{}\n", None)
            .unwrap();

        let tree = repo_tree_of(&repo, shadow.tip.unwrap()).unwrap().unwrap();
        let bytes = read_existing_blob(&repo, tree, ".entire/metadata/s1/transcript.jsonl").unwrap();
        assert_eq!(bytes, b"{}\n");
    }

    #[test]
    fn subagent_checkpoint_writes_task_record_under_tasks_dir() {
        let (_dir, repo) = init_repo();
        let session_id = SessionId::new("s1").unwrap();
        let tool_use_id = crate::ToolUseId::new("t1").unwrap();
        let mut shadow = ShadowBranchState {
            ref_name: "refs/heads/entire/session/s1".to_owned(),
            tip: None,
            base: GitOid::ZERO,
        };
        let files = vec![TouchedFile { path: "sub.txt".to_owned(), contents: b"x".to_vec() }];
        write_shadow_checkpoint(
            &repo,
            &session_id,
            &mut shadow,
            CheckpointKind::Subagent,
            &files,
            b"",
            Some(&tool_use_id),
        )
        .unwrap();

        let tree = repo_tree_of(&repo, shadow.tip.unwrap()).unwrap().unwrap();
        let checkpoint_bytes =
            read_existing_blob(&repo, tree, ".entire/metadata/s1/tasks/t1/checkpoint.json").unwrap();
        let record: TaskCheckpointRecord = serde_json::from_slice(&checkpoint_bytes).unwrap();
        assert_eq!(record.tool_use_id, "t1");
        assert_eq!(record.files_touched, vec!["sub.txt".to_owned()]);

        let incremental =
            read_existing_blob(&repo, tree, ".entire/metadata/s1/tasks/t1/checkpoints/000-t1.json").unwrap();
        assert_eq!(incremental, checkpoint_bytes);

        // A second subagent checkpoint for the same task appends a new
        // incremental entry rather than overwriting the first one.
        write_shadow_checkpoint(
            &repo,
            &session_id,
            &mut shadow,
            CheckpointKind::Subagent,
            &files,
            b"",
            Some(&tool_use_id),
        )
        .unwrap();
        let tree = repo_tree_of(&repo, shadow.tip.unwrap()).unwrap().unwrap();
        assert!(
            read_existing_blob(&repo, tree, ".entire/metadata/s1/tasks/t1/checkpoints/000-t1.json")
                .unwrap()
                .len()
                > 0
        );
        assert!(
            read_existing_blob(&repo, tree, ".entire/metadata/s1/tasks/t1/checkpoints/001-t1.json")
                .unwrap()
                .len()
                > 0
        );
    }

    #[test]
    fn existing_checkpoint_payload_differs_flags_changed_file_contents() {
        let (_dir, repo) = init_repo();
        let session_id = SessionId::new("s1").unwrap();
        let mut shadow = ShadowBranchState {
            ref_name: "refs/heads/entire/session/s1".to_owned(),
            tip: None,
            base: GitOid::ZERO,
        };
        let files = vec![TouchedFile { path: "a.txt".to_owned(), contents: b"hello".to_vec() }];
        write_shadow_checkpoint(&repo, &session_id, &mut shadow, CheckpointKind::Turn, &files, b"t\n", None)
            .unwrap();

        let config = Config::default();
        let checkpoint =
            condense_to_metadata_branch(&repo, &sample_session(), &shadow, &["a.txt".to_owned()], None, &config)
                .unwrap();

        let metadata_ref = RefName::new(METADATA_BRANCH).unwrap();
        let tip = repo.read_ref(&metadata_ref).unwrap().unwrap();
        let (_found, existing_tree) = find_checkpoint(&repo, tip, checkpoint.id).unwrap().unwrap();

        let matching = vec![PreparedSession {
            session: sample_session(),
            metadata_bytes: canonical_json(&sample_session()).unwrap(),
            transcript_bytes: b"t\n".to_vec(),
            files: vec![("a.txt".to_owned(), b"hello".to_vec())],
        }];
        assert!(!existing_checkpoint_payload_differs(&repo, existing_tree, &matching).unwrap());

        let differing = vec![PreparedSession {
            session: sample_session(),
            metadata_bytes: canonical_json(&sample_session()).unwrap(),
            transcript_bytes: b"t\n".to_vec(),
            files: vec![("a.txt".to_owned(), b"goodbye".to_vec())],
        }];
        assert!(existing_checkpoint_payload_differs(&repo, existing_tree, &differing).unwrap());

        let missing_session = vec![
            matching[0].clone(),
            PreparedSession {
                session: sample_session(),
                metadata_bytes: canonical_json(&sample_session()).unwrap(),
                transcript_bytes: Vec::new(),
                files: Vec::new(),
            },
        ];
        assert!(existing_checkpoint_payload_differs(&repo, existing_tree, &missing_session).unwrap());
    }

    #[test]
    fn condense_accepts_reusing_the_same_shard_when_payload_is_identical() {
        // Re-condensing a session onto a *fresh* metadata branch with
        // byte-identical inputs lands on the same id with the same payload —
        // the collision guard must not treat this idempotent recompute as a
        // collision.
        let (_dir, repo) = init_repo();
        let session_id = SessionId::new("s1").unwrap();
        let mut shadow = ShadowBranchState {
            ref_name: "refs/heads/entire/session/s1".to_owned(),
            tip: None,
            base: GitOid::ZERO,
        };
        let files = vec![TouchedFile { path: "a.txt".to_owned(), contents: b"hello".to_vec() }];
        write_shadow_checkpoint(&repo, &session_id, &mut shadow, CheckpointKind::Turn, &files, b"t\n", None)
            .unwrap();

        let config = Config::default();
        let checkpoint =
            condense_to_metadata_branch(&repo, &sample_session(), &shadow, &["a.txt".to_owned()], None, &config)
                .unwrap();

        let metadata_ref = RefName::new(METADATA_BRANCH).unwrap();
        let tip = repo.read_ref(&metadata_ref).unwrap().unwrap();
        let (_found, existing_tree) = find_checkpoint(&repo, tip, checkpoint.id).unwrap().unwrap();

        let prepared = vec![PreparedSession {
            session: sample_session(),
            metadata_bytes: canonical_json(&sample_session()).unwrap(),
            transcript_bytes: b"t\n".to_vec(),
            files: vec![("a.txt".to_owned(), b"hello".to_vec())],
        }];
        assert!(!existing_checkpoint_payload_differs(&repo, existing_tree, &prepared).unwrap());
    }
}
