//! The [`Agent`] trait — the contract every adapter (Claude Code, Cursor,
//! Gemini, OpenCode, Windsurf) implements.
//!
//! Optional capabilities are declared explicitly rather than probed at
//! runtime with a downcast: an `Agent`
//! returns `Option<&dyn TranscriptAnalyzer>` etc. from plain accessor
//! methods, so "does this agent support token accounting" is a property you
//! read, not a type you guess at and try to cast to.

use std::path::{Path, PathBuf};

use entire_core::Event;

use crate::error::AgentError;
use entire_core::TokenUsage;

/// Context an adapter needs to install, uninstall, or probe its hooks in a
/// worktree. Threaded explicitly rather than read from a global, per the
/// spec's context-propagation design note.
#[derive(Clone, Debug)]
pub struct HookInstallContext {
    /// Absolute path to the worktree root the hooks should be installed into.
    pub worktree_root: PathBuf,
    /// The command used to invoke entire's own hook entry point (normally
    /// `"entire"`, overridable for local development against an unreleased
    /// build — see `local_dev` on [`HookSupport::install_hooks`]).
    pub entire_command: String,
}

/// The per-agent capability interface. One implementation per supported
/// agent; registered into an [`crate::registry::AgentRegistry`] at process
/// startup, never self-registered via `init()` side effects.
pub trait Agent: Send + Sync {
    /// Registry key, e.g. `"claude-code"`. Stable, used in ref names,
    /// session-state file names (indirectly, via the session id's owner),
    /// and CLI argv verbs (`entire hooks <name> <hook>`).
    fn name(&self) -> &'static str;

    /// Human-facing label, e.g. `"Claude Code"`. Never used as a lookup key.
    fn display_name(&self) -> &'static str;

    /// Whether this agent appears to be in use in `worktree_root` (its
    /// config directory or session directory exists).
    fn detect_presence(&self, worktree_root: &Path) -> bool;

    /// Where this agent stores its own session/transcript files for a given
    /// worktree.
    fn session_dir(&self, worktree_root: &Path) -> PathBuf;

    /// Resolve the transcript file path for `agent_session_id` within
    /// `dir` (the result of [`Self::session_dir`]).
    fn resolve_session_file(&self, dir: &Path, agent_session_id: &str) -> PathBuf;

    /// Read the raw bytes of a transcript file.
    ///
    /// # Errors
    /// Returns [`AgentError::Io`] if the file cannot be read.
    fn read_transcript(&self, path: &Path) -> Result<Vec<u8>, AgentError>;

    /// Write bytes to a transcript/session file, e.g. to truncate it during
    /// a rewind. Agents that cannot truncate their own transcript (no
    /// `TranscriptAnalyzer`) may implement this as a no-op.
    ///
    /// # Errors
    /// Returns [`AgentError::Io`] if the file cannot be written.
    fn write_session(&self, path: &Path, bytes: &[u8]) -> Result<(), AgentError>;

    /// Split raw transcript bytes into chunks no larger than `max_size`,
    /// except where a single atomic unit (line or message) exceeds it.
    fn chunk_transcript(&self, bytes: &[u8], max_size: usize) -> Vec<Vec<u8>>;

    /// Inverse of [`Self::chunk_transcript`]: reproduce the original bytes
    /// from a chunk sequence.
    fn reassemble_transcript(&self, chunks: &[Vec<u8>]) -> Vec<u8>;

    /// Build the shell command a user would run to resume a session from
    /// `checkpoint_id` in this agent, for display purposes.
    fn format_resume_command(&self, checkpoint_id: &str) -> String;

    /// Directories under the worktree root this agent owns and that
    /// checkpoint restoration must never overwrite or delete into (e.g. the
    /// agent's own config directory).
    fn protected_dirs(&self) -> &'static [&'static str];

    /// The hook event names this adapter understands, as they appear in
    /// `argv[2]` of `entire hooks <agent> <hook-name>`.
    fn hook_names(&self) -> &'static [&'static str];

    /// Translate one hook invocation's stdin payload into a normalized
    /// [`Event`]. Returns `Ok(None)` for a recognized-but-inert hook name
    /// (no error) and for any `hook_name` not in [`Self::hook_names`].
    ///
    /// # Errors
    /// Returns [`AgentError::MalformedHook`] if `hook_name` is one this
    /// adapter claims to support but `input` doesn't match the expected
    /// shape.
    fn parse_hook_event(&self, hook_name: &str, input: &[u8]) -> Result<Option<Event>, AgentError>;

    /// This agent's transcript-introspection capability, if it has one.
    /// `None` means modified-file/prompt extraction must fall back to an
    /// out-of-core mechanism (e.g. `git status`), per the Cursor IDE note.
    fn transcript_analyzer(&self) -> Option<&dyn TranscriptAnalyzer> {
        None
    }

    /// This agent's token-accounting capability, if it reports usage at all.
    fn token_calculator(&self) -> Option<&dyn TokenCalculator> {
        None
    }

    /// This agent's hook install/uninstall capability, if its hooks are
    /// installed through a JSON config file entire can read-modify-write.
    fn hook_support(&self) -> Option<&dyn HookSupport> {
        None
    }

    /// Record one hook invocation's raw payload into a transcript entire
    /// itself assembles, for agents whose hook stream *is* the transcript
    /// (Windsurf) rather than a side channel onto a file the agent already
    /// maintains. A no-op default for every other agent.
    ///
    /// # Errors
    /// Returns [`AgentError::Io`] if the transcript cannot be appended to.
    fn capture_hook_payload(
        &self,
        worktree_root: &Path,
        hook_name: &str,
        input: &[u8],
    ) -> Result<(), AgentError> {
        let _ = (worktree_root, hook_name, input);
        Ok(())
    }
}

/// Optional capability: incremental extraction from an agent's transcript.
pub trait TranscriptAnalyzer: Send + Sync {
    /// Current length of the transcript, in the unit this agent measures
    /// position by (byte offset for line-oriented agents, message index for
    /// OpenCode).
    ///
    /// # Errors
    /// Returns [`AgentError::Io`] if the transcript cannot be read.
    fn transcript_position(&self, path: &Path) -> Result<u64, AgentError>;

    /// Paths of files the agent modified since `from_offset`, plus the new
    /// offset to resume from next time. Returns an empty file list (not an
    /// error) for transcripts with no tool-use blocks (e.g. Cursor IDE).
    ///
    /// # Errors
    /// Returns [`AgentError::Io`] if the transcript cannot be read.
    fn extract_modified_files(
        &self,
        path: &Path,
        from_offset: u64,
    ) -> Result<(Vec<String>, u64), AgentError>;

    /// User prompts issued since `from_offset`.
    ///
    /// # Errors
    /// Returns [`AgentError::Io`] if the transcript cannot be read.
    fn extract_prompts(&self, path: &Path, from_offset: u64) -> Result<Vec<String>, AgentError>;

    /// A short agent-generated summary of the session, if the transcript
    /// carries one (e.g. a `type: "summary"` line).
    ///
    /// # Errors
    /// Returns [`AgentError::Io`] if the transcript cannot be read.
    fn extract_summary(&self, path: &Path) -> Result<Option<String>, AgentError>;
}

/// Optional capability: token-usage accounting.
pub trait TokenCalculator: Send + Sync {
    /// Compute token usage from the transcript bytes since `from_offset`.
    ///
    /// Returns `None` when the agent's transcript format carries no usage
    /// data at all — distinct from `Some(TokenUsage::default())`, which
    /// means the agent reports usage and it happened to be zero.
    fn calculate_token_usage(&self, transcript_bytes: &[u8], from_offset: u64) -> Option<TokenUsage>;
}

/// Optional capability: installing/uninstalling entire's hooks into the
/// agent's own JSON hook-config format.
pub trait HookSupport: Send + Sync {
    /// Install entire's hooks into this agent's config, preserving every
    /// unknown top-level field and unknown hook type already present.
    ///
    /// Returns the number of hook entries written. A second call with the
    /// same arguments must return `0` and leave the file byte-identical
    /// (modulo canonical JSON formatting) — installation is idempotent.
    ///
    /// `local_dev` substitutes a local build's invocation in place of the
    /// released `entire` binary name; `force` overwrites a previously
    /// installed hook entry that a user has since edited.
    ///
    /// # Errors
    /// Returns [`AgentError::Io`] or [`AgentError::InvalidHookConfig`] if
    /// the config file cannot be read, parsed, or written.
    fn install_hooks(
        &self,
        ctx: &HookInstallContext,
        local_dev: bool,
        force: bool,
    ) -> Result<usize, AgentError>;

    /// Remove entire's hook entries from this agent's config, leaving every
    /// other entry untouched.
    ///
    /// # Errors
    /// Returns [`AgentError::Io`] or [`AgentError::InvalidHookConfig`] if
    /// the config file cannot be read, parsed, or written.
    fn uninstall_hooks(&self, ctx: &HookInstallContext) -> Result<(), AgentError>;

    /// Whether entire's hooks currently appear in this agent's config.
    ///
    /// # Errors
    /// Returns [`AgentError::Io`] or [`AgentError::InvalidHookConfig`] if
    /// the config file cannot be read or parsed.
    fn are_hooks_installed(&self, ctx: &HookInstallContext) -> Result<bool, AgentError>;
}
