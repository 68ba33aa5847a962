//! Windsurf adapter.
//!
//! Windsurf has no transcript file of its own; every hook invocation's
//! payload carries `agent_action_name` (`pre_user_prompt`, `post_write_code`,
//! `post_cascade_response`) and a `trajectory_id`. This adapter treats the
//! hook stream itself as the transcript, appending each raw payload line to
//! a file keyed by `trajectory_id` via [`Agent::capture_hook_payload`].

use std::path::{Path, PathBuf};

use entire_core::{Event, SessionId};
use serde::Deserialize;
use serde_json::Value;

use crate::agent::{Agent, HookInstallContext, HookSupport, TranscriptAnalyzer};
use crate::error::AgentError;
use crate::hook_json;

const HOOK_NAMES: &[&str] = &["pre_user_prompt", "post_write_code", "post_cascade_response"];

#[derive(Deserialize)]
struct HookPayload {
    trajectory_id: Option<String>,
    #[serde(default)]
    prompt: Option<String>,
}

/// Adapter for Windsurf.
pub struct WindsurfAgent;

impl WindsurfAgent {
    fn hooks_path(worktree_root: &Path) -> PathBuf {
        worktree_root.join(".windsurf").join("hooks.json")
    }

    fn trajectory_path(&self, worktree_root: &Path, trajectory_id: &str) -> PathBuf {
        self.session_dir(worktree_root).join(format!("{trajectory_id}.jsonl"))
    }
}

impl Agent for WindsurfAgent {
    fn name(&self) -> &'static str {
        "windsurf"
    }

    fn display_name(&self) -> &'static str {
        "Windsurf"
    }

    fn detect_presence(&self, worktree_root: &Path) -> bool {
        worktree_root.join(".windsurf").is_dir()
    }

    fn session_dir(&self, worktree_root: &Path) -> PathBuf {
        worktree_root.join(".windsurf").join("trajectories")
    }

    fn resolve_session_file(&self, dir: &Path, agent_session_id: &str) -> PathBuf {
        dir.join(format!("{agent_session_id}.jsonl"))
    }

    fn read_transcript(&self, path: &Path) -> Result<Vec<u8>, AgentError> {
        match std::fs::read(path) {
            Ok(bytes) => Ok(bytes),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(err) => Err(err.into()),
        }
    }

    fn write_session(&self, path: &Path, bytes: &[u8]) -> Result<(), AgentError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(std::fs::write(path, bytes)?)
    }

    fn chunk_transcript(&self, bytes: &[u8], max_size: usize) -> Vec<Vec<u8>> {
        crate::chunk::chunk_jsonl(bytes, max_size)
    }

    fn reassemble_transcript(&self, chunks: &[Vec<u8>]) -> Vec<u8> {
        crate::chunk::reassemble_jsonl(chunks)
    }

    fn format_resume_command(&self, checkpoint_id: &str) -> String {
        format!("windsurf --resume {checkpoint_id}")
    }

    fn protected_dirs(&self) -> &'static [&'static str] {
        &[".windsurf"]
    }

    fn hook_names(&self) -> &'static [&'static str] {
        HOOK_NAMES
    }

    fn parse_hook_event(&self, hook_name: &str, input: &[u8]) -> Result<Option<Event>, AgentError> {
        if !HOOK_NAMES.contains(&hook_name) {
            return Ok(None);
        }
        let payload: HookPayload = serde_json::from_slice(input).map_err(|err| AgentError::MalformedHook {
            hook_name: hook_name.to_owned(),
            message: err.to_string(),
        })?;
        let Some(raw_trajectory_id) = payload.trajectory_id else {
            return Err(AgentError::MalformedHook {
                hook_name: hook_name.to_owned(),
                message: "missing `trajectory_id`".to_owned(),
            });
        };
        let session_id = SessionId::new(raw_trajectory_id).map_err(|err| AgentError::MalformedHook {
            hook_name: hook_name.to_owned(),
            message: err.to_string(),
        })?;
        let event = match hook_name {
            "pre_user_prompt" => Event::TurnStart { session_id },
            "post_cascade_response" => Event::TurnEnd { session_id },
            "post_write_code" => return Ok(None),
            _ => return Ok(None),
        };
        let _ = payload.prompt;
        Ok(Some(event))
    }

    fn transcript_analyzer(&self) -> Option<&dyn TranscriptAnalyzer> {
        Some(self)
    }

    fn hook_support(&self) -> Option<&dyn HookSupport> {
        Some(self)
    }

    fn capture_hook_payload(
        &self,
        worktree_root: &Path,
        hook_name: &str,
        input: &[u8],
    ) -> Result<(), AgentError> {
        if !HOOK_NAMES.contains(&hook_name) {
            return Ok(());
        }
        let Ok(Value::Object(payload)) = serde_json::from_slice::<Value>(input) else {
            return Ok(());
        };
        let Some(trajectory_id) = payload.get("trajectory_id").and_then(Value::as_str) else {
            return Ok(());
        };
        let path = self.trajectory_path(worktree_root, trajectory_id);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut existing = self.read_transcript(&path)?;
        existing.extend_from_slice(input);
        if !existing.ends_with(b"\n") {
            existing.push(b'\n');
        }
        self.write_session(&path, &existing)
    }
}

fn jsonl_lines(bytes: &[u8]) -> impl Iterator<Item = &str> {
    std::str::from_utf8(bytes)
        .unwrap_or_default()
        .lines()
        .filter(|line| !line.trim().is_empty())
}

impl TranscriptAnalyzer for WindsurfAgent {
    fn transcript_position(&self, path: &Path) -> Result<u64, AgentError> {
        Ok(self.read_transcript(path)?.len() as u64)
    }

    fn extract_modified_files(
        &self,
        path: &Path,
        from_offset: u64,
    ) -> Result<(Vec<String>, u64), AgentError> {
        let bytes = self.read_transcript(path)?;
        let new_offset = bytes.len() as u64;
        if from_offset >= new_offset {
            return Ok((Vec::new(), new_offset));
        }
        let slice = &bytes[from_offset as usize..];
        let mut files = Vec::new();
        for line in jsonl_lines(slice) {
            let Ok(value) = serde_json::from_str::<Value>(line) else {
                continue;
            };
            if value.get("agent_action_name").and_then(Value::as_str) != Some("post_write_code") {
                continue;
            }
            if let Some(path) = value.get("file_path").and_then(Value::as_str) {
                files.push(path.to_owned());
            }
        }
        files.sort();
        files.dedup();
        Ok((files, new_offset))
    }

    fn extract_prompts(&self, path: &Path, from_offset: u64) -> Result<Vec<String>, AgentError> {
        let bytes = self.read_transcript(path)?;
        if from_offset as usize >= bytes.len() {
            return Ok(Vec::new());
        }
        let slice = &bytes[from_offset as usize..];
        let mut prompts = Vec::new();
        for line in jsonl_lines(slice) {
            let Ok(value) = serde_json::from_str::<Value>(line) else {
                continue;
            };
            if value.get("agent_action_name").and_then(Value::as_str) == Some("pre_user_prompt") {
                if let Some(text) = value.get("prompt").and_then(Value::as_str) {
                    prompts.push(text.to_owned());
                }
            }
        }
        Ok(prompts)
    }

    fn extract_summary(&self, path: &Path) -> Result<Option<String>, AgentError> {
        let bytes = self.read_transcript(path)?;
        for line in jsonl_lines(&bytes).rev() {
            let Ok(value) = serde_json::from_str::<Value>(line) else {
                continue;
            };
            if value.get("agent_action_name").and_then(Value::as_str) == Some("post_cascade_response") {
                return Ok(value
                    .get("response")
                    .and_then(Value::as_str)
                    .map(str::to_owned));
            }
        }
        Ok(None)
    }
}

impl HookSupport for WindsurfAgent {
    fn install_hooks(
        &self,
        ctx: &HookInstallContext,
        local_dev: bool,
        force: bool,
    ) -> Result<usize, AgentError> {
        let path = Self::hooks_path(&ctx.worktree_root);
        let mut root = hook_json::read_json_object(&path)?;
        let hooks = hook_json::hooks_map_mut(&mut root, &path)?;
        let prefix = hook_command_prefix(ctx, local_dev);
        let mut count = 0;
        for action in HOOK_NAMES {
            let command = format!("{prefix} hooks windsurf {action}");
            if force {
                hook_json::remove_hook_commands_matching(hooks, action, |c| c.contains("hooks windsurf"));
            }
            if hook_json::upsert_hook_command(hooks, action, &command, serde_json::Map::new()) {
                count += 1;
            }
        }
        hook_json::write_json_object(&path, &root)?;
        Ok(count)
    }

    fn uninstall_hooks(&self, ctx: &HookInstallContext) -> Result<(), AgentError> {
        let path = Self::hooks_path(&ctx.worktree_root);
        let mut root = hook_json::read_json_object(&path)?;
        let hooks = hook_json::hooks_map_mut(&mut root, &path)?;
        for action in HOOK_NAMES {
            hook_json::remove_hook_commands_matching(hooks, action, |c| c.contains("hooks windsurf"));
        }
        hook_json::write_json_object(&path, &root)
    }

    fn are_hooks_installed(&self, ctx: &HookInstallContext) -> Result<bool, AgentError> {
        let path = Self::hooks_path(&ctx.worktree_root);
        let mut root = hook_json::read_json_object(&path)?;
        let hooks = hook_json::hooks_map_mut(&mut root, &path)?;
        Ok(HOOK_NAMES.iter().all(|action| {
            hooks.get(*action).and_then(Value::as_array).is_some_and(|entries| {
                entries.iter().any(|e| {
                    e.get("command")
                        .and_then(Value::as_str)
                        .is_some_and(|c| c.contains("hooks windsurf"))
                })
            })
        }))
    }
}

fn hook_command_prefix(ctx: &HookInstallContext, local_dev: bool) -> String {
    if local_dev {
        "cargo run -p entire-cli --quiet --".to_owned()
    } else {
        ctx.entire_command.clone()
    }
}
