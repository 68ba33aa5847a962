//! Claude Code adapter.
//!
//! Hook payloads carry `session_id`, `hook_event_name`, `transcript_path`,
//! `cwd`, and (for `PostToolUse`) `tool_name`/`tool_input`/`tool_response`.
//! Transcripts are JSONL, one JSON object per line, `type` one of `user`,
//! `assistant`, `tool_use`, `tool_result`, `summary`.

use std::path::{Path, PathBuf};

use entire_core::{Event, SessionId, TokenUsage};
use serde::Deserialize;
use serde_json::Value;

use crate::agent::{Agent, HookInstallContext, HookSupport, TokenCalculator, TranscriptAnalyzer};
use crate::chunk::{chunk_jsonl, reassemble_jsonl};
use crate::error::AgentError;
use crate::hook_json;

const HOOK_NAMES: &[&str] = &[
    "SessionStart",
    "UserPromptSubmit",
    "PreToolUse",
    "PostToolUse",
    "Stop",
    "SubagentStop",
    "SessionEnd",
    "PreCompact",
];

#[derive(Deserialize)]
struct HookPayload {
    session_id: Option<String>,
    #[serde(default)]
    prompt: Option<String>,
}

/// Adapter for Claude Code.
pub struct ClaudeCodeAgent;

impl ClaudeCodeAgent {
    fn settings_path(worktree_root: &Path) -> PathBuf {
        worktree_root.join(".claude").join("settings.json")
    }
}

impl Agent for ClaudeCodeAgent {
    fn name(&self) -> &'static str {
        "claude-code"
    }

    fn display_name(&self) -> &'static str {
        "Claude Code"
    }

    fn detect_presence(&self, worktree_root: &Path) -> bool {
        worktree_root.join(".claude").is_dir()
    }

    fn session_dir(&self, worktree_root: &Path) -> PathBuf {
        worktree_root.join(".claude").join("projects")
    }

    fn resolve_session_file(&self, dir: &Path, agent_session_id: &str) -> PathBuf {
        dir.join(format!("{agent_session_id}.jsonl"))
    }

    fn read_transcript(&self, path: &Path) -> Result<Vec<u8>, AgentError> {
        Ok(std::fs::read(path)?)
    }

    fn write_session(&self, path: &Path, bytes: &[u8]) -> Result<(), AgentError> {
        Ok(std::fs::write(path, bytes)?)
    }

    fn chunk_transcript(&self, bytes: &[u8], max_size: usize) -> Vec<Vec<u8>> {
        chunk_jsonl(bytes, max_size)
    }

    fn reassemble_transcript(&self, chunks: &[Vec<u8>]) -> Vec<u8> {
        reassemble_jsonl(chunks)
    }

    fn format_resume_command(&self, checkpoint_id: &str) -> String {
        format!("claude --resume {checkpoint_id}")
    }

    fn protected_dirs(&self) -> &'static [&'static str] {
        &[".claude"]
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
        let Some(raw_session_id) = payload.session_id else {
            return Err(AgentError::MalformedHook {
                hook_name: hook_name.to_owned(),
                message: "missing `session_id`".to_owned(),
            });
        };
        let session_id = SessionId::new(raw_session_id).map_err(|err| AgentError::MalformedHook {
            hook_name: hook_name.to_owned(),
            message: err.to_string(),
        })?;
        let event = match hook_name {
            "SessionStart" => Event::SessionStart {
                session_id,
                first_prompt: payload.prompt,
            },
            "UserPromptSubmit" => Event::TurnStart { session_id },
            "Stop" => Event::TurnEnd { session_id },
            "SubagentStop" => Event::SubagentEnd {
                session_id,
                tool_use_id: None,
            },
            "SessionEnd" => Event::SessionEnd { session_id },
            "PreCompact" => Event::Compaction { session_id },
            "PreToolUse" | "PostToolUse" => return Ok(None),
            _ => return Ok(None),
        };
        Ok(Some(event))
    }

    fn transcript_analyzer(&self) -> Option<&dyn TranscriptAnalyzer> {
        Some(self)
    }

    fn token_calculator(&self) -> Option<&dyn TokenCalculator> {
        Some(self)
    }

    fn hook_support(&self) -> Option<&dyn HookSupport> {
        Some(self)
    }
}

fn jsonl_lines(bytes: &[u8]) -> impl Iterator<Item = &str> {
    std::str::from_utf8(bytes)
        .unwrap_or_default()
        .lines()
        .filter(|line| !line.trim().is_empty())
}

impl TranscriptAnalyzer for ClaudeCodeAgent {
    fn transcript_position(&self, path: &Path) -> Result<u64, AgentError> {
        Ok(std::fs::metadata(path).map(|m| m.len()).unwrap_or(0))
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
            if value.get("type").and_then(Value::as_str) != Some("tool_use") {
                continue;
            }
            if let Some(path) = value
                .get("tool_input")
                .and_then(|i| i.get("file_path"))
                .and_then(Value::as_str)
            {
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
            if value.get("type").and_then(Value::as_str) == Some("user") {
                if let Some(text) = value.get("message").and_then(Value::as_str) {
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
            if value.get("type").and_then(Value::as_str) == Some("summary") {
                return Ok(value
                    .get("summary")
                    .and_then(Value::as_str)
                    .map(str::to_owned));
            }
        }
        Ok(None)
    }
}

impl TokenCalculator for ClaudeCodeAgent {
    fn calculate_token_usage(&self, transcript_bytes: &[u8], from_offset: u64) -> Option<TokenUsage> {
        if from_offset as usize >= transcript_bytes.len() {
            return Some(TokenUsage::default());
        }
        let slice = &transcript_bytes[from_offset as usize..];
        let mut usage = TokenUsage::default();
        for line in jsonl_lines(slice) {
            let Ok(value) = serde_json::from_str::<Value>(line) else {
                continue;
            };
            let Some(message_usage) = value.get("message").and_then(|m| m.get("usage")) else {
                continue;
            };
            usage.input_tokens = add(usage.input_tokens, as_u64(message_usage, "input_tokens"));
            usage.output_tokens = add(usage.output_tokens, as_u64(message_usage, "output_tokens"));
            usage.cache_read_tokens = add(
                usage.cache_read_tokens,
                as_u64(message_usage, "cache_read_input_tokens"),
            );
            usage.cache_creation_tokens = add(
                usage.cache_creation_tokens,
                as_u64(message_usage, "cache_creation_input_tokens"),
            );
            usage.api_calls = Some(usage.api_calls.unwrap_or(0) + 1);
        }
        Some(usage)
    }
}

fn as_u64(value: &Value, field: &str) -> Option<u64> {
    value.get(field).and_then(Value::as_u64)
}

fn add(base: Option<u64>, extra: Option<u64>) -> Option<u64> {
    match (base, extra) {
        (None, None) => None,
        (base, extra) => Some(base.unwrap_or(0) + extra.unwrap_or(0)),
    }
}

impl HookSupport for ClaudeCodeAgent {
    fn install_hooks(
        &self,
        ctx: &HookInstallContext,
        local_dev: bool,
        force: bool,
    ) -> Result<usize, AgentError> {
        let path = Self::settings_path(&ctx.worktree_root);
        let mut root = hook_json::read_json_object(&path)?;
        let hooks = hook_json::hooks_map_mut(&mut root, &path)?;
        let prefix = hook_command_prefix(ctx, local_dev);
        let mut count = 0;
        for event in HOOK_NAMES {
            let command = format!("{prefix} hooks claude-code {event}");
            if force {
                hook_json::remove_hook_commands_matching(hooks, event, |c| c.contains("hooks claude-code"));
            }
            if hook_json::upsert_hook_command(hooks, event, &command, serde_json::Map::new()) {
                count += 1;
            }
        }
        hook_json::write_json_object(&path, &root)?;
        Ok(count)
    }

    fn uninstall_hooks(&self, ctx: &HookInstallContext) -> Result<(), AgentError> {
        let path = Self::settings_path(&ctx.worktree_root);
        let mut root = hook_json::read_json_object(&path)?;
        let hooks = hook_json::hooks_map_mut(&mut root, &path)?;
        for event in HOOK_NAMES {
            hook_json::remove_hook_commands_matching(hooks, event, |c| c.contains("hooks claude-code"));
        }
        hook_json::write_json_object(&path, &root)
    }

    fn are_hooks_installed(&self, ctx: &HookInstallContext) -> Result<bool, AgentError> {
        let path = Self::settings_path(&ctx.worktree_root);
        let mut root = hook_json::read_json_object(&path)?;
        let hooks = hook_json::hooks_map_mut(&mut root, &path)?;
        Ok(HOOK_NAMES
            .iter()
            .all(|event| hooks.get(*event).and_then(Value::as_array).is_some_and(|entries| {
                entries
                    .iter()
                    .any(|e| e.get("command").and_then(Value::as_str).is_some_and(|c| c.contains("hooks claude-code")))
            })))
    }
}

fn hook_command_prefix(ctx: &HookInstallContext, local_dev: bool) -> String {
    if local_dev {
        "cargo run -p entire-cli --quiet --".to_owned()
    } else {
        ctx.entire_command.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_session_start() {
        let agent = ClaudeCodeAgent;
        let input = br#"{"session_id":"abc-123","hook_event_name":"SessionStart","prompt":"hi"}"#;
        let event = agent.parse_hook_event("SessionStart", input).unwrap().unwrap();
        assert_eq!(
            event,
            Event::SessionStart {
                session_id: SessionId::new("abc-123").unwrap(),
                first_prompt: Some("hi".to_owned()),
            }
        );
    }

    #[test]
    fn unknown_hook_name_returns_none() {
        let agent = ClaudeCodeAgent;
        assert!(agent.parse_hook_event("NotAHook", b"{}").unwrap().is_none());
    }

    #[test]
    fn missing_session_id_is_malformed() {
        let agent = ClaudeCodeAgent;
        let err = agent.parse_hook_event("Stop", b"{}").unwrap_err();
        assert!(matches!(err, AgentError::MalformedHook { .. }));
    }

    #[test]
    fn pre_and_post_tool_use_are_inert() {
        let agent = ClaudeCodeAgent;
        let input = br#"{"session_id":"abc","tool_name":"Write"}"#;
        assert!(agent.parse_hook_event("PreToolUse", input).unwrap().is_none());
        assert!(agent.parse_hook_event("PostToolUse", input).unwrap().is_none());
    }

    #[test]
    fn install_then_install_again_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join(".claude")).unwrap();
        let agent = ClaudeCodeAgent;
        let ctx = HookInstallContext {
            worktree_root: dir.path().to_path_buf(),
            entire_command: "entire".to_owned(),
        };
        let first = agent.install_hooks(&ctx, false, false).unwrap();
        assert_eq!(first, HOOK_NAMES.len());
        let second = agent.install_hooks(&ctx, false, false).unwrap();
        assert_eq!(second, 0);
        assert!(agent.are_hooks_installed(&ctx).unwrap());
    }
}
