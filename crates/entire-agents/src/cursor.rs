//! Cursor adapter.
//!
//! Cursor ships two transcript layouts: a flat `<dir>/<id>.jsonl` written by
//! the CLI, and a nested `<dir>/<id>/<id>.jsonl` written by the IDE. The IDE
//! layout carries no tool-use blocks, so modified-file extraction returns
//! empty there and callers fall back to `git status` outside this crate.
//! Cursor also never reports token usage, so it has no [`TokenCalculator`].

use std::path::{Path, PathBuf};

use entire_core::{Event, SessionId};
use serde::Deserialize;
use serde_json::Value;

use crate::agent::{Agent, HookInstallContext, HookSupport, TranscriptAnalyzer};
use crate::chunk::{chunk_jsonl, reassemble_jsonl};
use crate::error::AgentError;
use crate::hook_json;

const HOOK_NAMES: &[&str] = &[
    "session-start",
    "session-end",
    "before-submit-prompt",
    "stop",
    "pre-compact",
    "subagent-start",
    "subagent-stop",
];

#[derive(Deserialize)]
struct HookPayload {
    #[serde(alias = "conversation_id")]
    session_id: Option<String>,
    #[serde(default)]
    prompt: Option<String>,
    #[serde(default)]
    subagent_id: Option<String>,
}

/// Adapter for Cursor.
pub struct CursorAgent;

impl CursorAgent {
    fn hooks_path(worktree_root: &Path) -> PathBuf {
        worktree_root.join(".cursor").join("hooks.json")
    }

    fn session_layout(dir: &Path, agent_session_id: &str) -> PathBuf {
        let nested = dir.join(agent_session_id).join(format!("{agent_session_id}.jsonl"));
        if nested.exists() {
            return nested;
        }
        dir.join(format!("{agent_session_id}.jsonl"))
    }

    fn is_ide_layout(path: &Path) -> bool {
        path.parent()
            .and_then(Path::file_name)
            .and_then(|s| s.to_str())
            .is_some_and(|parent| path.file_stem().and_then(|s| s.to_str()) == Some(parent))
    }
}

impl Agent for CursorAgent {
    fn name(&self) -> &'static str {
        "cursor"
    }

    fn display_name(&self) -> &'static str {
        "Cursor"
    }

    fn detect_presence(&self, worktree_root: &Path) -> bool {
        worktree_root.join(".cursor").is_dir()
    }

    fn session_dir(&self, worktree_root: &Path) -> PathBuf {
        if let Ok(dir) = std::env::var("ENTIRE_TEST_CURSOR_PROJECT_DIR") {
            return PathBuf::from(dir);
        }
        worktree_root.join(".cursor").join("sessions")
    }

    fn resolve_session_file(&self, dir: &Path, agent_session_id: &str) -> PathBuf {
        Self::session_layout(dir, agent_session_id)
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
        format!("cursor-agent --resume {checkpoint_id}")
    }

    fn protected_dirs(&self) -> &'static [&'static str] {
        &[".cursor"]
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
                message: "missing `session_id`/`conversation_id`".to_owned(),
            });
        };
        let session_id = SessionId::new(raw_session_id).map_err(|err| AgentError::MalformedHook {
            hook_name: hook_name.to_owned(),
            message: err.to_string(),
        })?;
        let tool_use_id = payload
            .subagent_id
            .map(entire_core::ToolUseId::new)
            .transpose()
            .map_err(|err| AgentError::MalformedHook {
                hook_name: hook_name.to_owned(),
                message: err.to_string(),
            })?;
        let event = match hook_name {
            "session-start" => Event::SessionStart {
                session_id,
                first_prompt: payload.prompt,
            },
            "before-submit-prompt" => Event::TurnStart { session_id },
            "stop" => Event::TurnEnd { session_id },
            "session-end" => Event::SessionEnd { session_id },
            "pre-compact" => Event::Compaction { session_id },
            "subagent-start" => Event::SubagentStart { session_id, tool_use_id },
            "subagent-stop" => Event::SubagentEnd { session_id, tool_use_id },
            _ => return Ok(None),
        };
        Ok(Some(event))
    }

    fn transcript_analyzer(&self) -> Option<&dyn TranscriptAnalyzer> {
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

impl TranscriptAnalyzer for CursorAgent {
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
        if Self::is_ide_layout(path) || from_offset >= new_offset {
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
                if let Some(text) = value.get("text").and_then(Value::as_str) {
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
                    .get("text")
                    .and_then(Value::as_str)
                    .map(str::to_owned));
            }
        }
        Ok(None)
    }
}

impl HookSupport for CursorAgent {
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
        for event in HOOK_NAMES {
            let command = format!("{prefix} hooks cursor {event}");
            if force {
                hook_json::remove_hook_commands_matching(hooks, event, |c| c.contains("hooks cursor"));
            }
            if hook_json::upsert_hook_command(hooks, event, &command, serde_json::Map::new()) {
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
        for event in HOOK_NAMES {
            hook_json::remove_hook_commands_matching(hooks, event, |c| c.contains("hooks cursor"));
        }
        hook_json::write_json_object(&path, &root)
    }

    fn are_hooks_installed(&self, ctx: &HookInstallContext) -> Result<bool, AgentError> {
        let path = Self::hooks_path(&ctx.worktree_root);
        let mut root = hook_json::read_json_object(&path)?;
        let hooks = hook_json::hooks_map_mut(&mut root, &path)?;
        Ok(HOOK_NAMES.iter().all(|event| {
            hooks.get(*event).and_then(Value::as_array).is_some_and(|entries| {
                entries.iter().any(|e| {
                    e.get("command")
                        .and_then(Value::as_str)
                        .is_some_and(|c| c.contains("hooks cursor"))
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nested_ide_layout_preferred_when_present() {
        let dir = tempfile::tempdir().unwrap();
        let nested_dir = dir.path().join("abc");
        std::fs::create_dir_all(&nested_dir).unwrap();
        std::fs::write(nested_dir.join("abc.jsonl"), b"").unwrap();
        let resolved = CursorAgent::session_layout(dir.path(), "abc");
        assert_eq!(resolved, nested_dir.join("abc.jsonl"));
        assert!(CursorAgent::is_ide_layout(&resolved));
    }

    #[test]
    fn flat_layout_used_when_no_nested_dir() {
        let dir = tempfile::tempdir().unwrap();
        let resolved = CursorAgent::session_layout(dir.path(), "abc");
        assert_eq!(resolved, dir.path().join("abc.jsonl"));
        assert!(!CursorAgent::is_ide_layout(&resolved));
    }

    #[test]
    fn ide_layout_modified_files_is_always_empty() {
        let dir = tempfile::tempdir().unwrap();
        let nested_dir = dir.path().join("abc");
        std::fs::create_dir_all(&nested_dir).unwrap();
        let transcript = nested_dir.join("abc.jsonl");
        std::fs::write(
            &transcript,
            b"{\"type\":\"tool_use\",\"tool_input\":{\"file_path\":\"a.rs\"}}\n",
        )
        .unwrap();
        let agent = CursorAgent;
        let (files, offset) = agent.extract_modified_files(&transcript, 0).unwrap();
        assert!(files.is_empty());
        assert!(offset > 0);
    }

    #[test]
    fn session_id_accepts_conversation_id_alias() {
        let agent = CursorAgent;
        let input = br#"{"conversation_id":"conv-1"}"#;
        let event = agent.parse_hook_event("stop", input).unwrap().unwrap();
        assert_eq!(event, Event::TurnEnd { session_id: SessionId::new("conv-1").unwrap() });
    }

    #[test]
    fn fresh_install_writes_seven_hooks_and_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join(".cursor")).unwrap();
        let agent = CursorAgent;
        let ctx = HookInstallContext {
            worktree_root: dir.path().to_path_buf(),
            entire_command: "entire".to_owned(),
        };
        let first = agent.install_hooks(&ctx, false, false).unwrap();
        assert_eq!(first, 7);
        let second = agent.install_hooks(&ctx, false, false).unwrap();
        assert_eq!(second, 0);
    }

    #[test]
    fn install_preserves_unknown_fields_and_hook_types() {
        let dir = tempfile::tempdir().unwrap();
        let cursor_dir = dir.path().join(".cursor");
        std::fs::create_dir_all(&cursor_dir).unwrap();
        let initial = serde_json::json!({
            "version": 1,
            "cursorSettings": {"theme": "dark"},
            "hooks": {
                "stop": [{"command": "echo user stop"}],
                "onNotification": [{"command": "echo notify"}],
            }
        });
        std::fs::write(
            cursor_dir.join("hooks.json"),
            serde_json::to_vec_pretty(&initial).unwrap(),
        )
        .unwrap();
        let agent = CursorAgent;
        let ctx = HookInstallContext {
            worktree_root: dir.path().to_path_buf(),
            entire_command: "entire".to_owned(),
        };
        agent.install_hooks(&ctx, false, false).unwrap();
        let result = hook_json::read_json_object(&CursorAgent::hooks_path(dir.path())).unwrap();
        assert_eq!(result["version"], 1);
        assert_eq!(result["cursorSettings"]["theme"], "dark");
        let notif = result["hooks"]["onNotification"].as_array().unwrap();
        assert_eq!(notif.len(), 1);
        assert_eq!(notif[0]["command"], "echo notify");
        let stop = result["hooks"]["stop"].as_array().unwrap();
        assert_eq!(stop.len(), 2);
        assert!(stop.iter().any(|e| e["command"] == "echo user stop"));
        assert!(stop.iter().any(|e| e["command"] == "entire hooks cursor stop"));
    }
}
