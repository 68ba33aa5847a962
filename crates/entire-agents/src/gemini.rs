//! Gemini adapter.
//!
//! Line-oriented JSONL like Claude Code and Cursor's CLI layout, but with a
//! narrower hook set (`session-start`, `turn-end`, `session-end`) and no
//! native subagent concept — this adapter never emits `SubagentStart`/`SubagentEnd`.

use std::path::{Path, PathBuf};

use entire_core::{Event, SessionId};
use serde::Deserialize;
use serde_json::Value;

use crate::agent::{Agent, HookInstallContext, HookSupport, TranscriptAnalyzer};
use crate::chunk::{chunk_jsonl, reassemble_jsonl};
use crate::error::AgentError;
use crate::hook_json;

const HOOK_NAMES: &[&str] = &["session-start", "turn-end", "session-end"];

#[derive(Deserialize)]
struct HookPayload {
    session_id: Option<String>,
    #[serde(default)]
    prompt: Option<String>,
}

/// Adapter for Gemini.
pub struct GeminiAgent;

impl GeminiAgent {
    fn settings_path(worktree_root: &Path) -> PathBuf {
        worktree_root.join(".gemini").join("settings.json")
    }
}

impl Agent for GeminiAgent {
    fn name(&self) -> &'static str {
        "gemini"
    }

    fn display_name(&self) -> &'static str {
        "Gemini"
    }

    fn detect_presence(&self, worktree_root: &Path) -> bool {
        worktree_root.join(".gemini").is_dir()
    }

    fn session_dir(&self, worktree_root: &Path) -> PathBuf {
        worktree_root.join(".gemini").join("sessions")
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
        format!("gemini --resume {checkpoint_id}")
    }

    fn protected_dirs(&self) -> &'static [&'static str] {
        &[".gemini"]
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
            "session-start" => Event::SessionStart {
                session_id,
                first_prompt: payload.prompt,
            },
            "turn-end" => Event::TurnEnd { session_id },
            "session-end" => Event::SessionEnd { session_id },
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

impl TranscriptAnalyzer for GeminiAgent {
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

impl HookSupport for GeminiAgent {
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
            let command = format!("{prefix} hooks gemini {event}");
            if force {
                hook_json::remove_hook_commands_matching(hooks, event, |c| c.contains("hooks gemini"));
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
            hook_json::remove_hook_commands_matching(hooks, event, |c| c.contains("hooks gemini"));
        }
        hook_json::write_json_object(&path, &root)
    }

    fn are_hooks_installed(&self, ctx: &HookInstallContext) -> Result<bool, AgentError> {
        let path = Self::settings_path(&ctx.worktree_root);
        let mut root = hook_json::read_json_object(&path)?;
        let hooks = hook_json::hooks_map_mut(&mut root, &path)?;
        Ok(HOOK_NAMES.iter().all(|event| {
            hooks.get(*event).and_then(Value::as_array).is_some_and(|entries| {
                entries.iter().any(|e| {
                    e.get("command")
                        .and_then(Value::as_str)
                        .is_some_and(|c| c.contains("hooks gemini"))
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
    fn has_no_subagent_hooks() {
        let agent = GeminiAgent;
        assert!(!agent.hook_names().contains(&"subagent-start"));
        assert!(!agent.hook_names().contains(&"subagent-stop"));
    }

    #[test]
    fn turn_end_does_not_require_prompt() {
        let agent = GeminiAgent;
        let input = br#"{"session_id":"g-1"}"#;
        let event = agent.parse_hook_event("turn-end", input).unwrap().unwrap();
        assert_eq!(event, Event::TurnEnd { session_id: SessionId::new("g-1").unwrap() });
    }

    #[test]
    fn has_no_token_calculator() {
        let agent = GeminiAgent;
        assert!(agent.token_calculator().is_none());
    }
}
