//! OpenCode adapter.
//!
//! OpenCode's transcript is a single JSON document (not JSONL) with a
//! top-level `messages` array; "position" is a message index rather than a
//! byte offset, so this adapter does not use [`crate::chunk`] — chunking and
//! reassembly are structural, operating on whole messages instead of lines.

use std::path::{Path, PathBuf};

use entire_core::{Event, SessionId};
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::agent::{Agent, HookInstallContext, HookSupport, TranscriptAnalyzer};
use crate::error::AgentError;
use crate::hook_json;

const HOOK_NAMES: &[&str] = &["session-start", "turn-start", "turn-end", "session-end"];

/// Top-level object key this adapter uses in the first chunk to carry every
/// non-`messages` field of the original document.
const HEADER_KEY: &str = "__entire_header__";

#[derive(Deserialize)]
struct HookPayload {
    session_id: Option<String>,
    #[serde(default)]
    prompt: Option<String>,
}

/// Adapter for OpenCode.
pub struct OpenCodeAgent;

impl OpenCodeAgent {
    fn config_path(worktree_root: &Path) -> PathBuf {
        worktree_root.join("opencode.json")
    }

    fn parse_document(bytes: &[u8]) -> Map<String, Value> {
        match serde_json::from_slice::<Value>(bytes) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        }
    }

    fn messages(document: &Map<String, Value>) -> &[Value] {
        document
            .get("messages")
            .and_then(Value::as_array)
            .map_or(&[], Vec::as_slice)
    }
}

impl Agent for OpenCodeAgent {
    fn name(&self) -> &'static str {
        "opencode"
    }

    fn display_name(&self) -> &'static str {
        "OpenCode"
    }

    fn detect_presence(&self, worktree_root: &Path) -> bool {
        worktree_root.join("opencode.json").is_file() || worktree_root.join(".opencode").is_dir()
    }

    fn session_dir(&self, worktree_root: &Path) -> PathBuf {
        if let Ok(dir) = std::env::var("ENTIRE_TEST_OPENCODE_PROJECT_DIR") {
            return PathBuf::from(dir);
        }
        worktree_root.join(".opencode").join("sessions")
    }

    fn resolve_session_file(&self, dir: &Path, agent_session_id: &str) -> PathBuf {
        dir.join(format!("{agent_session_id}.json"))
    }

    fn read_transcript(&self, path: &Path) -> Result<Vec<u8>, AgentError> {
        Ok(std::fs::read(path)?)
    }

    fn write_session(&self, path: &Path, bytes: &[u8]) -> Result<(), AgentError> {
        Ok(std::fs::write(path, bytes)?)
    }

    /// Splits `messages` into groups whose serialized size stays at or under
    /// `max_size`. The first emitted chunk always carries the document's
    /// non-`messages` fields under [`HEADER_KEY`] so [`Self::reassemble_transcript`]
    /// can rebuild the full document; it counts toward no message group.
    fn chunk_transcript(&self, bytes: &[u8], max_size: usize) -> Vec<Vec<u8>> {
        let document = Self::parse_document(bytes);
        let messages = Self::messages(&document);
        let mut header = document;
        header.remove("messages");
        let mut chunks = vec![serde_json::to_vec(&serde_json::json!({ HEADER_KEY: header })).unwrap_or_default()];
        if messages.is_empty() {
            return chunks;
        }
        let mut current = Vec::new();
        for message in messages {
            let serialized_len = serde_json::to_vec(message).map(|v| v.len()).unwrap_or(0);
            if !current.is_empty() && current_len(&current) + serialized_len > max_size {
                chunks.push(serde_json::to_vec(&current).unwrap_or_default());
                current = Vec::new();
            }
            current.push(message.clone());
        }
        if !current.is_empty() {
            chunks.push(serde_json::to_vec(&current).unwrap_or_default());
        }
        chunks
    }

    /// Inverse of [`Self::chunk_transcript`]: the header becomes the
    /// document's non-`messages` fields, and every subsequent chunk's
    /// messages are concatenated back into `messages`, in order.
    fn reassemble_transcript(&self, chunks: &[Vec<u8>]) -> Vec<u8> {
        let mut document = Map::new();
        let mut messages = Vec::new();
        for (i, chunk) in chunks.iter().enumerate() {
            if i == 0 {
                if let Ok(Value::Object(wrapper)) = serde_json::from_slice::<Value>(chunk) {
                    if let Some(Value::Object(header)) = wrapper.get(HEADER_KEY).cloned() {
                        document = header;
                    }
                }
                continue;
            }
            if let Ok(Value::Array(group)) = serde_json::from_slice::<Value>(chunk) {
                messages.extend(group);
            }
        }
        document.insert("messages".to_owned(), Value::Array(messages));
        serde_json::to_vec(&Value::Object(document)).unwrap_or_default()
    }

    fn format_resume_command(&self, checkpoint_id: &str) -> String {
        format!("opencode --resume {checkpoint_id}")
    }

    fn protected_dirs(&self) -> &'static [&'static str] {
        &[".opencode"]
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
            "turn-start" => Event::TurnStart { session_id },
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

fn current_len(messages: &[Value]) -> usize {
    serde_json::to_vec(messages).map(|v| v.len()).unwrap_or(0)
}

impl TranscriptAnalyzer for OpenCodeAgent {
    /// Message count, not byte offset.
    fn transcript_position(&self, path: &Path) -> Result<u64, AgentError> {
        let bytes = self.read_transcript(path)?;
        let document = Self::parse_document(&bytes);
        Ok(Self::messages(&document).len() as u64)
    }

    fn extract_modified_files(
        &self,
        path: &Path,
        from_offset: u64,
    ) -> Result<(Vec<String>, u64), AgentError> {
        let bytes = self.read_transcript(path)?;
        let document = Self::parse_document(&bytes);
        let messages = Self::messages(&document);
        let new_offset = messages.len() as u64;
        let start = from_offset.min(new_offset) as usize;
        let mut files = Vec::new();
        for message in &messages[start..] {
            let Some(tool_calls) = message.get("toolCalls").and_then(Value::as_array) else {
                continue;
            };
            for call in tool_calls {
                if let Some(path) = call
                    .get("input")
                    .and_then(|i| i.get("filePath"))
                    .and_then(Value::as_str)
                {
                    files.push(path.to_owned());
                }
            }
        }
        files.sort();
        files.dedup();
        Ok((files, new_offset))
    }

    fn extract_prompts(&self, path: &Path, from_offset: u64) -> Result<Vec<String>, AgentError> {
        let bytes = self.read_transcript(path)?;
        let document = Self::parse_document(&bytes);
        let messages = Self::messages(&document);
        let start = from_offset.min(messages.len() as u64) as usize;
        let prompts = messages[start..]
            .iter()
            .filter(|m| m.get("role").and_then(Value::as_str) == Some("user"))
            .filter_map(|m| m.get("content").and_then(Value::as_str))
            .map(str::to_owned)
            .collect();
        Ok(prompts)
    }

    fn extract_summary(&self, path: &Path) -> Result<Option<String>, AgentError> {
        let bytes = self.read_transcript(path)?;
        let document = Self::parse_document(&bytes);
        Ok(Self::messages(&document)
            .iter()
            .rev()
            .find(|m| m.get("role").and_then(Value::as_str) == Some("summary"))
            .and_then(|m| m.get("content").and_then(Value::as_str))
            .map(str::to_owned))
    }
}

impl HookSupport for OpenCodeAgent {
    fn install_hooks(
        &self,
        ctx: &HookInstallContext,
        local_dev: bool,
        force: bool,
    ) -> Result<usize, AgentError> {
        let path = Self::config_path(&ctx.worktree_root);
        let mut root = hook_json::read_json_object(&path)?;
        let hooks = hook_json::hooks_map_mut(&mut root, &path)?;
        let prefix = hook_command_prefix(ctx, local_dev);
        let mut count = 0;
        for event in HOOK_NAMES {
            let command = format!("{prefix} hooks opencode {event}");
            if force {
                hook_json::remove_hook_commands_matching(hooks, event, |c| c.contains("hooks opencode"));
            }
            if hook_json::upsert_hook_command(hooks, event, &command, serde_json::Map::new()) {
                count += 1;
            }
        }
        hook_json::write_json_object(&path, &root)?;
        Ok(count)
    }

    fn uninstall_hooks(&self, ctx: &HookInstallContext) -> Result<(), AgentError> {
        let path = Self::config_path(&ctx.worktree_root);
        let mut root = hook_json::read_json_object(&path)?;
        let hooks = hook_json::hooks_map_mut(&mut root, &path)?;
        for event in HOOK_NAMES {
            hook_json::remove_hook_commands_matching(hooks, event, |c| c.contains("hooks opencode"));
        }
        hook_json::write_json_object(&path, &root)
    }

    fn are_hooks_installed(&self, ctx: &HookInstallContext) -> Result<bool, AgentError> {
        let path = Self::config_path(&ctx.worktree_root);
        let mut root = hook_json::read_json_object(&path)?;
        let hooks = hook_json::hooks_map_mut(&mut root, &path)?;
        Ok(HOOK_NAMES.iter().all(|event| {
            hooks.get(*event).and_then(Value::as_array).is_some_and(|entries| {
                entries.iter().any(|e| {
                    e.get("command")
                        .and_then(Value::as_str)
                        .is_some_and(|c| c.contains("hooks opencode"))
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

    fn sample_document() -> Vec<u8> {
        serde_json::to_vec(&serde_json::json!({
            "title": "demo session",
            "messages": [
                {"role": "user", "content": "hello"},
                {"role": "assistant", "content": "hi"},
                {"role": "assistant", "toolCalls": [{"input": {"filePath": "a.rs"}}]},
            ]
        }))
        .unwrap()
    }

    #[test]
    fn position_is_message_count() {
        let agent = OpenCodeAgent;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.json");
        std::fs::write(&path, sample_document()).unwrap();
        assert_eq!(agent.transcript_position(&path).unwrap(), 3);
    }

    #[test]
    fn extract_modified_files_from_tool_calls() {
        let agent = OpenCodeAgent;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.json");
        std::fs::write(&path, sample_document()).unwrap();
        let (files, offset) = agent.extract_modified_files(&path, 0).unwrap();
        assert_eq!(files, vec!["a.rs".to_owned()]);
        assert_eq!(offset, 3);
    }

    #[test]
    fn chunk_then_reassemble_preserves_messages_and_header() {
        let agent = OpenCodeAgent;
        let input = sample_document();
        let chunks = agent.chunk_transcript(&input, 64);
        let rebuilt = agent.reassemble_transcript(&chunks);
        let original: Value = serde_json::from_slice(&input).unwrap();
        let rebuilt: Value = serde_json::from_slice(&rebuilt).unwrap();
        assert_eq!(original["title"], rebuilt["title"]);
        assert_eq!(original["messages"], rebuilt["messages"]);
    }

    #[test]
    fn empty_messages_round_trip_to_empty_array() {
        let agent = OpenCodeAgent;
        let input = serde_json::to_vec(&serde_json::json!({"title": "empty", "messages": []})).unwrap();
        let chunks = agent.chunk_transcript(&input, 64);
        let rebuilt = agent.reassemble_transcript(&chunks);
        let rebuilt: Value = serde_json::from_slice(&rebuilt).unwrap();
        assert_eq!(rebuilt["messages"], serde_json::json!([]));
    }
}
