//! Shared read-modify-write helpers for agent hook-config JSON files.
//!
//! Both Cursor (`.cursor/hooks.json`) and Windsurf (`.windsurf/hooks.json`)
//! use the same shape: a top-level JSON object with a `hooks` map from
//! event/action name to an ordered array of command entries. These helpers
//! implement the one rule every [`crate::agent::HookSupport`] impl must
//! honor: unknown top-level fields and unknown hook/action types survive a
//! round trip untouched.

use std::fs;
use std::path::Path;

use serde_json::{Map, Value};

use crate::error::AgentError;

/// Read `path` as a top-level JSON object, or an empty object if the file
/// does not exist yet (a fresh install into an agent with no config file).
///
/// # Errors
/// Returns [`AgentError::Io`] on a read failure other than "not found", or
/// [`AgentError::InvalidHookConfig`] if the file is not a JSON object.
pub fn read_json_object(path: &Path) -> Result<Map<String, Value>, AgentError> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Map::new()),
        Err(err) => return Err(err.into()),
    };
    match serde_json::from_slice(&bytes)? {
        Value::Object(map) => Ok(map),
        _ => Err(AgentError::InvalidHookConfig {
            path: path.display().to_string(),
            message: "expected a JSON object at the top level".to_owned(),
        }),
    }
}

/// Write `root` back to `path`, creating parent directories as needed.
///
/// # Errors
/// Returns [`AgentError::Io`] if the file cannot be written.
pub fn write_json_object(path: &Path, root: &Map<String, Value>) -> Result<(), AgentError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut bytes = serde_json::to_vec_pretty(&Value::Object(root.clone()))?;
    bytes.push(b'\n');
    fs::write(path, bytes)?;
    tracing::debug!(path = %path.display(), "wrote hook config");
    Ok(())
}

/// Get (creating if absent) the `hooks` field of `root` as a mutable object.
///
/// # Errors
/// Returns [`AgentError::InvalidHookConfig`] if `hooks` exists but is not a
/// JSON object.
pub fn hooks_map_mut<'a>(
    root: &'a mut Map<String, Value>,
    path: &Path,
) -> Result<&'a mut Map<String, Value>, AgentError> {
    let entry = root
        .entry("hooks".to_owned())
        .or_insert_with(|| Value::Object(Map::new()));
    entry.as_object_mut().ok_or_else(|| AgentError::InvalidHookConfig {
        path: path.display().to_string(),
        message: "`hooks` field is not a JSON object".to_owned(),
    })
}

/// Insert `command` into `hooks[event_name]` unless a command with exactly
/// that string is already present. Returns `true` if an entry was added.
pub fn upsert_hook_command(
    hooks: &mut Map<String, Value>,
    event_name: &str,
    command: &str,
    extra_fields: Map<String, Value>,
) -> bool {
    let list = hooks
        .entry(event_name.to_owned())
        .or_insert_with(|| Value::Array(Vec::new()));
    let Value::Array(entries) = list else {
        return false;
    };
    let already_present = entries
        .iter()
        .any(|entry| entry.get("command").and_then(Value::as_str) == Some(command));
    if already_present {
        return false;
    }
    let mut entry = extra_fields;
    entry.insert("command".to_owned(), Value::String(command.to_owned()));
    entries.push(Value::Object(entry));
    true
}

/// Remove any entry from `hooks[event_name]` whose `command` satisfies
/// `pred`. Drops `event_name` entirely from `hooks` if the array becomes
/// empty.
pub fn remove_hook_commands_matching(
    hooks: &mut Map<String, Value>,
    event_name: &str,
    pred: impl Fn(&str) -> bool,
) {
    let Some(Value::Array(entries)) = hooks.get_mut(event_name) else {
        return;
    };
    entries.retain(|entry| !entry.get("command").and_then(Value::as_str).is_some_and(&pred));
    if entries.is_empty() {
        hooks.remove(event_name);
    }
}

/// Whether any entry in `hooks[event_name]` has a `command` equal to
/// `command`.
#[must_use]
pub fn has_hook_command(hooks: &Map<String, Value>, event_name: &str, command: &str) -> bool {
    hooks
        .get(event_name)
        .and_then(Value::as_array)
        .is_some_and(|entries| {
            entries
                .iter()
                .any(|entry| entry.get("command").and_then(Value::as_str) == Some(command))
        })
}
