//! Explicit adapter construction and lookup.
//!
//! The source this spec was distilled from self-registers adapters via
//! per-package `init()` side effects into a global map. This crate builds
//! the registry explicitly instead: [`build_default_registry`] constructs
//! each adapter once and calls [`AgentRegistry::register`] — no global
//! mutable state, no import-for-side-effect, and a registry is just a value
//! you can build more than one of (useful in tests).

use std::path::Path;

use crate::agent::Agent;
use crate::{claude_code, cursor, gemini, opencode, windsurf};

/// A constructed set of agent adapters, looked up by [`Agent::name`].
#[derive(Default)]
pub struct AgentRegistry {
    agents: Vec<Box<dyn Agent>>,
}

impl AgentRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self { agents: Vec::new() }
    }

    /// Add an adapter to the registry.
    pub fn register(&mut self, agent: Box<dyn Agent>) {
        self.agents.push(agent);
    }

    /// Look up an adapter by its registry name (e.g. `"cursor"`).
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&dyn Agent> {
        self.agents.iter().find(|a| a.name() == name).map(AsRef::as_ref)
    }

    /// All registered adapters, in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &dyn Agent> {
        self.agents.iter().map(AsRef::as_ref)
    }

    /// Adapters whose [`Agent::detect_presence`] returns `true` for
    /// `worktree_root`, in registration order.
    pub fn detect(&self, worktree_root: &Path) -> Vec<&dyn Agent> {
        let detected: Vec<&dyn Agent> = self
            .agents
            .iter()
            .map(AsRef::as_ref)
            .filter(|a| a.detect_presence(worktree_root))
            .collect();
        tracing::debug!(
            worktree = %worktree_root.display(),
            agents = ?detected.iter().map(|a| a.name()).collect::<Vec<_>>(),
            "detected agents in worktree"
        );
        detected
    }
}

/// Build the registry entire ships by default: Claude Code, Cursor, Gemini,
/// OpenCode, and Windsurf, in that order.
#[must_use]
pub fn build_default_registry() -> AgentRegistry {
    let mut registry = AgentRegistry::new();
    registry.register(Box::new(claude_code::ClaudeCodeAgent));
    registry.register(Box::new(cursor::CursorAgent));
    registry.register(Box::new(gemini::GeminiAgent));
    registry.register(Box::new(opencode::OpenCodeAgent));
    registry.register(Box::new(windsurf::WindsurfAgent));
    registry
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_registry_contains_all_five_agents() {
        let registry = build_default_registry();
        let names: Vec<&str> = registry.iter().map(Agent::name).collect();
        assert_eq!(
            names,
            vec!["claude-code", "cursor", "gemini", "opencode", "windsurf"]
        );
    }

    #[test]
    fn get_is_case_sensitive_and_returns_none_for_unknown() {
        let registry = build_default_registry();
        assert!(registry.get("Cursor").is_none());
        assert!(registry.get("cursor").is_some());
        assert!(registry.get("nonexistent").is_none());
    }

    #[test]
    fn detect_returns_nothing_in_empty_worktree() {
        let dir = tempfile::tempdir().unwrap();
        let registry = build_default_registry();
        assert!(registry.detect(dir.path()).is_empty());
    }
}
