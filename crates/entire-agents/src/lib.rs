//! Agent adapter registry for entire.
//!
//! One adapter per supported coding agent (Claude Code, Cursor, Gemini,
//! OpenCode, Windsurf), built behind a common [`Agent`] trait so the
//! orchestrator never has to special-case a specific agent by name.
//! Capabilities an agent doesn't have (token accounting, hook install) are
//! declared as `None` from an explicit accessor rather than probed with a
//! runtime downcast — see [`agent`] for the rationale.

pub mod agent;
pub mod chunk;
mod claude_code;
mod cursor;
mod error;
mod gemini;
mod hook_json;
mod opencode;
pub mod registry;
mod windsurf;

pub use agent::{Agent, HookInstallContext, HookSupport, TokenCalculator, TranscriptAnalyzer};
pub use claude_code::ClaudeCodeAgent;
pub use cursor::CursorAgent;
pub use error::AgentError;
pub use gemini::GeminiAgent;
pub use opencode::OpenCodeAgent;
pub use registry::{build_default_registry, AgentRegistry};
pub use windsurf::WindsurfAgent;
