//! Internal tunables for the checkpoint store and orchestrator.
//!
//! This is deliberately small: the user-facing `.entire/settings.json`
//! surface belongs to the (out of scope) settings subsystem. `Config` holds
//! only the knobs entire-core needs to run, loaded once at process entry and
//! threaded explicitly through [`crate::orchestrator::OrchestratorContext`] —
//! never read from a global.

use std::time::Duration;

/// Tunables consulted by the checkpoint store and orchestrator.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    /// Maximum time to wait to acquire a per-session lock file before
    /// surfacing a conflict error.
    pub lock_timeout: Duration,
    /// Number of times to retry a metadata-branch CAS write after a
    /// conflict before giving up.
    pub cas_retry_count: u32,
    /// Maximum size, in bytes, of a single transcript chunk.
    pub max_chunk_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            lock_timeout: Duration::from_secs(5),
            cas_retry_count: 5,
            max_chunk_size: 256 * 1024,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_design_notes() {
        let config = Config::default();
        assert_eq!(config.cas_retry_count, 5);
        assert_eq!(config.lock_timeout, Duration::from_secs(5));
    }
}
