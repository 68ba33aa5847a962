//! Durable, lock-protected storage for [`SessionState`] files.
//!
//! Session state lives at `<git-common-dir>/entire-sessions/<id>.json`, one
//! file per session, written with the same write-temp-then-rename discipline
//! as the teacher's `MergeStateFile::write_atomic`: serialize, write to a
//! sibling temp file, `fsync`, then `rename` — rename is atomic on POSIX
//! filesystems so a reader never observes a half-written file.
//!
//! Concurrent hook invocations for the *same* session (an agent can run
//! hooks from more than one process) are serialized with an `fs4` advisory
//! lock file alongside the state file, per the design notes' file-lock
//! decision: locks must be visible across processes, which rules out an
//! in-process mutex.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use fs4::fs_std::FileExt;

use crate::error::EntireError;
use crate::ids::SessionId;
use crate::model::SessionState;

/// Directory, relative to the git common dir, holding session state files.
pub const SESSIONS_DIR: &str = "entire-sessions";

/// Handle to the session-state directory under a repository's git common
/// dir.
#[derive(Clone, Debug)]
pub struct StateStore {
    sessions_dir: PathBuf,
}

/// A held advisory lock on a session's state file, released on drop.
pub struct SessionLock {
    _file: File,
}

impl StateStore {
    /// Open (creating if necessary) the session-state directory under
    /// `git_common_dir`.
    ///
    /// # Errors
    /// Returns [`EntireError::Io`] if the directory cannot be created.
    pub fn open(git_common_dir: &Path) -> Result<Self, EntireError> {
        let sessions_dir = git_common_dir.join(SESSIONS_DIR);
        fs::create_dir_all(&sessions_dir)?;
        Ok(Self { sessions_dir })
    }

    fn state_path(&self, session_id: &SessionId) -> PathBuf {
        self.sessions_dir.join(format!("{session_id}.json"))
    }

    fn lock_path(&self, session_id: &SessionId) -> PathBuf {
        self.sessions_dir.join(format!("{session_id}.lock"))
    }

    /// Acquire the per-session lock, retrying with a fixed backoff until
    /// `timeout` elapses.
    ///
    /// # Errors
    /// Returns [`EntireError::Conflict`] if the lock is still held by
    /// another process when `timeout` elapses, or [`EntireError::Io`] on a
    /// filesystem failure.
    pub fn lock(&self, session_id: &SessionId, timeout: Duration) -> Result<SessionLock, EntireError> {
        let path = self.lock_path(session_id);
        let file = File::options().create(true).write(true).open(&path)?;

        let deadline = Instant::now() + timeout;
        let mut attempts = 0u32;
        loop {
            match FileExt::try_lock_exclusive(&file) {
                Ok(()) => return Ok(SessionLock { _file: file }),
                Err(_) if Instant::now() < deadline => {
                    attempts += 1;
                    std::thread::sleep(Duration::from_millis(20));
                }
                Err(err) => {
                    return Err(EntireError::Conflict {
                        what: format!("session lock for `{session_id}`"),
                        attempts,
                        message: err.to_string(),
                    });
                }
            }
        }
    }

    /// Read a session's persisted state, if it exists.
    ///
    /// # Errors
    /// Returns [`EntireError::Io`] on a filesystem failure other than "not
    /// found", or [`EntireError::Serde`] if the file is corrupted.
    pub fn read(&self, session_id: &SessionId) -> Result<Option<SessionState>, EntireError> {
        let path = self.state_path(session_id);
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    /// Atomically persist `state`, overwriting any previous state for the
    /// same session.
    ///
    /// # Errors
    /// Returns [`EntireError::Io`] on a filesystem failure or
    /// [`EntireError::Serde`] if serialization fails.
    pub fn write(&self, state: &SessionState) -> Result<(), EntireError> {
        let path = self.state_path(&state.session_id);
        let bytes = serde_json::to_vec_pretty(state)?;
        write_atomic(&path, &bytes)?;
        Ok(())
    }

    /// Remove a session's state and lock files once it has returned to
    /// `Dormant` and been condensed.
    ///
    /// # Errors
    /// Returns [`EntireError::Io`] if removal fails for a reason other than
    /// the files already being absent.
    pub fn remove(&self, session_id: &SessionId) -> Result<(), EntireError> {
        for path in [self.state_path(session_id), self.lock_path(session_id)] {
            match fs::remove_file(&path) {
                Ok(()) | Err(_) if !path.exists() => {}
                Err(err) => return Err(err.into()),
            }
        }
        Ok(())
    }

    /// List every session id with a persisted state file, for startup
    /// recovery and stale-lock garbage collection.
    ///
    /// # Errors
    /// Returns [`EntireError::Io`] if the directory cannot be read.
    pub fn list_sessions(&self) -> Result<Vec<SessionId>, EntireError> {
        let mut out = Vec::new();
        for entry in fs::read_dir(&self.sessions_dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if let Some(id) = name.strip_suffix(".json") {
                if let Ok(session_id) = SessionId::new(id) {
                    out.push(session_id);
                }
            }
        }
        Ok(out)
    }
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), EntireError> {
    let dir = path.parent().ok_or_else(|| EntireError::Fatal {
        message: "state path has no parent directory".to_owned(),
    })?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|err| EntireError::Io(err.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::time::SystemTime;

    use super::*;
    use crate::model::Phase;

    fn sample_state(session_id: &str) -> SessionState {
        SessionState {
            session_id: SessionId::new(session_id).unwrap(),
            agent_name: "claude-code".to_owned(),
            phase: Phase::Dormant,
            started_at: SystemTime::UNIX_EPOCH,
            last_activity_at: SystemTime::UNIX_EPOCH,
            worktree_root: "/tmp/work".into(),
            files_touched: vec![],
            transcript_position: 0,
            shadow_branch: None,
            open_subagents: vec![],
            first_prompt: None,
        }
    }

    #[test]
    fn write_then_read_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::open(dir.path()).unwrap();
        let state = sample_state("s1");
        store.write(&state).unwrap();
        let back = store.read(&state.session_id).unwrap().unwrap();
        assert_eq!(back, state);
    }

    #[test]
    fn read_missing_session_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::open(dir.path()).unwrap();
        let id = SessionId::new("missing").unwrap();
        assert!(store.read(&id).unwrap().is_none());
    }

    #[test]
    fn remove_deletes_state_and_lock_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::open(dir.path()).unwrap();
        let state = sample_state("s1");
        store.write(&state).unwrap();
        let _lock = store.lock(&state.session_id, Duration::from_millis(50)).unwrap();
        drop(_lock);
        store.remove(&state.session_id).unwrap();
        assert!(store.read(&state.session_id).unwrap().is_none());
    }

    #[test]
    fn list_sessions_finds_written_state() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::open(dir.path()).unwrap();
        store.write(&sample_state("s1")).unwrap();
        store.write(&sample_state("s2")).unwrap();
        let mut ids: Vec<String> = store.list_sessions().unwrap().iter().map(ToString::to_string).collect();
        ids.sort();
        assert_eq!(ids, vec!["s1".to_owned(), "s2".to_owned()]);
    }

    #[test]
    fn lock_times_out_if_already_held() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::open(dir.path()).unwrap();
        let id = SessionId::new("s1").unwrap();
        let _held = store.lock(&id, Duration::from_millis(50)).unwrap();
        let result = store.lock(&id, Duration::from_millis(50));
        assert!(result.is_err());
    }
}
