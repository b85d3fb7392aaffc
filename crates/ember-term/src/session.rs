//! Session identity, lifecycle state, and the registry's per-session record.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use ember_pty::PtyHandle;

/// Unique identifier for a terminal session.
///
/// Allocated from a monotonic counter owned by the registry; never reused
/// within a registry instance.
pub type SessionId = u64;

/// Lifecycle state of a session.
///
/// `Exited` is reached when the shell process terminates on its own (for
/// example the `exit` built-in); `Closed` only via an explicit close
/// request. Both are terminal: no transition leaves them, and neither
/// accepts further writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Starting,
    Running,
    /// The process exited on its own, with the exit code if the OS
    /// reported one.
    Exited(Option<u32>),
    Closed,
}

impl SessionState {
    pub fn is_running(&self) -> bool {
        matches!(self, SessionState::Running)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Exited(_) | SessionState::Closed)
    }
}

/// Public, UI-facing description of a session.
///
/// This is everything a tab needs to render itself; the process handle
/// stays inside the registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionDescriptor {
    pub id: SessionId,
    /// Display name, `Terminal 1`, `Terminal 2`, ... unique for the
    /// lifetime of the registry.
    pub name: String,
    pub working_directory: PathBuf,
}

/// A live session as recorded by the registry.
///
/// The registry is the sole owner of the `PtyHandle`; the pump thread only
/// ever holds the extracted reader.
pub(crate) struct Session {
    pub(crate) descriptor: SessionDescriptor,
    pub(crate) shell_path: String,
    pub(crate) cols: u16,
    pub(crate) rows: u16,
    pub(crate) state: SessionState,
    pub(crate) pty: PtyHandle,
}

impl Session {
    /// Record a self-exit. Closes the write half so late input cannot
    /// reach a half-dead PTY.
    pub(crate) fn mark_exited(&mut self, code: Option<u32>) {
        self.state = SessionState::Exited(code);
        self.pty.close_writer();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_predicates() {
        assert!(SessionState::Running.is_running());
        assert!(!SessionState::Starting.is_running());
        assert!(!SessionState::Exited(Some(0)).is_running());
        assert!(!SessionState::Closed.is_running());

        assert!(SessionState::Exited(None).is_terminal());
        assert!(SessionState::Closed.is_terminal());
        assert!(!SessionState::Starting.is_terminal());
        assert!(!SessionState::Running.is_terminal());
    }

    #[test]
    fn test_descriptor_serde_roundtrip() {
        let descriptor = SessionDescriptor {
            id: 7,
            name: "Terminal 7".to_string(),
            working_directory: PathBuf::from("/tmp"),
        };

        let json = serde_json::to_string(&descriptor).unwrap();
        let back: SessionDescriptor = serde_json::from_str(&json).unwrap();

        assert_eq!(back.id, 7);
        assert_eq!(back.name, "Terminal 7");
        assert_eq!(back.working_directory, PathBuf::from("/tmp"));
    }
}
