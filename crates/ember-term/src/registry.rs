//! The authoritative registry of live terminal sessions.
//!
//! The registry owns every process handle; the presentation layer and the
//! router only ever hold session ids and look the session up per
//! operation. All map access goes through one mutex, which is held
//! briefly and never across a blocking read or an `.await`.

use std::collections::HashMap;
use std::io::Read;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use std::time::{Duration, Instant};

use ember_pty::{default_shell, PtyError, PtyHandle};

use crate::router::StreamRouter;
use crate::session::{Session, SessionDescriptor, SessionId, SessionState};

/// Default terminal size, used when a tab is created before its view has
/// measured itself.
pub const DEFAULT_COLS: u16 = 80;
pub const DEFAULT_ROWS: u16 = 24;

/// How long a process gets to die after a close request before the kill
/// is escalated.
const KILL_GRACE: Duration = Duration::from_secs(2);

/// How long the pump thread waits for an exit code once the PTY reports
/// EOF.
const EXIT_HARVEST_WINDOW: Duration = Duration::from_secs(2);

/// Sessions keyed by id, shared between the registry and the per-session
/// pump threads.
type SessionMap = Arc<Mutex<HashMap<SessionId, Session>>>;

/// Result of routing input bytes to a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The bytes were forwarded to the shell's input.
    Written,
    /// The session was absent or no longer running; the write was dropped.
    /// UI and backend state can transiently diverge (a close still in
    /// flight, a tab racing a self-exit), so this is benign.
    Stale,
}

/// A failure recorded against one session during [`SessionRegistry::close_all`].
#[derive(Debug)]
pub struct CloseFailure {
    pub session_id: SessionId,
    pub error: PtyError,
}

/// Creates, looks up, and destroys terminal sessions.
///
/// One registry instance serves the whole application. Session ids and
/// display names come from monotonic counters and are never reused, even
/// after sessions close.
pub struct SessionRegistry {
    sessions: SessionMap,
    next_id: AtomicU64,
    next_name: AtomicU64,
    /// Default shell, resolved once per registry on first use.
    shell: OnceLock<String>,
    router: Arc<StreamRouter>,
}

impl SessionRegistry {
    pub fn new(router: Arc<StreamRouter>) -> Self {
        Self {
            sessions: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(1),
            next_name: AtomicU64::new(1),
            shell: OnceLock::new(),
            router,
        }
    }

    /// Create a new session running the default shell.
    ///
    /// Spawns the shell on a fresh PTY in `working_directory`, registers
    /// it, starts its I/O pump, and returns the public descriptor. On any
    /// spawn failure nothing stays registered.
    pub fn create_session(
        &self,
        working_directory: impl Into<PathBuf>,
        cols: u16,
        rows: u16,
    ) -> Result<SessionDescriptor, PtyError> {
        let shell = self.shell.get_or_init(default_shell).clone();
        self.create_session_with_shell(&shell, working_directory, cols, rows)
    }

    /// Create a new session running an explicitly chosen shell.
    pub fn create_session_with_shell(
        &self,
        shell: &str,
        working_directory: impl Into<PathBuf>,
        cols: u16,
        rows: u16,
    ) -> Result<SessionDescriptor, PtyError> {
        let working_directory = working_directory.into();
        let cols = cols.max(1);
        let rows = rows.max(1);

        let mut pty = PtyHandle::spawn(shell, &working_directory, cols, rows)?;
        let reader = match pty.take_reader() {
            Some(reader) => reader,
            None => return Err(PtyError::SpawnFailed("PTY reader unavailable".to_string())),
        };

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let name = format!("Terminal {}", self.next_name.fetch_add(1, Ordering::Relaxed));
        let descriptor = SessionDescriptor {
            id,
            name,
            working_directory,
        };

        let session = Session {
            descriptor: descriptor.clone(),
            shell_path: shell.to_string(),
            cols,
            rows,
            state: SessionState::Starting,
            pty,
        };

        self.router.register(id);
        self.lock_sessions().insert(id, session);

        // The pump thread owns the blocking reader and exits on EOF, which
        // both self-exit and explicit close produce.
        let spawned = std::thread::Builder::new()
            .name(format!("pty-io-{id}"))
            .spawn({
                let sessions = Arc::clone(&self.sessions);
                let router = Arc::clone(&self.router);
                move || pump_loop(id, reader, sessions, router)
            });
        if let Err(e) = spawned {
            // Roll back; dropping the session kills the child.
            self.lock_sessions().remove(&id);
            self.router.remove(id);
            return Err(PtyError::SpawnFailed(format!(
                "failed to spawn I/O thread: {e}"
            )));
        }

        if let Some(session) = self.lock_sessions().get_mut(&id) {
            session.state = SessionState::Running;
        }

        log::info!(
            "created session {id} ({shell} in {})",
            descriptor.working_directory.display()
        );
        Ok(descriptor)
    }

    /// Forward raw input bytes to a session's shell.
    ///
    /// No transformation, no line buffering; echo is the shell's business.
    pub fn write_input(&self, id: SessionId, data: &[u8]) -> WriteOutcome {
        let mut sessions = self.lock_sessions();
        let session = match sessions.get_mut(&id) {
            Some(session) => session,
            None => {
                log::debug!("write to unknown session {id} ignored");
                return WriteOutcome::Stale;
            }
        };
        if !session.state.is_running() {
            log::debug!("write to session {id} in state {:?} ignored", session.state);
            return WriteOutcome::Stale;
        }
        match session.pty.write(data) {
            Ok(()) => WriteOutcome::Written,
            Err(e) => {
                // The PTY went away under us; the pump thread will harvest
                // the exit shortly.
                log::debug!("write to session {id} failed: {e}");
                WriteOutcome::Stale
            }
        }
    }

    /// Update a session's dimensions and propagate them to the OS PTY so
    /// the shell reflows. No-op unless the session is present and running.
    pub fn resize_session(&self, id: SessionId, cols: u16, rows: u16) {
        let cols = cols.max(1);
        let rows = rows.max(1);

        let mut sessions = self.lock_sessions();
        let session = match sessions.get_mut(&id) {
            Some(session) => session,
            None => {
                log::debug!("resize of unknown session {id} ignored");
                return;
            }
        };
        if !session.state.is_running() {
            return;
        }

        session.cols = cols;
        session.rows = rows;
        if let Err(e) = session.pty.resize(cols, rows) {
            log::warn!("resize of session {id} to {cols}x{rows} failed: {e}");
        } else {
            log::debug!("resized session {id} to {cols}x{rows}");
        }
    }

    /// Close a session: terminate its process within the kill grace
    /// period, release its resources, and evict it from the registry.
    ///
    /// Idempotent; closing an absent id is a no-op.
    pub async fn close_session(&self, id: SessionId) {
        let session = self.lock_sessions().remove(&id);
        let mut session = match session {
            Some(session) => session,
            None => {
                log::debug!("close of unknown session {id} is a no-op");
                return;
            }
        };

        session.state = SessionState::Closed;
        // Drop the outlet first so trailing chunks from the dying shell
        // are discarded rather than buffered.
        self.router.remove(id);

        match session.pty.terminate(KILL_GRACE).await {
            Ok(code) => log::info!("closed session {id} (exit code {code})"),
            Err(e) => log::warn!("session {id} did not terminate cleanly: {e}"),
        }
    }

    /// Terminate every session and clear the registry.
    ///
    /// Best effort: a session that resists termination is recorded and the
    /// pass continues. Never fails outward.
    pub async fn close_all(&self) -> Vec<CloseFailure> {
        let drained: Vec<(SessionId, Session)> = self.lock_sessions().drain().collect();

        let mut failures = Vec::new();
        for (id, mut session) in drained {
            session.state = SessionState::Closed;
            self.router.remove(id);
            match session.pty.terminate(KILL_GRACE).await {
                Ok(_) => {}
                Err(error) => {
                    log::warn!("session {id} resisted termination: {error}");
                    failures.push(CloseFailure {
                        session_id: id,
                        error,
                    });
                }
            }
        }

        log::info!(
            "closed all sessions ({} forced-termination failures)",
            failures.len()
        );
        failures
    }

    /// Public descriptor of a session, if it is registered.
    pub fn get_session(&self, id: SessionId) -> Option<SessionDescriptor> {
        self.lock_sessions().get(&id).map(|s| s.descriptor.clone())
    }

    /// Descriptors of all registered sessions, ordered by id.
    pub fn list_sessions(&self) -> Vec<SessionDescriptor> {
        let mut descriptors: Vec<SessionDescriptor> = self
            .lock_sessions()
            .values()
            .map(|s| s.descriptor.clone())
            .collect();
        descriptors.sort_by_key(|d| d.id);
        descriptors
    }

    /// Current (cols, rows) of a session.
    pub fn dimensions(&self, id: SessionId) -> Option<(u16, u16)> {
        self.lock_sessions().get(&id).map(|s| (s.cols, s.rows))
    }

    /// Current lifecycle state of a session.
    pub fn state(&self, id: SessionId) -> Option<SessionState> {
        self.lock_sessions().get(&id).map(|s| s.state)
    }

    /// The shell executable a session was launched with.
    pub fn shell_path(&self, id: SessionId) -> Option<String> {
        self.lock_sessions().get(&id).map(|s| s.shell_path.clone())
    }

    pub fn len(&self) -> usize {
        self.lock_sessions().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock_sessions().is_empty()
    }

    fn lock_sessions(&self) -> MutexGuard<'_, HashMap<SessionId, Session>> {
        lock_map(&self.sessions)
    }
}

fn lock_map(sessions: &Mutex<HashMap<SessionId, Session>>) -> MutexGuard<'_, HashMap<SessionId, Session>> {
    sessions.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Per-session I/O pump, run on a dedicated OS thread because PTY reads
/// block. Reads until EOF, pushing every chunk to the router in
/// production order, then harvests the exit status.
fn pump_loop(
    id: SessionId,
    mut reader: Box<dyn Read + Send>,
    sessions: SessionMap,
    router: Arc<StreamRouter>,
) {
    let mut buf = [0u8; 65536];
    loop {
        match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => router.deliver(id, buf[..n].to_vec()),
            // Read errors mean the PTY is gone; treat like EOF.
            Err(_) => break,
        }
    }

    if let Some(code) = harvest_exit(&sessions, id) {
        router.deliver_exit(id, code);
    }
}

/// Record a self-exit observed by the pump thread.
///
/// Returns `Some(code)` only when this call performed the
/// `Running -> Exited` transition, so the exit notification is emitted at
/// most once. Returns `None` when the session was already closed (explicit
/// close produces EOF too) or already harvested. The map lock is released
/// between polls.
fn harvest_exit(sessions: &SessionMap, id: SessionId) -> Option<Option<u32>> {
    let deadline = Instant::now() + EXIT_HARVEST_WINDOW;
    loop {
        {
            let mut sessions = lock_map(sessions);
            let session = sessions.get_mut(&id)?;
            if session.state.is_terminal() {
                return None;
            }
            if let Some(code) = session.pty.try_wait() {
                session.mark_exited(Some(code));
                log::info!("session {id} exited with code {code}");
                return Some(Some(code));
            }
            if Instant::now() >= deadline {
                // EOF without a reapable child, e.g. the shell handed its
                // tty to a surviving descendant.
                session.mark_exited(None);
                log::warn!("session {id} hit EOF but no exit code was available");
                return Some(None);
            }
        }
        std::thread::sleep(Duration::from_millis(25));
    }
}
