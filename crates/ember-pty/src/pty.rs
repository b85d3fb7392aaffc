use std::io::{Read, Write};
use std::path::Path;
use std::time::{Duration, Instant};

use portable_pty::{native_pty_system, Child, CommandBuilder, MasterPty, PtySize};

/// Errors from PTY operations.
#[derive(Debug)]
pub enum PtyError {
    SpawnFailed(String),
    IoError(std::io::Error),
    ResizeFailed(String),
    /// The process survived a termination request, the grace period, and a
    /// forced kill.
    KillTimeout,
}

impl std::fmt::Display for PtyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PtyError::SpawnFailed(msg) => write!(f, "PTY spawn failed: {msg}"),
            PtyError::IoError(err) => write!(f, "PTY I/O error: {err}"),
            PtyError::ResizeFailed(msg) => write!(f, "PTY resize failed: {msg}"),
            PtyError::KillTimeout => write!(f, "process did not exit after forced kill"),
        }
    }
}

impl std::error::Error for PtyError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PtyError::IoError(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for PtyError {
    fn from(err: std::io::Error) -> Self {
        PtyError::IoError(err)
    }
}

/// Interval between exit polls while waiting out a grace period.
const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Extra window granted after the forced kill before giving up.
const FORCED_KILL_WINDOW: Duration = Duration::from_millis(250);

/// Owns a portable-pty child process, master pair, reader, and writer.
///
/// The reader is extractable via [`take_reader`](Self::take_reader) so a
/// dedicated I/O thread can block on it without holding whatever lock
/// guards the rest of the handle.
pub struct PtyHandle {
    master: Box<dyn MasterPty + Send>,
    reader: Option<Box<dyn Read + Send>>,
    writer: Option<Box<dyn Write + Send>>,
    child: Box<dyn Child + Send + Sync>,
}

impl PtyHandle {
    /// Spawn `shell` on a fresh PTY in `working_dir` with the given
    /// dimensions.
    pub fn spawn(
        shell: &str,
        working_dir: &Path,
        cols: u16,
        rows: u16,
    ) -> Result<Self, PtyError> {
        let pty_system = native_pty_system();

        let pair = pty_system
            .openpty(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| PtyError::SpawnFailed(format!("failed to open PTY: {e}")))?;

        let mut cmd = CommandBuilder::new(shell);
        cmd.cwd(working_dir);
        cmd.env("TERM", "xterm-256color");

        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| PtyError::SpawnFailed(format!("failed to spawn {shell}: {e}")))?;

        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| PtyError::SpawnFailed(format!("failed to clone reader: {e}")))?;

        let writer = pair
            .master
            .take_writer()
            .map_err(|e| PtyError::SpawnFailed(format!("failed to take writer: {e}")))?;

        Ok(Self {
            master: pair.master,
            reader: Some(reader),
            writer: Some(writer),
            child,
        })
    }

    /// Extract the PTY reader for use in a dedicated I/O thread.
    ///
    /// Returns `None` if the reader was already taken.
    pub fn take_reader(&mut self) -> Option<Box<dyn Read + Send>> {
        self.reader.take()
    }

    /// Write bytes to the PTY master (user input -> shell).
    pub fn write(&mut self, data: &[u8]) -> Result<(), PtyError> {
        match self.writer.as_mut() {
            Some(writer) => {
                writer.write_all(data)?;
                writer.flush()?;
                Ok(())
            }
            None => Err(PtyError::IoError(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "PTY writer closed",
            ))),
        }
    }

    /// Drop the write half of the PTY. Subsequent writes fail.
    pub fn close_writer(&mut self) {
        self.writer = None;
    }

    /// Resize the PTY to new dimensions.
    pub fn resize(&self, cols: u16, rows: u16) -> Result<(), PtyError> {
        self.master
            .resize(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| PtyError::ResizeFailed(format!("{e}")))
    }

    /// Check if the child process is still alive.
    pub fn is_alive(&mut self) -> bool {
        self.try_wait().is_none()
    }

    /// Get the child process exit status if it has exited.
    ///
    /// Returns `None` if the process is still running.
    pub fn try_wait(&mut self) -> Option<u32> {
        match self.child.try_wait() {
            Ok(Some(status)) => Some(status.exit_code()),
            _ => None,
        }
    }

    /// Terminate the child process, waiting at most `grace` for it to die
    /// before escalating to a second, forced kill.
    ///
    /// Closes the input half first so a well-behaved shell can exit on EOF
    /// while the kill is in flight. Returns the exit code on success and
    /// [`PtyError::KillTimeout`] if the process outlived both attempts.
    pub async fn terminate(&mut self, grace: Duration) -> Result<u32, PtyError> {
        if let Some(code) = self.try_wait() {
            return Ok(code);
        }

        self.close_writer();
        self.child.kill()?;

        if let Some(code) = self.poll_exit(grace).await {
            return Ok(code);
        }

        log::warn!("process survived the {}ms grace period, killing again", grace.as_millis());
        let _ = self.child.kill();
        match self.poll_exit(FORCED_KILL_WINDOW).await {
            Some(code) => Ok(code),
            None => Err(PtyError::KillTimeout),
        }
    }

    async fn poll_exit(&mut self, window: Duration) -> Option<u32> {
        let deadline = Instant::now() + window;
        loop {
            if let Some(code) = self.try_wait() {
                return Some(code);
            }
            if Instant::now() >= deadline {
                return None;
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }
}

impl Drop for PtyHandle {
    fn drop(&mut self) {
        // A dropped handle must not leak a live shell.
        if self.try_wait().is_none() {
            let _ = self.child.kill();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn spawn_sh() -> PtyHandle {
        PtyHandle::spawn("/bin/sh", &std::env::temp_dir(), 80, 24)
            .expect("failed to spawn /bin/sh")
    }

    #[test]
    fn test_spawn_pty() {
        let mut handle = spawn_sh();
        assert!(handle.is_alive());
    }

    #[test]
    fn test_spawn_bad_shell_fails() {
        let result = PtyHandle::spawn(
            "/definitely/not/a/shell",
            &std::env::temp_dir(),
            80,
            24,
        );
        // Depending on the platform the failure surfaces either at spawn
        // time or as an immediate child exit.
        match result {
            Err(PtyError::SpawnFailed(_)) => {}
            Err(other) => panic!("unexpected error: {other}"),
            Ok(mut handle) => {
                let deadline = Instant::now() + Duration::from_secs(3);
                while Instant::now() < deadline && handle.is_alive() {
                    thread::sleep(Duration::from_millis(50));
                }
                assert!(!handle.is_alive(), "bogus shell should not keep running");
            }
        }
    }

    #[test]
    fn test_write_read_echo() {
        let mut handle = spawn_sh();

        handle.write(b"echo EMBER_TEST_OK\n").unwrap();

        let mut reader = handle.take_reader().unwrap();
        let mut output = Vec::new();
        let mut buf = [0u8; 4096];

        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            if Instant::now() > deadline {
                break;
            }
            match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    output.extend_from_slice(&buf[..n]);
                    if String::from_utf8_lossy(&output).contains("EMBER_TEST_OK") {
                        break;
                    }
                }
                Err(_) => break,
            }
        }

        let text = String::from_utf8_lossy(&output);
        assert!(
            text.contains("EMBER_TEST_OK"),
            "expected output to contain EMBER_TEST_OK, got: {text}"
        );
    }

    #[test]
    fn test_resize() {
        let handle = spawn_sh();
        let result = handle.resize(120, 40);
        assert!(result.is_ok(), "resize failed: {:?}", result.err());
    }

    #[test]
    fn test_take_reader_once() {
        let mut handle = spawn_sh();
        assert!(handle.take_reader().is_some());
        assert!(handle.take_reader().is_none());
    }

    #[test]
    fn test_write_after_close_writer_fails() {
        let mut handle = spawn_sh();
        handle.close_writer();
        assert!(handle.write(b"echo nope\n").is_err());
    }

    #[test]
    fn test_child_exit_code() {
        let mut handle = spawn_sh();
        handle.write(b"exit 0\n").unwrap();

        // Drain the reader so the shell is not blocked on a full PTY buffer.
        let mut reader = handle.take_reader().unwrap();
        let drain = thread::spawn(move || {
            let mut buf = [0u8; 4096];
            loop {
                match reader.read(&mut buf) {
                    Ok(0) | Err(_) => return,
                    Ok(_) => {}
                }
            }
        });
        let _ = drain.join();

        let deadline = Instant::now() + Duration::from_secs(3);
        while Instant::now() < deadline && handle.try_wait().is_none() {
            thread::sleep(Duration::from_millis(50));
        }

        assert_eq!(handle.try_wait(), Some(0));
    }

    #[tokio::test]
    async fn test_terminate_kills_running_shell() {
        let mut handle = spawn_sh();
        assert!(handle.is_alive());

        let result = handle.terminate(Duration::from_secs(2)).await;
        assert!(result.is_ok(), "terminate failed: {:?}", result.err());
        assert!(!handle.is_alive());
    }

    #[tokio::test]
    async fn test_terminate_already_exited() {
        let mut handle = spawn_sh();
        handle.write(b"exit 3\n").unwrap();

        let mut reader = handle.take_reader().unwrap();
        let drain = thread::spawn(move || {
            let mut buf = [0u8; 4096];
            loop {
                match reader.read(&mut buf) {
                    Ok(0) | Err(_) => return,
                    Ok(_) => {}
                }
            }
        });
        let _ = drain.join();

        let deadline = Instant::now() + Duration::from_secs(3);
        while Instant::now() < deadline && handle.try_wait().is_none() {
            thread::sleep(Duration::from_millis(50));
        }

        // Terminating a dead process reports its exit code without error.
        assert_eq!(handle.terminate(Duration::from_secs(1)).await.unwrap(), 3);
    }
}
