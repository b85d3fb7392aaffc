//! Default shell detection.
//!
//! Session creation must never fail because the user's shell could not be
//! determined, so detection failures degrade to a fixed fallback that is
//! present on every supported platform.

#[cfg(not(windows))]
const FALLBACK_SHELL: &str = "/bin/sh";

#[cfg(windows)]
const FALLBACK_SHELL: &str = "cmd.exe";

/// Resolve the shell to launch when the caller does not specify one.
///
/// Uses `$SHELL` on Unix-like systems and `%COMSPEC%` on Windows. If the
/// variable is unset or empty, logs a warning and returns the platform
/// fallback instead of failing.
pub fn default_shell() -> String {
    match detect() {
        Some(shell) => shell,
        None => {
            log::warn!("no default shell detected, falling back to {FALLBACK_SHELL}");
            FALLBACK_SHELL.to_string()
        }
    }
}

#[cfg(not(windows))]
fn detect() -> Option<String> {
    std::env::var("SHELL").ok().filter(|s| !s.is_empty())
}

#[cfg(windows)]
fn detect() -> Option<String> {
    std::env::var("COMSPEC").ok().filter(|s| !s.is_empty())
}
