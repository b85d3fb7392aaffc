//! Application-shutdown coordination for the terminal subsystem.
//!
//! The host application calls [`LifecycleCoordinator::shutdown_all`] once
//! from its shutdown sequence. The call is idempotent, so a host that
//! signals teardown twice (an early "before unload" notification followed
//! by final teardown) cannot double-release anything.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::registry::SessionRegistry;
use crate::router::StreamRouter;

/// Orchestrates bulk shutdown: terminate every live session, then release
/// router resources.
pub struct LifecycleCoordinator {
    registry: Arc<SessionRegistry>,
    router: Arc<StreamRouter>,
    done: AtomicBool,
}

impl LifecycleCoordinator {
    pub fn new(registry: Arc<SessionRegistry>, router: Arc<StreamRouter>) -> Self {
        Self {
            registry,
            router,
            done: AtomicBool::new(false),
        }
    }

    /// Terminate every live session best-effort and shut the router down.
    ///
    /// Individual termination failures are logged, never raised; sessions
    /// already in a terminal state are handled like any other. Only the
    /// first call does any work.
    pub async fn shutdown_all(&self) {
        if self.done.swap(true, Ordering::SeqCst) {
            log::debug!("shutdown_all called again, ignoring");
            return;
        }

        let failures = self.registry.close_all().await;
        for failure in &failures {
            log::error!(
                "shutdown: session {} could not be terminated: {}",
                failure.session_id,
                failure.error
            );
        }

        self.router.shutdown();
        log::info!(
            "terminal subsystem shut down ({} session(s) required force)",
            failures.len()
        );
    }
}
