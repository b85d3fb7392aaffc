//! Output half of the streaming router.
//!
//! Every session's pump thread pushes into one shared event stream; the
//! consumer demultiplexes by session id. A session whose tab has not
//! attached yet gets its output buffered in order, so shell startup
//! banners survive the window between process spawn and tab mount.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc;

use crate::events::TerminalEvent;
use crate::session::SessionId;

/// Delivery state for one session's output.
enum Outlet {
    /// No subscriber yet; events accumulate in order until first attach.
    Pending(Vec<TerminalEvent>),
    /// A subscriber is bound; events flow straight into the stream.
    Attached,
}

/// Routes per-session output and exit events onto the single stream
/// consumed by the presentation layer.
///
/// The router never holds a process handle; its only per-session state is
/// the outlet. Delivery and attach both run under the outlet lock, which
/// is what guarantees the buffered flush cannot interleave with fresh
/// output from the same session.
pub struct StreamRouter {
    tx: mpsc::UnboundedSender<TerminalEvent>,
    outlets: Mutex<HashMap<SessionId, Outlet>>,
    closed: AtomicBool,
}

impl StreamRouter {
    /// Create a router and the event stream serving all sessions.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<TerminalEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let router = Self {
            tx,
            outlets: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        };
        (router, rx)
    }

    /// Register a session's outlet. Output arriving before
    /// [`attach`](Self::attach) is buffered, not dropped.
    pub fn register(&self, id: SessionId) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        self.lock_outlets()
            .entry(id)
            .or_insert_with(|| Outlet::Pending(Vec::new()));
    }

    /// Bind the subscriber for `id`, flushing any buffered output in order.
    ///
    /// Attaching twice is a no-op; attaching an unknown id creates a live
    /// outlet so delivery starts immediately.
    pub fn attach(&self, id: SessionId) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        let mut outlets = self.lock_outlets();
        if let Some(Outlet::Pending(buffered)) = outlets.insert(id, Outlet::Attached) {
            log::debug!("flushing {} buffered events for session {id}", buffered.len());
            for event in buffered {
                let _ = self.tx.send(event);
            }
        }
    }

    /// Route output bytes from a session onto the stream.
    pub fn deliver(&self, id: SessionId, data: Vec<u8>) {
        self.push(id, TerminalEvent::Output {
            session_id: id,
            data,
        });
    }

    /// Route a session's end-of-session notification onto the stream.
    pub fn deliver_exit(&self, id: SessionId, code: Option<u32>) {
        self.push(id, TerminalEvent::Exited {
            session_id: id,
            code,
        });
    }

    fn push(&self, id: SessionId, event: TerminalEvent) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        let mut outlets = self.lock_outlets();
        match outlets.get_mut(&id) {
            // A closed receiver means the whole front end is gone; dropping
            // the event is the only sane option, as with any send to a
            // disconnected channel.
            Some(Outlet::Attached) => {
                let _ = self.tx.send(event);
            }
            Some(Outlet::Pending(buffered)) => buffered.push(event),
            // Outlet already removed: the session was closed, late chunks
            // from the dying shell are dropped.
            None => {}
        }
    }

    /// Discard the outlet for a closed session, including any unflushed
    /// buffer.
    pub fn remove(&self, id: SessionId) {
        self.lock_outlets().remove(&id);
    }

    /// Drop every outlet and stop accepting traffic. Called once at
    /// application shutdown; safe to call again.
    pub fn shutdown(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.lock_outlets().clear();
    }

    fn lock_outlets(&self) -> MutexGuard<'_, HashMap<SessionId, Outlet>> {
        self.outlets.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
