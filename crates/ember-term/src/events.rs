//! Event types delivered to the presentation layer.
//!
//! All sessions share one event stream; each event carries the originating
//! session id and the consumer demultiplexes. Events are serialized as
//! tagged JSON so a host application can forward them over its IPC channel
//! unchanged.

use serde::Serialize;

use crate::session::SessionId;

/// Events sent from the session manager to the attached front end.
#[derive(Serialize, Clone, Debug)]
#[serde(tag = "type")]
pub enum TerminalEvent {
    /// Raw bytes produced by a session's shell, in production order.
    /// Consecutive chunks may be coalesced but never reordered.
    Output { session_id: SessionId, data: Vec<u8> },
    /// The shell process exited on its own. Sent exactly once per session.
    Exited {
        session_id: SessionId,
        code: Option<u32>,
    },
}

impl TerminalEvent {
    /// The session this event originated from.
    pub fn session_id(&self) -> SessionId {
        match self {
            TerminalEvent::Output { session_id, .. } => *session_id,
            TerminalEvent::Exited { session_id, .. } => *session_id,
        }
    }
}
