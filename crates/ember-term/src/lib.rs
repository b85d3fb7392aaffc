//! ember-term: terminal session management for Ember.
//!
//! Creates, multiplexes, streams, resizes, and tears down interactive shell
//! sessions backed by pseudo-terminal processes, and exposes them to a
//! presentation layer as independent, switchable tabs. The presentation
//! layer only ever holds session ids; process handles never leave the
//! registry.
//!
//! # Architecture
//!
//! - [`SessionRegistry`] — The authoritative map of live sessions: create,
//!   write input, resize, close, close all.
//! - [`StreamRouter`] — One multiplexed event stream serving all sessions;
//!   output produced before a tab attaches is buffered, not dropped.
//! - [`LifecycleCoordinator`] — Idempotent bulk shutdown for application
//!   close.
//!
//! # Wiring
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use ember_term::{LifecycleCoordinator, SessionRegistry, StreamRouter, TerminalEvent};
//!
//! #[tokio::main]
//! async fn main() {
//!     let (router, mut events) = StreamRouter::new();
//!     let router = Arc::new(router);
//!     let registry = Arc::new(SessionRegistry::new(Arc::clone(&router)));
//!     let lifecycle = LifecycleCoordinator::new(Arc::clone(&registry), Arc::clone(&router));
//!
//!     let session = registry
//!         .create_session("/tmp", 80, 24)
//!         .expect("failed to start terminal");
//!     router.attach(session.id);
//!     registry.write_input(session.id, b"ls\n");
//!
//!     if let Some(TerminalEvent::Output { session_id, data }) = events.recv().await {
//!         let _ = (session_id, data); // hand to the terminal view bound to this id
//!     }
//!
//!     lifecycle.shutdown_all().await;
//! }
//! ```

pub mod events;
pub mod lifecycle;
pub mod registry;
pub mod router;
pub mod session;

pub use ember_pty::{default_shell, PtyError};
pub use events::TerminalEvent;
pub use lifecycle::LifecycleCoordinator;
pub use registry::{CloseFailure, SessionRegistry, WriteOutcome, DEFAULT_COLS, DEFAULT_ROWS};
pub use router::StreamRouter;
pub use session::{SessionDescriptor, SessionId, SessionState};
