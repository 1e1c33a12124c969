//! Shared shell sessions.
//!
//! A session is one live terminal plus the command running on it. Parties
//! attach and detach dynamically; all of them see the same output stream and
//! all of them can type into the same terminal. The registry owns the table
//! of live sessions and is the single entry point for the protocol-dispatch
//! layer.

pub mod broadcaster;
pub mod party;
pub mod pty;
pub mod registry;
pub mod shell;
pub mod subsystem;

use thiserror::Error;

pub use broadcaster::{Broadcaster, CaptureBuffer, OutputSink};
pub use party::Party;
pub use pty::{PtyAllocator, PtyTerminal, ShellCommand, TermError, Terminal, TerminalAllocator};
pub use registry::{SessionInfo, SessionRegistry};
pub use shell::{ExecResult, ShellSession};
pub use subsystem::{JoinSubsystem, JOIN_PREFIX};

/// Errors surfaced by session and registry operations.
#[derive(Debug, Error)]
pub enum SessionError {
    /// No session with the given id is registered.
    #[error("session not found: {0}")]
    SessionNotFound(String),

    /// A session with the given id is already registered.
    #[error("session already exists: {0}")]
    SessionExists(String),

    /// The session has no party with the given id.
    #[error("party not found: {0}")]
    PartyNotFound(String),

    /// The owning session or registry has already been torn down.
    #[error("session is already gone")]
    SessionGone,

    /// A subsystem request that does not follow the expected form.
    #[error("malformed subsystem request: {0}")]
    MalformedRequest(String),

    /// Terminal allocation, spawn, or teardown failure.
    #[error(transparent)]
    Term(#[from] TermError),
}
