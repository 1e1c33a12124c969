//! # CoShell Server Core
//!
//! Shared interactive shell sessions for a remote-shell server. Any number
//! of client connections can attach to one running command, observe the same
//! output stream, and type into the same terminal; the command and its
//! pseudo-terminal are created exactly once and torn down exactly once, when
//! the last party leaves.
//!
//! ## Architecture
//!
//! ```text
//!                 ┌──────────────────────────────────────┐
//!  new/join ───►  │            SessionRegistry           │
//!                 ├──────────────────────────────────────┤
//!                 │  ┌────────────────────────────────┐  │
//!                 │  │          ShellSession          │  │
//!                 │  │                                │  │
//!                 │  │  PTY ──► Broadcaster ──► Party │  │
//!                 │  │   ▲           │          Party │  │
//!                 │  │   │           ▼            ... │  │
//!                 │  │  input     capture             │  │
//!                 │  └────────────────────────────────┘  │
//!                 └──────────────────────────────────────┘
//! ```
//!
//! The wire protocol, authentication, and connection accept loop live
//! outside this crate: the transport hands the core an already-open duplex
//! byte channel per attachment plus a small per-connection context (see
//! [`transport`]). Registry operations spawn the session's I/O pumps and
//! must be called from within a tokio runtime.
//!
//! ## Modules
//!
//! - [`config`]: Configuration loading and defaults
//! - [`session`]: Sessions, parties, fan-out, PTY backend, registry
//! - [`transport`]: Interfaces the core expects from the transport layer

pub mod config;
pub mod session;
pub mod transport;

#[cfg(test)]
pub(crate) mod testutil;

// Re-export the audit crate for convenience
pub use events;

// Re-export config types for convenience
pub use config::Config;

// Re-export session types for convenience
pub use session::{
    Broadcaster, CaptureBuffer, ExecResult, JoinSubsystem, OutputSink, Party, PtyAllocator,
    PtyTerminal, SessionError, SessionInfo, SessionRegistry, ShellCommand, ShellSession,
    TermError, Terminal, TerminalAllocator, JOIN_PREFIX,
};

// Re-export transport types for convenience
pub use transport::{Channel, Closer, ConnContext};
