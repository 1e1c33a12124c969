//! Interfaces the session core expects from the transport layer.
//!
//! The wire protocol, channel framing, and authentication live outside this
//! crate. What reaches the core is, per attachment, an already-open duplex
//! byte channel and a per-connection context carrying the three capabilities
//! the core needs: an optional inherited terminal, closer registration, and
//! result delivery.

use std::io::{Read, Write};
use std::sync::Arc;

use crate::session::pty::Terminal;
use crate::session::shell::ExecResult;

/// An open duplex byte stream between the server and one remote party.
///
/// The core never owns the channel; it borrows read and write handles for
/// the duration of an attachment. Handles refer to the same underlying
/// stream, so a transport may hand out clones of its own halves. Reads and
/// writes are blocking; the core performs them on dedicated blocking tasks.
pub trait Channel: Send + Sync {
    /// A reader over bytes arriving from the remote end.
    fn reader(&self) -> Box<dyn Read + Send>;

    /// A writer towards the remote end.
    fn writer(&self) -> Box<dyn Write + Send>;
}

/// Cleanup hook registered on a connection context, fired by the transport
/// when the connection tears down.
pub trait Closer: Send + Sync {
    fn close(&self) -> anyhow::Result<()>;
}

/// Per-connection context supplied by the transport layer.
///
/// Result-delivery hooks run while the session registry lock is held and
/// must not call back into the registry.
pub trait ConnContext: Send + Sync {
    /// Hands over a terminal allocated earlier on this connection (for
    /// example by a PTY request that preceded the shell request), clearing
    /// it from the context. Ownership transfers to the caller; subsequent
    /// calls return `None`.
    fn take_inherited_terminal(&self) -> Option<Box<dyn Terminal>>;

    /// Registers a cleanup hook fired when the connection closes.
    fn on_close(&self, closer: Arc<dyn Closer>);

    /// Delivers the execution result of the session's command to the
    /// remote end.
    fn deliver_result(&self, result: ExecResult);

    /// Identity of the remote endpoint, recorded in audit events.
    fn peer_identity(&self) -> String;
}
