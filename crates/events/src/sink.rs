//! Event sinks.

use crate::event::ShellEvent;

/// Receives audit events.
///
/// `emit` is called from session background tasks; implementations should
/// hand the event off quickly rather than perform slow I/O inline.
pub trait AuditSink: Send + Sync {
    /// Delivers one event. Delivery is fire-and-forget; there is no error
    /// path back into the session core.
    fn emit(&self, event: ShellEvent);
}

/// Sink that writes events to the `tracing` log.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl AuditSink for TracingSink {
    fn emit(&self, event: ShellEvent) {
        match &event.error {
            Some(error) => tracing::warn!(
                peer = %event.peer,
                command = %event.command,
                error = %error,
                "session ended without a collected status"
            ),
            None => tracing::info!(
                peer = %event.peer,
                command = %event.command,
                exit_code = event.exit_code,
                captured_bytes = event.output.len(),
                "session completed"
            ),
        }
    }
}
