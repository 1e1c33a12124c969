//! Audit record definitions.
//!
//! One [`ShellEvent`] is produced per shell session completion. The captured
//! output is kept as raw bytes; terminal output is not guaranteed to be valid
//! UTF-8.

use serde::{Deserialize, Serialize};

/// Exit code recorded when waiting on the command failed before a real
/// status could be collected.
pub const EXIT_CODE_UNKNOWN: i32 = -1;

/// Audit record for one completed shell session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShellEvent {
    /// Identity of the remote endpoint that started the session.
    pub peer: String,

    /// The command that ran on the session's terminal.
    pub command: String,

    /// Everything the command wrote to its terminal.
    #[serde(with = "serde_bytes")]
    pub output: Vec<u8>,

    /// Exit code of the command, or [`EXIT_CODE_UNKNOWN`] when the wait
    /// failed.
    pub exit_code: i32,

    /// Error reported by the wait, if any. Mutually exclusive with a real
    /// exit code.
    pub error: Option<String>,
}

impl ShellEvent {
    /// Record for a command that exited with a real status code.
    pub fn completed(
        peer: impl Into<String>,
        command: impl Into<String>,
        output: Vec<u8>,
        exit_code: i32,
    ) -> Self {
        Self {
            peer: peer.into(),
            command: command.into(),
            output,
            exit_code,
            error: None,
        }
    }

    /// Record for a command whose wait failed before producing a status.
    pub fn failed(
        peer: impl Into<String>,
        command: impl Into<String>,
        output: Vec<u8>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            peer: peer.into(),
            command: command.into(),
            output,
            exit_code: EXIT_CODE_UNKNOWN,
            error: Some(error.into()),
        }
    }

    /// Captured output as text, for display and logging.
    pub fn output_lossy(&self) -> String {
        String::from_utf8_lossy(&self.output).into_owned()
    }
}
