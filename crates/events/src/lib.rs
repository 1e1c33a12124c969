//! # CoShell Audit Events
//!
//! This crate provides the audit record types emitted by the CoShell server
//! and the sink interface they are delivered through.
//!
//! ## Overview
//!
//! Every shared shell session produces exactly one [`ShellEvent`] when its
//! command terminates, carrying:
//!
//! - **Peer identity**: who started the session
//! - **Command**: what was run
//! - **Captured output**: everything the command wrote to its terminal
//! - **Outcome**: the exit code, or the error that prevented collecting one
//!
//! Sinks implement [`AuditSink`]; the server calls `emit` from the session's
//! exit-wait task. [`TracingSink`] is the built-in sink that writes events to
//! the `tracing` log.
//!
//! ## Modules
//!
//! - [`event`]: Audit record definitions
//! - [`sink`]: The sink trait and built-in sinks

pub mod event;
pub mod sink;

pub use event::{ShellEvent, EXIT_CODE_UNKNOWN};
pub use sink::{AuditSink, TracingSink};
