//! Terminal abstraction and the portable-pty backend.
//!
//! A [`Terminal`] is one pseudo-terminal plus the process attached to it: it
//! produces one output byte stream, consumes one input byte stream, and
//! yields an eventual exit outcome. Sessions obtain fresh terminals from a
//! [`TerminalAllocator`]; [`PtyAllocator`] is the production implementation
//! on top of the platform PTY.

use std::io::{Read, Write};
use std::sync::{Arc, Mutex};

use portable_pty::{
    native_pty_system, Child, ChildKiller, CommandBuilder, MasterPty, PtySize, SlavePty,
};
use thiserror::Error;
use tracing::debug;

use crate::config::SessionConfig;

/// Errors from terminal allocation and process control.
#[derive(Debug, Error)]
pub enum TermError {
    /// Failed to allocate a terminal.
    #[error("failed to allocate terminal: {0}")]
    Allocate(String),

    /// Failed to open a reader or writer on the terminal.
    #[error("failed to open terminal stream: {0}")]
    Stream(String),

    /// Failed to spawn the command.
    #[error("failed to spawn command: {0}")]
    Spawn(String),

    /// No command is running on this terminal.
    #[error("no command is running on this terminal")]
    NotStarted,

    /// Waiting for the command failed.
    #[error("failed to wait for command: {0}")]
    Wait(String),

    /// The terminal has already been closed.
    #[error("terminal is closed")]
    Closed,
}

/// A command to run on a terminal: a program and its complete environment.
///
/// The environment is explicit. Nothing is inherited from the server
/// process, so the spawned command's environment stays deterministic and
/// auditable.
#[derive(Debug, Clone)]
pub struct ShellCommand {
    program: String,
    env: Vec<(String, String)>,
}

impl ShellCommand {
    /// A command with an empty environment.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            env: Vec::new(),
        }
    }

    /// Adds one environment variable.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// The program to run.
    pub fn program(&self) -> &str {
        &self.program
    }

    /// The complete environment the command will see.
    pub fn env_vars(&self) -> &[(String, String)] {
        &self.env
    }
}

/// One pseudo-terminal plus the process attached to it.
///
/// All methods take `&self`; implementations serialize access internally so
/// the reader, writer, and wait handles can live on different tasks.
pub trait Terminal: Send + Sync {
    /// A blocking reader over the terminal's output stream.
    fn reader(&self) -> Result<Box<dyn Read + Send>, TermError>;

    /// A blocking writer into the terminal's input stream. Every handle
    /// serializes its underlying writes, so handles held by different tasks
    /// may write concurrently.
    fn writer(&self) -> Result<Box<dyn Write + Send>, TermError>;

    /// Starts `cmd` attached to the terminal. At most one command per
    /// terminal.
    fn run(&self, cmd: &ShellCommand) -> Result<(), TermError>;

    /// Blocks until the command exits and returns its exit code. The wait
    /// is consumed; a second call fails with [`TermError::NotStarted`].
    fn wait(&self) -> Result<i32, TermError>;

    /// Kills the command if it is still running and releases the terminal.
    fn close(&self) -> Result<(), TermError>;
}

/// Allocates fresh terminals for sessions that did not inherit one.
pub trait TerminalAllocator: Send + Sync {
    fn allocate(&self) -> Result<Box<dyn Terminal>, TermError>;
}

/// Allocator producing [`PtyTerminal`]s of a fixed size.
pub struct PtyAllocator {
    size: PtySize,
}

impl PtyAllocator {
    pub fn new(cols: u16, rows: u16) -> Self {
        Self {
            size: PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            },
        }
    }

    /// Allocator sized per the session configuration.
    pub fn from_config(config: &SessionConfig) -> Self {
        Self::new(config.cols, config.rows)
    }
}

impl Default for PtyAllocator {
    fn default() -> Self {
        Self::new(80, 24)
    }
}

impl TerminalAllocator for PtyAllocator {
    fn allocate(&self) -> Result<Box<dyn Terminal>, TermError> {
        Ok(Box::new(PtyTerminal::open(self.size)?))
    }
}

/// Shared input writer onto a PTY. A mutex serializes the underlying
/// writes, so concurrent handles interleave at write-call granularity.
struct PtyWriter(Arc<Mutex<Box<dyn Write + Send>>>);

impl Write for PtyWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.0.lock().unwrap().flush()
    }
}

/// Pseudo-terminal backed by the platform PTY.
pub struct PtyTerminal {
    master: Mutex<Option<Box<dyn MasterPty + Send>>>,
    slave: Mutex<Option<Box<dyn SlavePty + Send>>>,
    writer: Arc<Mutex<Box<dyn Write + Send>>>,
    // The child moves out of its slot when waited on, so close() can still
    // kill through the cloned killer while a wait is in flight.
    child: Mutex<Option<Box<dyn Child + Send + Sync>>>,
    killer: Mutex<Option<Box<dyn ChildKiller + Send + Sync>>>,
}

impl PtyTerminal {
    /// Opens a PTY pair of the given size. No command is running yet.
    pub fn open(size: PtySize) -> Result<Self, TermError> {
        let pty_system = native_pty_system();
        let pair = pty_system
            .openpty(size)
            .map_err(|e| TermError::Allocate(e.to_string()))?;
        let writer = pair
            .master
            .take_writer()
            .map_err(|e| TermError::Allocate(e.to_string()))?;

        Ok(Self {
            master: Mutex::new(Some(pair.master)),
            slave: Mutex::new(Some(pair.slave)),
            writer: Arc::new(Mutex::new(writer)),
            child: Mutex::new(None),
            killer: Mutex::new(None),
        })
    }
}

impl Terminal for PtyTerminal {
    fn reader(&self) -> Result<Box<dyn Read + Send>, TermError> {
        let master = self.master.lock().unwrap();
        let master = master.as_ref().ok_or(TermError::Closed)?;
        master
            .try_clone_reader()
            .map_err(|e| TermError::Stream(e.to_string()))
    }

    fn writer(&self) -> Result<Box<dyn Write + Send>, TermError> {
        if self.master.lock().unwrap().is_none() {
            return Err(TermError::Closed);
        }
        Ok(Box::new(PtyWriter(Arc::clone(&self.writer))))
    }

    fn run(&self, cmd: &ShellCommand) -> Result<(), TermError> {
        let slave = self
            .slave
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| TermError::Spawn("a command was already started".to_string()))?;

        let mut builder = CommandBuilder::new(cmd.program());
        builder.env_clear();
        for (key, value) in cmd.env_vars() {
            builder.env(key, value);
        }

        let child = slave
            .spawn_command(builder)
            .map_err(|e| TermError::Spawn(e.to_string()))?;

        *self.killer.lock().unwrap() = Some(child.clone_killer());
        *self.child.lock().unwrap() = Some(child);
        Ok(())
    }

    fn wait(&self) -> Result<i32, TermError> {
        let mut child = self
            .child
            .lock()
            .unwrap()
            .take()
            .ok_or(TermError::NotStarted)?;
        let status = child.wait().map_err(|e| TermError::Wait(e.to_string()))?;
        Ok(status.exit_code() as i32)
    }

    fn close(&self) -> Result<(), TermError> {
        if let Some(mut killer) = self.killer.lock().unwrap().take() {
            // The child may have exited on its own already; a failed kill
            // does not block releasing the PTY.
            if let Err(e) = killer.kill() {
                debug!(error = %e, "kill on close failed, process likely exited");
            }
        }
        self.slave.lock().unwrap().take();
        self.master.lock().unwrap().take().ok_or(TermError::Closed)?;
        Ok(())
    }
}
