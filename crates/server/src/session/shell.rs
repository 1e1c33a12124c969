//! The shared session: one terminal, one command, many parties.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::sync::{Arc, Mutex, OnceLock, Weak};

use events::{AuditSink, ShellEvent};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::session::broadcaster::{Broadcaster, CaptureBuffer, OutputSink};
use crate::session::party::Party;
use crate::session::pty::{ShellCommand, Terminal, TerminalAllocator};
use crate::session::registry::SessionRegistry;
use crate::session::SessionError;
use crate::transport::{Channel, Closer, ConnContext};

/// Broadcaster id the capture sink is registered under.
const CAPTURE_SINK_ID: &str = "capture";

/// Chunk size for the terminal output and party input pumps.
const PUMP_BUFFER_SIZE: usize = 4096;

/// Outcome of a session's command: the exit code, or the error that kept a
/// real code from being collected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecResult {
    pub code: i32,
    pub error: Option<String>,
}

impl ExecResult {
    /// Result for a command that exited with a real status code.
    pub fn exited(code: i32) -> Self {
        Self { code, error: None }
    }
}

/// One live shared terminal: the command running on it, the fan-out writer,
/// and every attached party.
///
/// Built and registered exclusively through [`SessionRegistry`]; the
/// registry also drives teardown when the last party leaves.
pub struct ShellSession {
    id: String,
    registry: Weak<SessionRegistry>,
    shell: String,
    term: String,
    allocator: Arc<dyn TerminalAllocator>,
    audit: Arc<dyn AuditSink>,
    broadcaster: Broadcaster,
    capture: CaptureBuffer,
    parties: Mutex<HashMap<String, Arc<Party>>>,
    terminal: OnceLock<Arc<dyn Terminal>>,
    closing: CancellationToken,
}

impl ShellSession {
    pub(crate) fn new(
        id: impl Into<String>,
        registry: Weak<SessionRegistry>,
        shell: impl Into<String>,
        term: impl Into<String>,
        allocator: Arc<dyn TerminalAllocator>,
        audit: Arc<dyn AuditSink>,
    ) -> Arc<Self> {
        Arc::new(Self {
            id: id.into(),
            registry,
            shell: shell.into(),
            term: term.into(),
            allocator,
            audit,
            broadcaster: Broadcaster::new(),
            capture: CaptureBuffer::new(),
            parties: Mutex::new(HashMap::new()),
            terminal: OnceLock::new(),
            closing: CancellationToken::new(),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn party_count(&self) -> usize {
        self.parties.lock().unwrap().len()
    }

    /// Everything the session's command has written so far.
    pub fn captured(&self) -> Vec<u8> {
        self.capture.contents()
    }

    pub(crate) fn registry(&self) -> Option<Arc<SessionRegistry>> {
        self.registry.upgrade()
    }

    /// Creates the session's terminal, starts the command on it, attaches
    /// the initiating connection as the first party, and launches the
    /// output and exit-wait pumps. This is the only creation path; on error
    /// nothing has been registered anywhere. Returns once the pumps are
    /// launched, not once they complete.
    pub(crate) fn start(
        self: &Arc<Self>,
        channel: Arc<dyn Channel>,
        ctx: Arc<dyn ConnContext>,
    ) -> Result<(), SessionError> {
        // A terminal allocated earlier on this connection (a PTY request
        // preceding the shell request) is adopted; ownership moves to the
        // session.
        let terminal: Arc<dyn Terminal> = match ctx.take_inherited_terminal() {
            Some(inherited) => Arc::from(inherited),
            None => Arc::from(self.allocator.allocate()?),
        };

        // Minimal, explicit environment: the spawned command sees the
        // terminal type and home directory, nothing else.
        let home = std::env::var("HOME").unwrap_or_default();
        let cmd = ShellCommand::new(&self.shell)
            .env("TERM", &self.term)
            .env("HOME", &home);
        terminal.run(&cmd)?;
        let _ = self.terminal.set(Arc::clone(&terminal));

        // The capture sink goes in before any party, so output racing the
        // first attachment still lands in the completion event.
        self.broadcaster
            .register(CAPTURE_SINK_ID, Arc::new(self.capture.clone()));

        let party = Party::new(Arc::downgrade(self), channel, Arc::clone(&ctx));
        self.add_party(party)?;

        info!(session_id = %self.id, command = %self.shell, "session started");
        self.spawn_output_pump(Arc::clone(&terminal));
        self.spawn_wait_pump(terminal, ctx.peer_identity());
        Ok(())
    }

    /// Attaches a further connection to the running session.
    pub(crate) fn join(
        self: &Arc<Self>,
        channel: Arc<dyn Channel>,
        ctx: Arc<dyn ConnContext>,
    ) -> Result<String, SessionError> {
        let party = Party::new(Arc::downgrade(self), channel, ctx);
        let id = party.id().to_string();
        self.add_party(party)?;
        Ok(id)
    }

    /// Registers a party with the session and the broadcaster, ties its
    /// lifetime to the connection, and starts its input pump.
    pub(crate) fn add_party(self: &Arc<Self>, party: Arc<Party>) -> Result<(), SessionError> {
        let terminal = self.terminal.get().ok_or(SessionError::SessionGone)?;
        let input = terminal.writer()?;

        self.parties
            .lock()
            .unwrap()
            .insert(party.id().to_string(), Arc::clone(&party));
        let sink: Arc<dyn OutputSink> = party.clone();
        self.broadcaster.register(party.id(), sink);
        // Transport-side teardown drives departure through this hook.
        let closer: Arc<dyn Closer> = party.clone();
        party.context().on_close(closer);

        info!(session_id = %self.id, party_id = %party.id(), "party joined");
        self.spawn_input_pump(party, input);
        Ok(())
    }

    /// Removes a party from the party set and the broadcaster. A duplicate
    /// departure reports the party as not found.
    pub(crate) fn leave(&self, party_id: &str) -> Result<(), SessionError> {
        match self.parties.lock().unwrap().remove(party_id) {
            Some(_) => {
                self.broadcaster.unregister(party_id);
                info!(session_id = %self.id, party_id = %party_id, "party left");
                Ok(())
            }
            None => Err(SessionError::PartyNotFound(party_id.to_string())),
        }
    }

    /// Delivers `result` to every party attached right now. Parties joining
    /// afterwards do not receive it.
    pub(crate) fn broadcast_result(&self, result: ExecResult) {
        let parties = self.parties.lock().unwrap();
        for party in parties.values() {
            party.context().deliver_result(result.clone());
        }
        debug!(session_id = %self.id, parties = parties.len(), "result broadcast");
    }

    /// Stops the pumps and releases the terminal. Reachable only through
    /// the registry, after the last party has left.
    pub(crate) fn close(&self) -> Result<(), SessionError> {
        self.closing.cancel();
        match self.terminal.get() {
            Some(terminal) => Ok(terminal.close()?),
            None => Ok(()),
        }
    }

    /// Terminal output into the broadcaster, until the stream ends, a sink
    /// fails the fan-out, or the session is closing. Termination is logged,
    /// never retried: end of output is how the command closing its side
    /// looks.
    fn spawn_output_pump(self: &Arc<Self>, terminal: Arc<dyn Terminal>) {
        let sess = Arc::clone(self);
        tokio::spawn(async move {
            let reader = match terminal.reader() {
                Ok(reader) => Arc::new(Mutex::new(reader)),
                Err(e) => {
                    warn!(session_id = %sess.id, error = %e, "terminal reader unavailable");
                    return;
                }
            };

            let mut written: u64 = 0;
            loop {
                if sess.closing.is_cancelled() {
                    break;
                }
                let reader = Arc::clone(&reader);
                let chunk = tokio::task::spawn_blocking(move || read_chunk(&reader)).await;
                match chunk {
                    Ok(Ok(Some(data))) => match sess.broadcaster.write(&data) {
                        Ok(n) => written += n as u64,
                        Err(e) => {
                            debug!(session_id = %sess.id, error = %e, "fan-out failed");
                            break;
                        }
                    },
                    Ok(Ok(None)) => {
                        debug!(session_id = %sess.id, "terminal output ended");
                        break;
                    }
                    Ok(Err(e)) => {
                        debug!(session_id = %sess.id, error = %e, "terminal read failed");
                        break;
                    }
                    Err(e) => {
                        error!(session_id = %sess.id, error = %e, "terminal read task panicked");
                        break;
                    }
                }
            }
            info!(session_id = %sess.id, bytes = written, "terminal output pump finished");
        });
    }

    /// Blocks until the command terminates, emits the audit event, and fans
    /// the result out to everyone attached at that moment. A wait error and
    /// a collected result are mutually exclusive reports.
    fn spawn_wait_pump(self: &Arc<Self>, terminal: Arc<dyn Terminal>, peer: String) {
        let sess = Arc::clone(self);
        tokio::spawn(async move {
            let waited = tokio::task::spawn_blocking(move || terminal.wait()).await;
            let waited = match waited {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!(session_id = %sess.id, error = %e, "wait task panicked");
                    return;
                }
            };

            match waited {
                Err(e) => {
                    error!(session_id = %sess.id, error = %e, "wait failed");
                    sess.audit.emit(ShellEvent::failed(
                        &peer,
                        &sess.shell,
                        sess.capture.contents(),
                        e.to_string(),
                    ));
                }
                Ok(code) => {
                    info!(session_id = %sess.id, exit_code = code, "command exited");
                    sess.audit.emit(ShellEvent::completed(
                        &peer,
                        &sess.shell,
                        sess.capture.contents(),
                        code,
                    ));
                    match sess.registry() {
                        Some(registry) => {
                            if let Err(e) =
                                registry.broadcast_result(&sess.id, ExecResult::exited(code))
                            {
                                warn!(session_id = %sess.id, error = %e, "result broadcast failed");
                            }
                        }
                        None => {
                            debug!(session_id = %sess.id, "registry gone before result broadcast")
                        }
                    }
                }
            }
        });
    }

    /// One per party: channel input into the terminal, until the channel
    /// ends or errors. Its end does not remove the party; departure is
    /// driven by the connection's closers, not by the read side going
    /// quiet.
    fn spawn_input_pump(self: &Arc<Self>, party: Arc<Party>, mut input: Box<dyn Write + Send>) {
        let sess = Arc::clone(self);
        tokio::spawn(async move {
            let reader = Arc::new(Mutex::new(party.channel().reader()));
            let party_id = party.id().to_string();

            let mut written: u64 = 0;
            loop {
                if sess.closing.is_cancelled() {
                    break;
                }
                let reader = Arc::clone(&reader);
                let chunk = tokio::task::spawn_blocking(move || read_chunk(&reader)).await;
                match chunk {
                    Ok(Ok(Some(data))) => {
                        let wrote = input.write_all(&data);
                        if let Err(e) = wrote.and_then(|()| input.flush()) {
                            debug!(session_id = %sess.id, party_id = %party_id, error = %e, "terminal write failed");
                            break;
                        }
                        written += data.len() as u64;
                    }
                    Ok(Ok(None)) => {
                        debug!(session_id = %sess.id, party_id = %party_id, "party input ended");
                        break;
                    }
                    Ok(Err(e)) => {
                        debug!(session_id = %sess.id, party_id = %party_id, error = %e, "party read failed");
                        break;
                    }
                    Err(e) => {
                        error!(session_id = %sess.id, party_id = %party_id, error = %e, "party read task panicked");
                        break;
                    }
                }
            }
            info!(session_id = %sess.id, party_id = %party_id, bytes = written, "party input pump finished");
        });
    }
}

/// One blocking read of up to [`PUMP_BUFFER_SIZE`] bytes. `Ok(None)` is end
/// of stream.
fn read_chunk(reader: &Mutex<Box<dyn Read + Send>>) -> std::io::Result<Option<Vec<u8>>> {
    let mut buf = vec![0u8; PUMP_BUFFER_SIZE];
    let n = reader.lock().unwrap().read(&mut buf)?;
    if n == 0 {
        return Ok(None);
    }
    buf.truncate(n);
    Ok(Some(buf))
}
