//! Test doubles for the session core: an in-memory duplex channel, a
//! scripted terminal, and recording context/audit implementations.

use std::collections::VecDeque;
use std::io::{Read, Write};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use events::{AuditSink, ShellEvent};

use crate::session::pty::{ShellCommand, TermError, Terminal, TerminalAllocator};
use crate::session::shell::ExecResult;
use crate::transport::{Channel, Closer, ConnContext};

/// Polls `cond` every 10ms for up to ~2s.
pub async fn wait_for(mut cond: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

/// One direction of an in-memory byte stream. Readers block on a condvar
/// until data arrives or the pipe closes.
#[derive(Clone, Default)]
pub struct Pipe {
    state: Arc<(Mutex<PipeState>, Condvar)>,
}

#[derive(Default)]
struct PipeState {
    buf: VecDeque<u8>,
    closed: bool,
}

impl Pipe {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn close(&self) {
        let (lock, cvar) = &*self.state;
        lock.lock().unwrap().closed = true;
        cvar.notify_all();
    }

    pub fn reader(&self) -> PipeReader {
        PipeReader(self.clone())
    }

    pub fn writer(&self) -> PipeWriter {
        PipeWriter(self.clone())
    }

    /// Everything written so far, without consuming it.
    pub fn snapshot(&self) -> Vec<u8> {
        let (lock, _) = &*self.state;
        lock.lock().unwrap().buf.iter().copied().collect()
    }
}

pub struct PipeReader(Pipe);

impl Read for PipeReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let (lock, cvar) = &*self.0.state;
        let mut state = lock.lock().unwrap();
        loop {
            if !state.buf.is_empty() {
                let n = buf.len().min(state.buf.len());
                for slot in buf.iter_mut().take(n) {
                    *slot = state.buf.pop_front().unwrap();
                }
                return Ok(n);
            }
            if state.closed {
                return Ok(0);
            }
            state = cvar.wait(state).unwrap();
        }
    }
}

pub struct PipeWriter(Pipe);

impl Write for PipeWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let (lock, cvar) = &*self.0.state;
        let mut state = lock.lock().unwrap();
        if state.closed {
            return Err(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "pipe closed",
            ));
        }
        state.buf.extend(buf.iter().copied());
        cvar.notify_all();
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// In-memory duplex channel. The core reads what the test writes through
/// [`remote_writer`](Self::remote_writer) and writes what the test observes
/// through [`sent_to_remote`](Self::sent_to_remote).
#[derive(Default)]
pub struct MemoryChannel {
    inbound: Pipe,
    outbound: Pipe,
}

impl MemoryChannel {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Remote side: bytes written here show up as party input.
    pub fn remote_writer(&self) -> PipeWriter {
        self.inbound.writer()
    }

    /// Remote side: everything the core has sent to this party so far.
    pub fn sent_to_remote(&self) -> Vec<u8> {
        self.outbound.snapshot()
    }

    pub fn close(&self) {
        self.inbound.close();
        self.outbound.close();
    }
}

impl Channel for MemoryChannel {
    fn reader(&self) -> Box<dyn Read + Send> {
        Box::new(self.inbound.reader())
    }

    fn writer(&self) -> Box<dyn Write + Send> {
        Box::new(self.outbound.writer())
    }
}

#[derive(Default)]
struct FakeTermInner {
    output: Pipe,
    input: Pipe,
    exit: (Mutex<Option<i32>>, Condvar),
    commands: Mutex<Vec<ShellCommand>>,
    closes: AtomicUsize,
    fail_run: bool,
}

/// Scripted terminal: tests feed its output stream, observe what parties
/// typed into it, and decide when the command exits. Clones share state, so
/// a test can keep a handle to a terminal it handed to the core.
#[derive(Clone, Default)]
pub struct FakeTerminal {
    inner: Arc<FakeTermInner>,
}

impl FakeTerminal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Terminal whose `run` fails, for spawn-failure paths.
    pub fn failing_run() -> Self {
        Self {
            inner: Arc::new(FakeTermInner {
                fail_run: true,
                ..Default::default()
            }),
        }
    }

    /// Feeds bytes as command output.
    pub fn push_output(&self, data: &[u8]) {
        self.inner
            .output
            .writer()
            .write_all(data)
            .expect("fake terminal output closed");
    }

    /// Everything parties have typed so far.
    pub fn input_received(&self) -> Vec<u8> {
        self.inner.input.snapshot()
    }

    /// Terminates the scripted command with `code`: waiters wake up and the
    /// output stream ends, like a real process exiting.
    pub fn set_exit(&self, code: i32) {
        let (lock, cvar) = &self.inner.exit;
        lock.lock().unwrap().get_or_insert(code);
        cvar.notify_all();
        self.inner.output.close();
    }

    /// Commands passed to `run` so far.
    pub fn commands(&self) -> Vec<ShellCommand> {
        self.inner.commands.lock().unwrap().clone()
    }

    pub fn run_count(&self) -> usize {
        self.inner.commands.lock().unwrap().len()
    }

    pub fn close_count(&self) -> usize {
        self.inner.closes.load(Ordering::SeqCst)
    }
}

impl Terminal for FakeTerminal {
    fn reader(&self) -> Result<Box<dyn Read + Send>, TermError> {
        Ok(Box::new(self.inner.output.reader()))
    }

    fn writer(&self) -> Result<Box<dyn Write + Send>, TermError> {
        Ok(Box::new(self.inner.input.writer()))
    }

    fn run(&self, cmd: &ShellCommand) -> Result<(), TermError> {
        if self.inner.fail_run {
            return Err(TermError::Spawn("scripted spawn failure".to_string()));
        }
        self.inner.commands.lock().unwrap().push(cmd.clone());
        Ok(())
    }

    fn wait(&self) -> Result<i32, TermError> {
        let (lock, cvar) = &self.inner.exit;
        let mut code = lock.lock().unwrap();
        loop {
            if let Some(code) = *code {
                return Ok(code);
            }
            code = cvar.wait(code).unwrap();
        }
    }

    fn close(&self) -> Result<(), TermError> {
        self.inner.closes.fetch_add(1, Ordering::SeqCst);
        // Closing behaves like a kill: the output ends, input writes start
        // failing, and any pending wait resolves.
        let (lock, cvar) = &self.inner.exit;
        lock.lock().unwrap().get_or_insert(130);
        cvar.notify_all();
        self.inner.output.close();
        self.inner.input.close();
        Ok(())
    }
}

/// Allocator handing out pre-scripted terminals, counting allocations. An
/// empty allocator fails allocation, which doubles as the
/// creation-failure path.
pub struct FakeAllocator {
    terminals: Mutex<VecDeque<FakeTerminal>>,
    allocated: AtomicUsize,
}

impl FakeAllocator {
    pub fn with_terminals(terminals: Vec<FakeTerminal>) -> Arc<Self> {
        Arc::new(Self {
            terminals: Mutex::new(terminals.into()),
            allocated: AtomicUsize::new(0),
        })
    }

    pub fn allocations(&self) -> usize {
        self.allocated.load(Ordering::SeqCst)
    }
}

impl TerminalAllocator for FakeAllocator {
    fn allocate(&self) -> Result<Box<dyn Terminal>, TermError> {
        self.allocated.fetch_add(1, Ordering::SeqCst);
        let terminal = self
            .terminals
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| TermError::Allocate("no scripted terminal left".to_string()))?;
        Ok(Box::new(terminal))
    }
}

/// Recording connection context.
#[derive(Default)]
pub struct TestContext {
    peer: String,
    inherited: Mutex<Option<Box<dyn Terminal>>>,
    closers: Mutex<Vec<Arc<dyn Closer>>>,
    results: Mutex<Vec<ExecResult>>,
}

impl TestContext {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            peer: "tester@local".to_string(),
            ..Default::default()
        })
    }

    /// Context carrying an inherited terminal, as after a PTY request.
    pub fn with_terminal(terminal: FakeTerminal) -> Arc<Self> {
        Arc::new(Self {
            peer: "tester@local".to_string(),
            inherited: Mutex::new(Some(Box::new(terminal))),
            ..Default::default()
        })
    }

    pub fn results(&self) -> Vec<ExecResult> {
        self.results.lock().unwrap().clone()
    }

    pub fn closer_count(&self) -> usize {
        self.closers.lock().unwrap().len()
    }

    /// Simulates the transport tearing the connection down: fires every
    /// registered closer and collects the errors. May be called repeatedly,
    /// like a transport retrying teardown.
    pub fn fire_closers(&self) -> Vec<anyhow::Error> {
        let closers: Vec<_> = self.closers.lock().unwrap().clone();
        closers
            .iter()
            .filter_map(|closer| closer.close().err())
            .collect()
    }
}

impl ConnContext for TestContext {
    fn take_inherited_terminal(&self) -> Option<Box<dyn Terminal>> {
        self.inherited.lock().unwrap().take()
    }

    fn on_close(&self, closer: Arc<dyn Closer>) {
        self.closers.lock().unwrap().push(closer);
    }

    fn deliver_result(&self, result: ExecResult) {
        self.results.lock().unwrap().push(result);
    }

    fn peer_identity(&self) -> String {
        self.peer.clone()
    }
}

/// Audit sink that stores every event.
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<ShellEvent>>,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<ShellEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl AuditSink for RecordingSink {
    fn emit(&self, event: ShellEvent) {
        self.events.lock().unwrap().push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipe_read_after_close_drains_then_eof() {
        let pipe = Pipe::new();
        pipe.writer().write_all(b"tail").unwrap();
        pipe.close();

        let mut reader = pipe.reader();
        let mut buf = [0u8; 16];
        assert_eq!(reader.read(&mut buf).unwrap(), 4);
        assert_eq!(&buf[..4], b"tail");
        assert_eq!(reader.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn test_pipe_write_after_close_fails() {
        let pipe = Pipe::new();
        pipe.close();
        assert!(pipe.writer().write_all(b"x").is_err());
    }

    #[test]
    fn test_fake_terminal_wait_resolves_on_exit() {
        let fake = FakeTerminal::new();
        let waiter = {
            let fake = fake.clone();
            std::thread::spawn(move || fake.wait())
        };
        fake.set_exit(42);
        assert_eq!(waiter.join().unwrap().unwrap(), 42);
    }

    #[test]
    fn test_fake_terminal_close_is_counted() {
        let fake = FakeTerminal::new();
        fake.close().unwrap();
        fake.close().unwrap();
        assert_eq!(fake.close_count(), 2);
    }
}
