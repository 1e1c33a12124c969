//! Output fan-out.
//!
//! One producer, the session's terminal output pump, feeds the broadcaster;
//! every registered sink (the attached parties plus the capture buffer)
//! receives each chunk.

use std::collections::HashMap;
use std::io;
use std::sync::{Arc, Mutex, RwLock};

use tracing::trace;

/// A write sink registered with a [`Broadcaster`].
///
/// `write` performs one underlying write and reports how many bytes it
/// accepted; short writes are surfaced to the broadcaster, not retried.
pub trait OutputSink: Send + Sync {
    fn write(&self, buf: &[u8]) -> io::Result<usize>;
}

/// Replicates one byte stream to a dynamic set of sinks.
pub struct Broadcaster {
    sinks: RwLock<HashMap<String, Arc<dyn OutputSink>>>,
}

impl Broadcaster {
    pub fn new() -> Self {
        Self {
            sinks: RwLock::new(HashMap::new()),
        }
    }

    /// Registers `sink` under `id`, replacing any prior sink with that id.
    pub fn register(&self, id: &str, sink: Arc<dyn OutputSink>) {
        self.sinks.write().unwrap().insert(id.to_string(), sink);
        trace!(sink_id = %id, "registered sink");
    }

    /// Removes the sink registered under `id`. Returns whether it existed.
    pub fn unregister(&self, id: &str) -> bool {
        let existed = self.sinks.write().unwrap().remove(id).is_some();
        trace!(sink_id = %id, existed, "unregistered sink");
        existed
    }

    /// The number of registered sinks.
    pub fn sink_count(&self) -> usize {
        self.sinks.read().unwrap().len()
    }

    /// Writes `buf` to every registered sink.
    ///
    /// Runs under the read lock: concurrent writes proceed together while
    /// registration changes wait, so no sink is missed or written twice
    /// within one call. Fails fast on the first sink that errors or accepts
    /// fewer bytes than requested; sinks already written to keep their data
    /// (delivery is at-most-once, not exactly-once).
    pub fn write(&self, buf: &[u8]) -> io::Result<usize> {
        let sinks = self.sinks.read().unwrap();
        for (id, sink) in sinks.iter() {
            let n = sink
                .write(buf)
                .map_err(|e| io::Error::new(e.kind(), format!("sink {id}: {e}")))?;
            if n != buf.len() {
                return Err(io::Error::new(
                    io::ErrorKind::WriteZero,
                    format!("short write to sink {id}: {n} of {} bytes", buf.len()),
                ));
            }
        }
        Ok(buf.len())
    }
}

impl Default for Broadcaster {
    fn default() -> Self {
        Self::new()
    }
}

/// Accumulating sink recording everything the session's command wrote.
///
/// Registered before the first party attaches, so output racing the first
/// attachment still lands in the completion audit event.
#[derive(Clone, Default)]
pub struct CaptureBuffer {
    buf: Arc<Mutex<Vec<u8>>>,
}

impl CaptureBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything captured so far.
    pub fn contents(&self) -> Vec<u8> {
        self.buf.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.buf.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl OutputSink for CaptureBuffer {
    fn write(&self, buf: &[u8]) -> io::Result<usize> {
        self.buf.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }
}
