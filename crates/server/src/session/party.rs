//! One attached connection.

use std::io::Write;
use std::sync::{Arc, Mutex, Weak};

use tracing::debug;
use uuid::Uuid;

use crate::session::broadcaster::OutputSink;
use crate::session::shell::ShellSession;
use crate::session::SessionError;
use crate::transport::{Channel, Closer, ConnContext};

/// One party attached to a shared session: the write endpoint towards its
/// remote end plus the hooks tying its lifetime to the connection.
///
/// Party ids are fresh per attachment; a connection that leaves and joins
/// again gets a new id.
pub struct Party {
    id: String,
    session: Weak<ShellSession>,
    channel: Arc<dyn Channel>,
    ctx: Arc<dyn ConnContext>,
    writer: Mutex<Box<dyn Write + Send>>,
}

impl Party {
    pub(crate) fn new(
        session: Weak<ShellSession>,
        channel: Arc<dyn Channel>,
        ctx: Arc<dyn ConnContext>,
    ) -> Arc<Self> {
        let writer = Mutex::new(channel.writer());
        Arc::new(Self {
            id: Uuid::new_v4().to_string(),
            session,
            channel,
            ctx,
            writer,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub(crate) fn context(&self) -> &Arc<dyn ConnContext> {
        &self.ctx
    }

    pub(crate) fn channel(&self) -> &Arc<dyn Channel> {
        &self.channel
    }

    /// Departs from the owning session.
    ///
    /// Routed through the registry so last-party accounting runs. Errors if
    /// the party already departed (a duplicate close) or the session is
    /// gone.
    pub fn depart(&self) -> Result<(), SessionError> {
        let session = self.session.upgrade().ok_or(SessionError::SessionGone)?;
        let registry = session.registry().ok_or(SessionError::SessionGone)?;
        registry.leave_shell(session.id(), &self.id)
    }
}

impl OutputSink for Party {
    /// Forwards session output to the remote end. One underlying channel
    /// write per call, so short writes surface to the broadcaster.
    fn write(&self, buf: &[u8]) -> std::io::Result<usize> {
        self.writer.lock().unwrap().write(buf)
    }
}

impl Closer for Party {
    fn close(&self) -> anyhow::Result<()> {
        debug!(party_id = %self.id, "connection closed, departing session");
        self.depart()?;
        Ok(())
    }
}
