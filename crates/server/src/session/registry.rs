//! Process-wide session table.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use events::AuditSink;
use tracing::info;

use crate::config::Config;
use crate::session::pty::TerminalAllocator;
use crate::session::shell::{ExecResult, ShellSession};
use crate::session::SessionError;
use crate::transport::{Channel, ConnContext};

/// Snapshot of one registered session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    /// Session id.
    pub id: String,
    /// Number of attached parties.
    pub parties: usize,
}

/// The table of live sessions and the operations that create, locate, and
/// remove them. This is the single entry point for the protocol-dispatch
/// layer.
///
/// One mutex guards the table, held for the whole body of every operation,
/// including the command spawn inside create. Session churn is rare next to
/// per-byte I/O (which all happens off this lock), so the table trades
/// create parallelism for an atomic find-or-create.
///
/// Registry operations spawn the session's I/O pumps and must be called
/// from within a tokio runtime.
pub struct SessionRegistry {
    sessions: Mutex<HashMap<String, Arc<ShellSession>>>,
    shell: String,
    term: String,
    allocator: Arc<dyn TerminalAllocator>,
    audit: Arc<dyn AuditSink>,
}

impl SessionRegistry {
    pub fn new(
        shell: impl Into<String>,
        term: impl Into<String>,
        allocator: Arc<dyn TerminalAllocator>,
        audit: Arc<dyn AuditSink>,
    ) -> Arc<Self> {
        Arc::new(Self {
            sessions: Mutex::new(HashMap::new()),
            shell: shell.into(),
            term: term.into(),
            allocator,
            audit,
        })
    }

    /// Builds a registry from a loaded [`Config`].
    pub fn from_config(
        config: &Config,
        allocator: Arc<dyn TerminalAllocator>,
        audit: Arc<dyn AuditSink>,
    ) -> Arc<Self> {
        Self::new(
            &config.session.default_shell,
            &config.session.term,
            allocator,
            audit,
        )
    }

    /// Creates and registers a session under the caller-supplied `sid`,
    /// with the requesting connection as its first party.
    ///
    /// Ids are caller-owned and used directly as the table key; a `sid`
    /// that is already registered is a recoverable error, never an
    /// overwrite. On a start failure nothing is inserted.
    pub fn new_shell(
        self: &Arc<Self>,
        sid: &str,
        channel: Arc<dyn Channel>,
        ctx: Arc<dyn ConnContext>,
    ) -> Result<(), SessionError> {
        let mut sessions = self.sessions.lock().unwrap();
        if sessions.contains_key(sid) {
            return Err(SessionError::SessionExists(sid.to_string()));
        }
        let session = self.create_locked(sid, channel, ctx)?;
        sessions.insert(sid.to_string(), session);
        Ok(())
    }

    /// Attaches to `sid`, creating and registering the session first when
    /// it does not exist yet. Find-or-create is atomic under the table
    /// lock, so concurrent joins for a fresh id all land in one session.
    pub fn join_shell(
        self: &Arc<Self>,
        sid: &str,
        channel: Arc<dyn Channel>,
        ctx: Arc<dyn ConnContext>,
    ) -> Result<(), SessionError> {
        let mut sessions = self.sessions.lock().unwrap();
        match sessions.get(sid) {
            Some(session) => {
                info!(session_id = %sid, "joining session");
                session.join(channel, ctx)?;
            }
            None => {
                let session = self.create_locked(sid, channel, ctx)?;
                sessions.insert(sid.to_string(), session);
            }
        }
        Ok(())
    }

    /// Starts a session; the caller holds the table lock and does the
    /// insertion.
    fn create_locked(
        self: &Arc<Self>,
        sid: &str,
        channel: Arc<dyn Channel>,
        ctx: Arc<dyn ConnContext>,
    ) -> Result<Arc<ShellSession>, SessionError> {
        let session = ShellSession::new(
            sid,
            Arc::downgrade(self),
            &self.shell,
            &self.term,
            Arc::clone(&self.allocator),
            Arc::clone(&self.audit),
        );
        session.start(channel, ctx)?;
        info!(session_id = %sid, "created session");
        Ok(session)
    }

    /// Processes one party's departure. The last departure removes the
    /// session from the table and releases its terminal; a close failure is
    /// surfaced, but only after the removal, so it cannot leave a dead
    /// session behind.
    pub fn leave_shell(&self, sid: &str, party_id: &str) -> Result<(), SessionError> {
        let mut sessions = self.sessions.lock().unwrap();
        let session = sessions
            .get(sid)
            .cloned()
            .ok_or_else(|| SessionError::SessionNotFound(sid.to_string()))?;

        session.leave(party_id)?;
        if session.party_count() == 0 {
            sessions.remove(sid);
            info!(session_id = %sid, "last party left, removing session");
            session.close()?;
        }
        Ok(())
    }

    /// Delivers `result` to every party of `sid` attached right now.
    pub fn broadcast_result(&self, sid: &str, result: ExecResult) -> Result<(), SessionError> {
        let sessions = self.sessions.lock().unwrap();
        let session = sessions
            .get(sid)
            .ok_or_else(|| SessionError::SessionNotFound(sid.to_string()))?;
        session.broadcast_result(result);
        Ok(())
    }

    /// Whether a session with the given id is registered.
    pub fn exists(&self, sid: &str) -> bool {
        self.sessions.lock().unwrap().contains_key(sid)
    }

    /// The number of registered sessions.
    pub fn count(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }

    /// Snapshot of all registered sessions.
    pub fn list(&self) -> Vec<SessionInfo> {
        self.sessions
            .lock()
            .unwrap()
            .iter()
            .map(|(id, session)| SessionInfo {
                id: id.clone(),
                parties: session.party_count(),
            })
            .collect()
    }
}
