//! The join subsystem: attach an incoming connection to a session by id.
//!
//! The transport's subsystem dispatch hands the request name here; the
//! expected form is a fixed prefix followed by the target session id, e.g.
//! `join:deadbeef`.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::session::registry::SessionRegistry;
use crate::session::SessionError;
use crate::transport::{Channel, Closer, ConnContext};

/// Request prefix selecting the join subsystem.
pub const JOIN_PREFIX: &str = "join:";

/// Closer that releases a parked join handler.
struct ReleaseOnClose(CancellationToken);

impl Closer for ReleaseOnClose {
    fn close(&self) -> anyhow::Result<()> {
        self.0.cancel();
        Ok(())
    }
}

/// Adapter from a `join:<session-id>` subsystem request to a registry
/// attach.
pub struct JoinSubsystem {
    registry: Arc<SessionRegistry>,
    sid: String,
}

impl JoinSubsystem {
    /// Parses a subsystem request of the form `join:<session-id>`.
    pub fn parse(name: &str, registry: Arc<SessionRegistry>) -> Result<Self, SessionError> {
        match name.strip_prefix(JOIN_PREFIX) {
            Some(sid) if !sid.is_empty() => Ok(Self {
                registry,
                sid: sid.to_string(),
            }),
            _ => Err(SessionError::MalformedRequest(name.to_string())),
        }
    }

    /// The target session id.
    pub fn session_id(&self) -> &str {
        &self.sid
    }

    /// Attaches the connection to the target session, then parks the
    /// calling handler until the connection tears down. This keeps the
    /// dispatch task alive exactly as long as the party is attached.
    pub async fn execute(
        &self,
        channel: Arc<dyn Channel>,
        ctx: Arc<dyn ConnContext>,
    ) -> Result<(), SessionError> {
        self.registry
            .join_shell(&self.sid, channel, Arc::clone(&ctx))?;

        let released = CancellationToken::new();
        ctx.on_close(Arc::new(ReleaseOnClose(released.clone())));
        debug!(session_id = %self.sid, "join handler parked until connection close");
        released.cancelled().await;
        info!(session_id = %self.sid, "join handler released");
        Ok(())
    }
}
