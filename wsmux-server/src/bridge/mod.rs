//! Connection bridge
//!
//! Binds one WebSocket connection to one session: resolves the target from
//! the connection URL, attaches the connection's queue, and turns inbound
//! frames into registry calls. The bridge never holds the PTY itself, only
//! the session id.

mod socket;

use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use wsmux_protocol::{
    close_code, decode_client, ClientMessage, ConnectParams, ConnectTarget, ServerMessage,
    SessionId,
};
use wsmux_utils::WsmuxError;

use crate::observability::Metrics;
use crate::project::ProjectResolver;
use crate::session::{client_channel, ClientId, SessionRegistry};

pub use socket::serve_socket;

/// Why a connection could not be bound to a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    pub message: String,
    pub close_code: u16,
}

impl Rejection {
    fn unknown_session(raw: &str) -> Self {
        Metrics::global().record_unknown_session();
        Self {
            message: WsmuxError::UnknownSession(raw.to_string()).to_string(),
            close_code: close_code::UNKNOWN_SESSION,
        }
    }

    fn spawn_failed(err: WsmuxError) -> Self {
        Self {
            message: err.to_string(),
            close_code: close_code::SPAWN_FAILED,
        }
    }
}

/// One connection's attachment to a session
///
/// Dropping the bridge detaches the connection.
#[derive(Debug)]
pub struct ConnectionBridge {
    registry: SessionRegistry,
    session_id: SessionId,
    client: ClientId,
}

impl ConnectionBridge {
    /// Resolve the connection target and attach to it
    ///
    /// Returns the bridge plus the connection's outbound queue. For a new
    /// session the queue starts with the `sessionID` notice; the buffer
    /// replay (if any) follows.
    pub async fn open(
        registry: &SessionRegistry,
        resolver: &dyn ProjectResolver,
        params: &ConnectParams,
    ) -> Result<(Self, mpsc::Receiver<ServerMessage>), Rejection> {
        let capacity = registry.config().client_queue_capacity;

        let target = params.target();
        let created = matches!(target, ConnectTarget::Create { .. });

        let session_id = match target {
            ConnectTarget::Attach(raw) => match SessionId::parse(&raw) {
                Some(id) => id,
                None => {
                    debug!(session_id = %raw, "Malformed session id");
                    return Err(Rejection::unknown_session(&raw));
                }
            },
            ConnectTarget::Create { project } => {
                let cwd = resolver
                    .resolve(project.as_deref())
                    .map_err(Rejection::spawn_failed)?;
                let config = registry.config();
                let (cols, rows) = params
                    .dimensions()
                    .map(|d| (d.cols, d.rows))
                    .unwrap_or((config.default_cols, config.default_rows));

                let outcome = registry
                    .create(None, cwd, cols, rows)
                    .await
                    .map_err(Rejection::spawn_failed)?;
                outcome.record.id().clone()
            }
        };

        let (sender, rx) = client_channel(capacity);
        let client = sender.id();

        if created {
            sender.try_deliver(ServerMessage::SessionId {
                session_id: session_id.clone(),
            });
        }

        if let Err(e) = registry.attach(&session_id, sender) {
            debug!(session_id = %session_id, error = %e, "Attach failed");
            // A fresh session can only be missing here if its shell already died
            return Err(if created {
                Rejection::spawn_failed(e)
            } else {
                Rejection::unknown_session(session_id.as_str())
            });
        }

        info!(session_id = %session_id, client_id = %client, created, "Connection attached");

        let bridge = Self {
            registry: registry.clone(),
            session_id,
            client,
        };
        Ok((bridge, rx))
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    pub fn client_id(&self) -> ClientId {
        self.client
    }

    /// Handle one text frame; returns an `error` reply if it was rejected
    pub fn handle_text(&self, text: &str) -> Option<ServerMessage> {
        match decode_client(text) {
            Ok(message) => {
                self.handle(message);
                None
            }
            Err(e) => {
                debug!(client_id = %self.client, error = %e, "Rejected frame");
                Metrics::global().record_rejected_frame();
                Some(ServerMessage::error(e.to_string()))
            }
        }
    }

    /// Apply a decoded client message
    pub fn handle(&self, message: ClientMessage) {
        let resize = message.resize_dimensions();
        match message {
            ClientMessage::Input { data } => {
                if let Err(e) = self.registry.write_input(&self.session_id, &data) {
                    if e.is_benign() {
                        trace!(session_id = %self.session_id, "Input after exit dropped");
                    } else {
                        warn!(session_id = %self.session_id, error = %e, "Input failed");
                    }
                }
            }
            ClientMessage::Resize { cols, rows } => match resize {
                Some(dims) => {
                    self.registry.resize(&self.session_id, dims.cols, dims.rows);
                }
                None => {
                    debug!(session_id = %self.session_id, cols, rows, "Ignoring invalid resize");
                }
            },
        }
    }
}

impl Drop for ConnectionBridge {
    fn drop(&mut self) {
        if self.registry.detach(&self.session_id, self.client) {
            info!(session_id = %self.session_id, client_id = %self.client, "Connection detached");
        }
    }
}
