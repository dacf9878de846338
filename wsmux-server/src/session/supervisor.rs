//! Per-session lifecycle task
//!
//! Consumes a session's PTY events: output is appended and fanned out,
//! and process exit ends the session.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, warn};

use wsmux_protocol::ServerMessage;

use super::client::Delivery;
use super::record::SessionRecord;
use super::registry::SessionRegistry;
use crate::observability::Metrics;
use crate::pty::{ExitInfo, PtyEvent};

/// Drive one session until its process exits
pub(crate) async fn supervise(
    registry: SessionRegistry,
    record: Arc<SessionRecord>,
    mut events: mpsc::Receiver<PtyEvent>,
) {
    let mut eof = false;
    let mut exit = None;

    while let Some(event) = events.recv().await {
        match event {
            PtyEvent::Output(chunk) => deliver_output(&registry, &record, &chunk),
            PtyEvent::Eof => eof = true,
            PtyEvent::Exit(info) => {
                exit = Some(info);
                break;
            }
        }
    }

    let info = exit.unwrap_or_else(|| {
        warn!(session_id = %record.id(), "Event stream ended without an exit status");
        ExitInfo {
            exit_code: -1,
            signal: None,
        }
    });

    // No new input or attaches from here on
    record.begin_close();

    if !eof {
        // Output can still be in flight behind the exit notice
        let deadline = Instant::now() + registry.config().exit_drain();
        loop {
            match timeout_at(deadline, events.recv()).await {
                Ok(Some(PtyEvent::Output(chunk))) => deliver_output(&registry, &record, &chunk),
                Ok(Some(PtyEvent::Eof)) | Ok(None) => break,
                Ok(Some(PtyEvent::Exit(_))) => {}
                Err(_) => {
                    debug!(session_id = %record.id(), "Exit drain timed out");
                    break;
                }
            }
        }
    }

    finish(&registry, &record, info);
}

fn deliver_output(registry: &SessionRegistry, record: &SessionRecord, chunk: &str) {
    Metrics::global().record_output(chunk.len());
    record.push_output(chunk, || registry.start_idle_timer(record.id()));
}

/// Broadcast exit once and drop the session from the registry
fn finish(registry: &SessionRegistry, record: &Arc<SessionRecord>, info: ExitInfo) {
    let Some(senders) = record.mark_exited() else {
        return;
    };

    for sender in &senders {
        let delivery = sender.try_deliver(ServerMessage::Exit {
            exit_code: info.exit_code,
            signal: info.signal,
        });
        if delivery != Delivery::Queued {
            debug!(session_id = %record.id(), client_id = %sender.id(), ?delivery, "Exit not delivered");
        }
    }

    if registry.remove_record(record) {
        Metrics::global().record_session_exited();
        info!(
            session_id = %record.id(),
            exit_code = info.exit_code,
            signal = ?info.signal,
            "Session exited"
        );
    }

    // Dropping the senders closes each connection's queue after the exit
    drop(senders);
}
