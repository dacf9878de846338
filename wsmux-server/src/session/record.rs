//! Session record: one PTY plus its replay buffer and attached connections

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use tracing::{debug, warn};

use wsmux_protocol::{ServerMessage, SessionId, SessionSummary};
use wsmux_utils::{Result, WsmuxError};

use super::buffer::ReplayBuffer;
use super::client::{ClientId, ClientSender, Delivery};
use super::idle::IdleTimer;
use crate::observability::Metrics;
use crate::pty::PtyProcess;

/// Where a session is in its life
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Accepting input and attaches
    Running,
    /// Destroy requested, waiting for the process to go away
    Closing,
    /// Exit delivered to all connections
    Exited,
}

/// Mutable session state, guarded by the record's lock
#[derive(Debug)]
struct SessionState {
    cols: u16,
    rows: u16,
    buffer: ReplayBuffer,
    attached: HashMap<ClientId, ClientSender>,
    /// Present only while `attached` is empty and the session is running
    idle_timer: Option<IdleTimer>,
    phase: Phase,
}

impl SessionState {
    /// Arm the idle timer if nobody is attached and none is armed
    fn arm_if_idle(&mut self, arm: impl FnOnce() -> IdleTimer) {
        if self.phase == Phase::Running && self.attached.is_empty() && self.idle_timer.is_none() {
            self.idle_timer = Some(arm());
        }
    }
}

/// A live session
///
/// The record exclusively owns its [`PtyProcess`]. All state changes go
/// through one lock per record, so unrelated sessions never contend.
#[derive(Debug)]
pub struct SessionRecord {
    id: SessionId,
    cwd: PathBuf,
    created_at: SystemTime,
    pty: PtyProcess,
    state: Mutex<SessionState>,
}

impl SessionRecord {
    pub fn new(
        id: SessionId,
        cwd: PathBuf,
        pty: PtyProcess,
        cols: u16,
        rows: u16,
        buffer_limit: usize,
    ) -> Self {
        Self {
            id,
            cwd,
            created_at: SystemTime::now(),
            pty,
            state: Mutex::new(SessionState {
                cols,
                rows,
                buffer: ReplayBuffer::new(buffer_limit),
                attached: HashMap::new(),
                idle_timer: None,
                phase: Phase::Running,
            }),
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn cwd(&self) -> &Path {
        &self.cwd
    }

    pub(crate) fn pty(&self) -> &PtyProcess {
        &self.pty
    }

    #[cfg(test)]
    pub fn phase(&self) -> Phase {
        self.state.lock().phase
    }

    /// Current (cols, rows) as last requested
    #[cfg(test)]
    pub fn dimensions(&self) -> (u16, u16) {
        let state = self.state.lock();
        (state.cols, state.rows)
    }

    pub fn attached_count(&self) -> usize {
        self.state.lock().attached.len()
    }

    #[cfg(test)]
    pub fn has_idle_timer(&self) -> bool {
        self.state.lock().idle_timer.is_some()
    }

    pub fn tail(&self, max_lines: usize, strip: bool) -> String {
        self.state.lock().buffer.tail_lines(max_lines, strip)
    }

    pub fn summary(&self) -> SessionSummary {
        let state = self.state.lock();
        SessionSummary {
            id: self.id.clone(),
            created_at: self
                .created_at
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0),
            cwd: self.cwd.display().to_string(),
            cols: state.cols,
            rows: state.rows,
            attached: state.attached.len(),
        }
    }

    /// Register a connection and replay the buffer to it
    ///
    /// The replay is queued under the lock, so it lands before any output
    /// produced after the attach.
    pub fn attach(&self, sender: ClientSender) -> Result<()> {
        let mut state = self.state.lock();
        if state.phase != Phase::Running {
            return Err(WsmuxError::UnknownSession(self.id.to_string()));
        }

        state.idle_timer = None;

        if !state.buffer.is_empty() {
            let replay = ServerMessage::Output {
                data: state.buffer.contents().to_string(),
            };
            if sender.try_deliver(replay) != Delivery::Queued {
                debug!(session_id = %self.id, client_id = %sender.id(), "Replay not delivered");
            }
        }

        debug!(session_id = %self.id, client_id = %sender.id(), "Connection attached");
        state.attached.insert(sender.id(), sender);
        Ok(())
    }

    /// Remove a connection; arms the idle timer when it was the last one
    ///
    /// Returns whether the connection was attached.
    pub fn detach(&self, client: ClientId, arm: impl FnOnce() -> IdleTimer) -> bool {
        let mut state = self.state.lock();
        let removed = state.attached.remove(&client).is_some();
        if removed {
            debug!(session_id = %self.id, client_id = %client, "Connection detached");
            state.arm_if_idle(arm);
        }
        removed
    }

    /// Arm the idle timer if the session currently has no connections
    pub fn arm_if_idle(&self, arm: impl FnOnce() -> IdleTimer) {
        self.state.lock().arm_if_idle(arm);
    }

    /// Append output to the buffer and fan it out to every connection
    ///
    /// A connection whose queue is full or closed is detached on the spot;
    /// the others are unaffected.
    pub fn push_output(&self, chunk: &str, arm: impl FnOnce() -> IdleTimer) {
        let mut state = self.state.lock();
        if state.phase == Phase::Exited {
            return;
        }

        state.buffer.push(chunk);

        let mut dropped = Vec::new();
        for (client, sender) in &state.attached {
            let delivery = sender.try_deliver(ServerMessage::Output {
                data: chunk.to_string(),
            });
            if delivery != Delivery::Queued {
                dropped.push((*client, delivery));
            }
        }

        if dropped.is_empty() {
            return;
        }

        for (client, delivery) in dropped {
            let err = WsmuxError::ConnectionSend {
                client: client.to_string(),
                reason: format!("{:?}", delivery),
            };
            warn!(session_id = %self.id, client_id = %client, error = %err, "Detaching connection");
            Metrics::global().record_send_failure();
            state.attached.remove(&client);
        }
        state.arm_if_idle(arm);
    }

    /// Record new dimensions and forward them to the PTY
    pub fn resize(&self, cols: u16, rows: u16) {
        let mut state = self.state.lock();
        if state.phase != Phase::Running {
            return;
        }
        state.cols = cols;
        state.rows = rows;
        if let Err(e) = self.pty.resize(cols, rows) {
            warn!(session_id = %self.id, error = %e, "PTY resize failed");
        }
    }

    /// Queue input for the shell
    pub fn write(&self, data: &str) -> Result<()> {
        if self.state.lock().phase != Phase::Running {
            return Err(WsmuxError::WriteAfterExit(self.id.to_string()));
        }
        self.pty
            .write(data.as_bytes().to_vec())
            .map_err(|_| WsmuxError::WriteAfterExit(self.id.to_string()))
    }

    /// Move from running to closing; returns false if already past running
    pub fn begin_close(&self) -> bool {
        let mut state = self.state.lock();
        if state.phase != Phase::Running {
            return false;
        }
        state.phase = Phase::Closing;
        state.idle_timer = None;
        true
    }

    /// Close for idle expiry if `timer_id` is still the armed timer
    ///
    /// An attach that raced the expiry has already replaced or cleared the
    /// timer, in which case this returns false and nothing changes.
    pub fn close_if_idle(&self, timer_id: u64) -> bool {
        let mut state = self.state.lock();
        let current = state.idle_timer.as_ref().map(IdleTimer::id) == Some(timer_id);
        if !current || !state.attached.is_empty() || state.phase != Phase::Running {
            return false;
        }
        state.phase = Phase::Closing;
        state.idle_timer = None;
        true
    }

    /// Mark the process as gone and hand back the attached connections
    ///
    /// Returns `None` if exit was already handled, so exit is delivered at
    /// most once.
    pub fn mark_exited(&self) -> Option<Vec<ClientSender>> {
        let mut state = self.state.lock();
        if state.phase == Phase::Exited {
            return None;
        }
        state.phase = Phase::Exited;
        state.idle_timer = None;
        Some(state.attached.drain().map(|(_, sender)| sender).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pty::PtyConfig;
    use crate::session::client::client_channel;
    use std::time::Duration;

    fn cat_record(buffer_limit: usize) -> SessionRecord {
        let config = PtyConfig::new("cat", "/");
        let (pty, _events) = PtyProcess::spawn(config, "record-test").unwrap();
        SessionRecord::new(
            SessionId::generate(),
            PathBuf::from("/"),
            pty,
            80,
            24,
            buffer_limit,
        )
    }

    fn never() -> IdleTimer {
        IdleTimer::start(Duration::from_secs(3600), |_| async {})
    }

    #[tokio::test]
    async fn test_attach_replays_buffer() {
        let record = cat_record(1024);
        record.push_output("scrollback", never);

        let (sender, mut rx) = client_channel(8);
        record.attach(sender).unwrap();

        assert_eq!(
            rx.try_recv().unwrap(),
            ServerMessage::Output {
                data: "scrollback".into()
            }
        );
        record.pty().kill().unwrap();
    }

    #[tokio::test]
    async fn test_attach_with_empty_buffer_sends_nothing() {
        let record = cat_record(1024);
        let (sender, mut rx) = client_channel(8);
        record.attach(sender).unwrap();
        assert!(rx.try_recv().is_err());
        record.pty().kill().unwrap();
    }

    #[tokio::test]
    async fn test_idle_timer_tracks_attached_set() {
        let record = cat_record(1024);
        record.arm_if_idle(never);
        assert!(record.has_idle_timer());

        let (a, _rx_a) = client_channel(8);
        let (b, _rx_b) = client_channel(8);
        let (a_id, b_id) = (a.id(), b.id());

        record.attach(a).unwrap();
        assert!(!record.has_idle_timer());
        record.attach(b).unwrap();
        assert!(!record.has_idle_timer());

        assert!(record.detach(a_id, never));
        assert!(!record.has_idle_timer());
        assert!(record.detach(b_id, never));
        assert!(record.has_idle_timer());

        // Unknown client: no change
        assert!(!record.detach(a_id, never));
        assert!(record.has_idle_timer());
        record.pty().kill().unwrap();
    }

    #[tokio::test]
    async fn test_push_output_detaches_dead_connection() {
        let record = cat_record(1024);
        let (alive, mut alive_rx) = client_channel(8);
        let (dead, dead_rx) = client_channel(8);
        record.attach(alive).unwrap();
        record.attach(dead).unwrap();
        drop(dead_rx);

        record.push_output("data", never);

        assert_eq!(record.attached_count(), 1);
        assert_eq!(
            alive_rx.try_recv().unwrap(),
            ServerMessage::Output { data: "data".into() }
        );
        assert!(!record.has_idle_timer());
        record.pty().kill().unwrap();
    }

    #[tokio::test]
    async fn test_push_output_detaches_full_connection_and_arms() {
        let record = cat_record(1024);
        let (slow, _slow_rx) = client_channel(1);
        record.attach(slow).unwrap();

        record.push_output("one", never);
        assert_eq!(record.attached_count(), 1);
        record.push_output("two", never);
        assert_eq!(record.attached_count(), 0);
        assert!(record.has_idle_timer());
        record.pty().kill().unwrap();
    }

    #[tokio::test]
    async fn test_mark_exited_once() {
        let record = cat_record(1024);
        let (sender, _rx) = client_channel(8);
        record.attach(sender).unwrap();

        let first = record.mark_exited().unwrap();
        assert_eq!(first.len(), 1);
        assert!(record.mark_exited().is_none());
        assert_eq!(record.attached_count(), 0);

        let (late, _late_rx) = client_channel(8);
        assert!(matches!(
            record.attach(late),
            Err(WsmuxError::UnknownSession(_))
        ));
        record.pty().kill().unwrap();
    }

    #[tokio::test]
    async fn test_write_after_close_is_rejected() {
        let record = cat_record(1024);
        record.write("ok\n").unwrap();
        assert!(record.begin_close());
        assert!(!record.begin_close());
        assert!(matches!(
            record.write("late\n"),
            Err(WsmuxError::WriteAfterExit(_))
        ));
        record.pty().kill().unwrap();
    }

    #[tokio::test]
    async fn test_close_if_idle_checks_timer_identity() {
        let record = cat_record(1024);
        record.arm_if_idle(never);
        let stale_id = u64::MAX;
        assert!(!record.close_if_idle(stale_id));
        assert_eq!(record.phase(), Phase::Running);

        let (sender, _rx) = client_channel(8);
        let client = sender.id();
        record.attach(sender).unwrap();
        record.detach(client, never);

        let current = record.state.lock().idle_timer.as_ref().map(IdleTimer::id).unwrap();
        assert!(record.close_if_idle(current));
        assert_eq!(record.phase(), Phase::Closing);
        record.pty().kill().unwrap();
    }

    #[tokio::test]
    async fn test_resize_updates_summary() {
        let record = cat_record(1024);
        record.resize(120, 40);
        let summary = record.summary();
        assert_eq!((summary.cols, summary.rows), (120, 40));
        assert_eq!(record.pty().size().unwrap(), (120, 40));
        record.pty().kill().unwrap();
    }
}
