//! Session registry
//!
//! The single owner of every [`SessionRecord`]. Cloning the registry is
//! cheap and shares the same map, so handlers receive it by value instead
//! of reaching for global state.

use std::path::PathBuf;
use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, info, warn};

use wsmux_protocol::{SessionId, SessionSummary};
use wsmux_utils::{Result, WsmuxError};

use super::buffer::global_buffer_bytes;
use super::client::{ClientId, ClientSender};
use super::idle::IdleTimer;
use super::record::SessionRecord;
use super::supervisor;
use crate::config::SessionsConfig;
use crate::observability::{GaugeSnapshot, Metrics};
use crate::pty::PtyProcess;

/// Poll interval while waiting for processes during shutdown
const SHUTDOWN_POLL: Duration = Duration::from_millis(50);

/// Result of [`SessionRegistry::create`]
#[derive(Debug)]
pub struct CreateOutcome {
    pub record: Arc<SessionRecord>,
    /// False when an existing session with the requested id was returned
    pub created: bool,
}

struct RegistryInner {
    sessions: DashMap<SessionId, Arc<SessionRecord>>,
    /// One slot per id with a create in flight
    pending: DashMap<SessionId, Arc<AsyncMutex<()>>>,
    config: SessionsConfig,
}

/// Exclusive right to spawn a session under one id
///
/// Concurrent creates for the same id queue on the slot's lock. The slot
/// leaves the pending map once its last holder lets go.
struct CreateSlot<'a> {
    pending: &'a DashMap<SessionId, Arc<AsyncMutex<()>>>,
    id: SessionId,
    slot: Arc<AsyncMutex<()>>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl<'a> CreateSlot<'a> {
    async fn acquire(pending: &'a DashMap<SessionId, Arc<AsyncMutex<()>>>, id: &SessionId) -> Self {
        let slot = Arc::clone(pending.entry(id.clone()).or_default().value());
        let guard = Arc::clone(&slot).lock_owned().await;
        Self {
            pending,
            id: id.clone(),
            slot,
            guard: Some(guard),
        }
    }
}

impl Drop for CreateSlot<'_> {
    fn drop(&mut self) {
        self.guard.take();
        // The map and this handle are the only references once nobody waits
        self.pending.remove_if(&self.id, |_, slot| {
            Arc::ptr_eq(slot, &self.slot) && Arc::strong_count(slot) == 2
        });
    }
}

/// Process-wide map of live sessions
#[derive(Clone)]
pub struct SessionRegistry {
    inner: Arc<RegistryInner>,
}

impl SessionRegistry {
    pub fn new(config: SessionsConfig) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                sessions: DashMap::new(),
                pending: DashMap::new(),
                config,
            }),
        }
    }

    pub fn config(&self) -> &SessionsConfig {
        &self.inner.config
    }

    /// Create a session, or return the existing one for `id`
    ///
    /// With `id` absent a fresh identifier is generated and a shell is
    /// always spawned. With `id` given, concurrent callers wait for the
    /// first spawn and share its record. The spawn runs on the blocking pool.
    pub async fn create(
        &self,
        id: Option<SessionId>,
        cwd: PathBuf,
        cols: u16,
        rows: u16,
    ) -> Result<CreateOutcome> {
        let (id, _slot) = match id {
            Some(id) => {
                let slot = CreateSlot::acquire(&self.inner.pending, &id).await;
                if let Some(existing) = self.get(&id) {
                    return Ok(CreateOutcome {
                        record: existing,
                        created: false,
                    });
                }
                (id, Some(slot))
            }
            None => (SessionId::generate(), None),
        };
        let pty_config = self.inner.config.pty_config(&cwd, cols, rows);
        let label = id.to_string();

        let spawned = tokio::task::spawn_blocking(move || PtyProcess::spawn(pty_config, &label))
            .await
            .map_err(|e| WsmuxError::internal(format!("Spawn task failed: {}", e)))
            .and_then(|result| result);

        let (pty, events) = match spawned {
            Ok(spawned) => spawned,
            Err(e) => {
                warn!(session_id = %id, cwd = %cwd.display(), error = %e, "Session spawn failed");
                Metrics::global().record_spawn_failure();
                return Err(e);
            }
        };

        let record = Arc::new(SessionRecord::new(
            id.clone(),
            cwd,
            pty,
            cols,
            rows,
            self.inner.config.buffer_limit,
        ));

        self.inner.sessions.insert(id.clone(), Arc::clone(&record));

        record.arm_if_idle(|| self.start_idle_timer(&id));
        tokio::spawn(supervisor::supervise(
            self.clone(),
            Arc::clone(&record),
            events,
        ));

        Metrics::global().record_session_created();
        info!(
            session_id = %id,
            cwd = %record.cwd().display(),
            pid = ?record.pty().pid(),
            cols,
            rows,
            "Session created"
        );

        Ok(CreateOutcome {
            record,
            created: true,
        })
    }

    pub fn get(&self, id: &SessionId) -> Option<Arc<SessionRecord>> {
        self.inner.sessions.get(id).map(|entry| Arc::clone(entry.value()))
    }

    pub fn len(&self) -> usize {
        self.inner.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.sessions.is_empty()
    }

    /// Snapshot of all live sessions, oldest first
    pub fn list(&self) -> Vec<SessionSummary> {
        let mut summaries: Vec<SessionSummary> =
            self.records().iter().map(|record| record.summary()).collect();
        summaries.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.id.as_str().cmp(b.id.as_str()))
        });
        summaries
    }

    /// Update dimensions; false if the session does not exist
    pub fn resize(&self, id: &SessionId, cols: u16, rows: u16) -> bool {
        match self.get(id) {
            Some(record) => {
                record.resize(cols, rows);
                debug!(session_id = %id, cols, rows, "Session resized");
                true
            }
            None => false,
        }
    }

    /// Kill a session and remove it
    ///
    /// Returns whether a live session was found. Kill failures against a
    /// process that is already gone are ignored.
    pub fn destroy(&self, id: &SessionId) -> bool {
        let Some(record) = self.get(id) else {
            return false;
        };

        record.begin_close();
        self.terminate(&record);
        if self.remove_record(&record) {
            Metrics::global().record_session_destroyed();
            info!(session_id = %id, "Session destroyed");
        }
        true
    }

    /// Last `max_lines` lines of a session's buffer; empty if absent
    pub fn capture_tail(&self, id: &SessionId, max_lines: usize, strip_escapes: bool) -> String {
        self.get(id)
            .map(|record| record.tail(max_lines, strip_escapes))
            .unwrap_or_default()
    }

    /// Forward input to a session's shell
    pub fn write_input(&self, id: &SessionId, data: &str) -> Result<()> {
        let record = self
            .get(id)
            .ok_or_else(|| WsmuxError::WriteAfterExit(id.to_string()))?;
        record.write(data)?;
        Metrics::global().record_input(data.len());
        Ok(())
    }

    /// Attach a connection to an existing session; never creates one
    pub fn attach(&self, id: &SessionId, sender: ClientSender) -> Result<()> {
        let record = self
            .get(id)
            .ok_or_else(|| WsmuxError::UnknownSession(id.to_string()))?;
        record.attach(sender)
    }

    /// Detach a connection; returns whether it was attached
    pub fn detach(&self, id: &SessionId, client: ClientId) -> bool {
        match self.get(id) {
            Some(record) => record.detach(client, || self.start_idle_timer(id)),
            None => false,
        }
    }

    /// PTY dimensions as reported by the OS
    #[cfg(test)]
    pub fn pty_size(&self, id: &SessionId) -> Option<(u16, u16)> {
        self.get(id).and_then(|record| record.pty().size().ok())
    }

    /// Current gauge values for the metrics endpoint
    pub fn gauges(&self) -> GaugeSnapshot {
        let records = self.records();
        GaugeSnapshot {
            active_sessions: records.len() as u64,
            attached_connections: records.iter().map(|r| r.attached_count() as u64).sum(),
            buffer_bytes: global_buffer_bytes() as u64,
            ..Default::default()
        }
    }

    /// Destroy every session and wait for the processes to go away
    ///
    /// Survivors of the grace period are SIGKILLed.
    pub async fn shutdown(&self) {
        let records = self.records();
        if records.is_empty() {
            return;
        }

        info!(count = records.len(), "Destroying all sessions");
        for record in &records {
            self.destroy(record.id());
        }

        let deadline = tokio::time::Instant::now() + self.inner.config.kill_grace();
        while records.iter().any(|r| !r.pty().has_exited())
            && tokio::time::Instant::now() < deadline
        {
            tokio::time::sleep(SHUTDOWN_POLL).await;
        }

        for record in records.iter().filter(|r| !r.pty().has_exited()) {
            warn!(session_id = %record.id(), "Process ignored SIGHUP, sending SIGKILL");
            record.pty().force_kill();
        }
    }

    /// Remove `record` if it is still the entry for its id
    ///
    /// Both exit and destroy paths end here; only the first succeeds.
    pub(crate) fn remove_record(&self, record: &Arc<SessionRecord>) -> bool {
        self.inner
            .sessions
            .remove_if(record.id(), |_, current| Arc::ptr_eq(current, record))
            .is_some()
    }

    /// Arm an idle timer for `id` that destroys the session on expiry
    pub(crate) fn start_idle_timer(&self, id: &SessionId) -> IdleTimer {
        let registry: Weak<RegistryInner> = Arc::downgrade(&self.inner);
        let id = id.clone();
        let timeout = self.inner.config.idle_timeout();

        debug!(session_id = %id, timeout_secs = timeout.as_secs(), "Idle timer armed");
        IdleTimer::start(timeout, move |timer_id| async move {
            if let Some(inner) = registry.upgrade() {
                SessionRegistry { inner }.expire_idle(&id, timer_id);
            }
        })
    }

    /// Idle timer callback
    fn expire_idle(&self, id: &SessionId, timer_id: u64) -> bool {
        let Some(record) = self.get(id) else {
            return false;
        };
        if !record.close_if_idle(timer_id) {
            debug!(session_id = %id, "Stale idle timer ignored");
            return false;
        }

        self.terminate(&record);
        if self.remove_record(&record) {
            Metrics::global().record_idle_expired();
            info!(session_id = %id, "Session idle timeout expired");
        }
        true
    }

    /// SIGHUP now, SIGKILL after the grace period if still alive
    fn terminate(&self, record: &Arc<SessionRecord>) {
        if let Err(e) = record.pty().kill() {
            debug!(session_id = %record.id(), error = %e, "Kill failed");
        }

        let grace = self.inner.config.kill_grace();
        let record = Arc::clone(record);
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            if !record.pty().has_exited() {
                warn!(session_id = %record.id(), "Process ignored SIGHUP, sending SIGKILL");
                record.pty().force_kill();
            }
        });
    }

    fn records(&self) -> Vec<Arc<SessionRecord>> {
        self.inner
            .sessions
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }
}

impl std::fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("sessions", &self.inner.sessions.len())
            .finish()
    }
}
