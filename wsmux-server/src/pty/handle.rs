//! PTY process wrapper around portable-pty

use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use bytes::Bytes;
use parking_lot::Mutex;
use portable_pty::{native_pty_system, Child, ChildKiller, MasterPty, PtySize};
use tokio::sync::mpsc;
use tracing::{debug, trace};

use wsmux_utils::{Result, WsmuxError};

use super::output::{spawn_reader, spawn_waiter, PtyEvent};
use super::PtyConfig;

/// Capacity of the per-PTY event channel
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// One pseudo-terminal and the child process attached to it
///
/// Output and exit are not read from here; they arrive on the event
/// receiver returned by [`PtyProcess::spawn`].
pub struct PtyProcess {
    /// The master side of the PTY (resize, size queries)
    master: Mutex<Box<dyn MasterPty + Send>>,
    /// Signals the child without holding the child handle itself
    killer: Mutex<Box<dyn ChildKiller + Send + Sync>>,
    /// Input queue drained by the writer thread
    input_tx: mpsc::UnboundedSender<Bytes>,
    /// Set by the exit watcher once the child is reaped
    exited: Arc<AtomicBool>,
    /// Child process ID, if the platform reports one
    pid: Option<u32>,
}

impl PtyProcess {
    /// Open a PTY and spawn the configured command on it
    ///
    /// `label` names the helper threads and tags their log lines.
    pub fn spawn(config: PtyConfig, label: &str) -> Result<(Self, mpsc::Receiver<PtyEvent>)> {
        let pty_system = native_pty_system();

        let pair = pty_system
            .openpty(config.pty_size())
            .map_err(|e| WsmuxError::spawn(format!("Failed to open PTY: {}", e)))?;

        if !config.cwd.is_dir() {
            return Err(WsmuxError::spawn(format!(
                "Working directory does not exist: {}",
                config.cwd.display()
            )));
        }

        let child = pair
            .slave
            .spawn_command(config.command())
            .map_err(|e| WsmuxError::spawn(format!("Failed to spawn {}: {}", config.program, e)))?;
        // Only the child may hold the slave, so the reader sees EOF when it exits
        drop(pair.slave);

        let pid = child.process_id();
        let killer = child.clone_killer();

        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (input_tx, input_rx) = mpsc::unbounded_channel();
        let exited = Arc::new(AtomicBool::new(false));

        // From here on a failure must not leave the child running unowned
        if let Err(e) = start_io(pair.master.as_ref(), event_tx.clone(), input_rx, label) {
            discard_child(child, label);
            return Err(e);
        }
        if let Err(e) = spawn_waiter(child, event_tx, Arc::clone(&exited), label) {
            discard_orphan(pid, label);
            return Err(e.into());
        }

        debug!(session_id = %label, pid = ?pid, program = %config.program, "PTY spawned");

        let process = Self {
            master: Mutex::new(pair.master),
            killer: Mutex::new(killer),
            input_tx,
            exited,
            pid,
        };

        Ok((process, event_rx))
    }

    /// Queue bytes for the child's input
    ///
    /// Never blocks. Fails only once the writer is gone.
    pub fn write(&self, data: impl Into<Bytes>) -> Result<()> {
        self.input_tx
            .send(data.into())
            .map_err(|_| WsmuxError::pty("PTY input closed"))
    }

    /// Resize the PTY
    pub fn resize(&self, cols: u16, rows: u16) -> Result<()> {
        let master = self.master.lock();
        master
            .resize(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| WsmuxError::pty(format!("Resize failed: {}", e)))
    }

    /// Current size as reported by the OS, as (cols, rows)
    #[cfg(test)]
    pub fn size(&self) -> Result<(u16, u16)> {
        let master = self.master.lock();
        master
            .get_size()
            .map(|size| (size.cols, size.rows))
            .map_err(|e| WsmuxError::pty(format!("Size query failed: {}", e)))
    }

    /// Ask the child to terminate (SIGHUP on unix)
    ///
    /// A no-op once the child has exited, and failures against a process
    /// that died in the meantime are not errors.
    pub fn kill(&self) -> Result<()> {
        if self.has_exited() {
            return Ok(());
        }

        let mut killer = self.killer.lock();
        match killer.kill() {
            Ok(()) => Ok(()),
            Err(_) if self.has_exited() => Ok(()),
            Err(e) if e.raw_os_error() == Some(libc::ESRCH) => Ok(()),
            Err(e) => Err(WsmuxError::pty(format!("Kill failed: {}", e))),
        }
    }

    /// SIGKILL the child's whole process group
    pub fn force_kill(&self) {
        if self.has_exited() {
            return;
        }
        let Some(pid) = self.pid.and_then(|p| i32::try_from(p).ok()).filter(|p| *p > 0) else {
            return;
        };

        // SAFETY: kill(2) has no memory-safety preconditions. The child is
        // a session leader (setsid), so -pid addresses its process group.
        let rc = unsafe { libc::kill(-pid, libc::SIGKILL) };
        if rc != 0 {
            debug!(pid, "SIGKILL to process group failed, trying the child alone");
            // SAFETY: as above
            unsafe { libc::kill(pid, libc::SIGKILL) };
        }
    }

    /// Whether the exit watcher has reaped the child
    pub fn has_exited(&self) -> bool {
        self.exited.load(Ordering::Acquire)
    }

    /// Child process ID
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }
}

impl std::fmt::Debug for PtyProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PtyProcess")
            .field("pid", &self.pid)
            .field("exited", &self.has_exited())
            .finish_non_exhaustive()
    }
}

/// Start the reader and writer threads on the master side
fn start_io(
    master: &(dyn MasterPty + Send),
    event_tx: mpsc::Sender<PtyEvent>,
    input_rx: mpsc::UnboundedReceiver<Bytes>,
    label: &str,
) -> Result<()> {
    let reader = master
        .try_clone_reader()
        .map_err(|e| WsmuxError::pty(format!("Failed to clone reader: {}", e)))?;
    let writer = master
        .take_writer()
        .map_err(|e| WsmuxError::pty(format!("Failed to get writer: {}", e)))?;

    spawn_reader(reader, event_tx, label)?;
    spawn_writer(writer, input_rx, label)?;
    Ok(())
}

/// Kill and reap a child that never got an exit watcher
fn discard_child(mut child: Box<dyn Child + Send + Sync>, label: &str) {
    if let Err(e) = child.kill() {
        debug!(session_id = %label, error = %e, "Kill of half-started child failed");
    }
    if let Err(e) = child.wait() {
        debug!(session_id = %label, error = %e, "Reap of half-started child failed");
    }
}

/// Kill and reap a child whose handle was lost with its exit watcher
fn discard_orphan(pid: Option<u32>, label: &str) {
    let Some(pid) = pid.and_then(|p| i32::try_from(p).ok()).filter(|p| *p > 0) else {
        return;
    };
    debug!(session_id = %label, pid, "Killing child without exit watcher");
    // SAFETY: kill(2) and waitpid(2) have no memory-safety preconditions and
    // a null status pointer is allowed. The pid is our own unreaped child.
    unsafe {
        libc::kill(pid, libc::SIGKILL);
        libc::waitpid(pid, std::ptr::null_mut(), 0);
    }
}

/// Start the writer thread that drains the input queue into the PTY
fn spawn_writer(
    mut writer: Box<dyn Write + Send>,
    mut input_rx: mpsc::UnboundedReceiver<Bytes>,
    label: &str,
) -> std::io::Result<thread::JoinHandle<()>> {
    let label = label.to_string();
    thread::Builder::new()
        .name(format!("wsmux-pty-writer-{}", label))
        .spawn(move || {
            while let Some(data) = input_rx.blocking_recv() {
                trace!(session_id = %label, bytes = data.len(), "PTY input");
                if let Err(e) = writer.write_all(&data).and_then(|_| writer.flush()) {
                    debug!(session_id = %label, error = %e, "PTY write failed, writer exiting");
                    break;
                }
            }
        })
}
