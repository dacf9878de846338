//! Metrics collection for wsmux
//!
//! Provides a simple, internal metrics system for tracking server health,
//! exported in Prometheus text format on `/metrics`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;

/// Point-in-time gauge values collected on each metrics request
#[derive(Debug, Default)]
pub struct GaugeSnapshot {
    /// Number of live sessions in the registry
    pub active_sessions: u64,
    /// Number of connections attached across all sessions
    pub attached_connections: u64,
    /// Bytes held in replay buffers across all sessions
    pub buffer_bytes: u64,
    /// Process resident set size in bytes (Linux only)
    pub process_memory_bytes: Option<u64>,
    /// Number of open file descriptors (Linux only)
    pub process_open_fds: Option<u64>,
}

impl GaugeSnapshot {
    /// Collect gauge values from /proc on Linux
    #[cfg(target_os = "linux")]
    pub fn collect_process_metrics(&mut self) {
        // Second field of statm is RSS in pages
        if let Ok(content) = std::fs::read_to_string("/proc/self/statm") {
            if let Some(pages) = content
                .split_whitespace()
                .nth(1)
                .and_then(|p| p.parse::<u64>().ok())
            {
                self.process_memory_bytes = Some(pages * 4096);
            }
        }

        // PTY masters show up here, so this tracks leaked sessions too
        if let Ok(entries) = std::fs::read_dir("/proc/self/fd") {
            self.process_open_fds = Some(entries.count() as u64);
        }
    }

    #[cfg(not(target_os = "linux"))]
    pub fn collect_process_metrics(&mut self) {}
}

/// Global metrics collector
pub struct Metrics {
    /// Sessions spawned
    pub sessions_created_total: AtomicU64,
    /// Sessions removed by explicit destroy
    pub sessions_destroyed_total: AtomicU64,
    /// Sessions removed because their process exited
    pub sessions_exited_total: AtomicU64,
    /// Sessions destroyed by idle expiry
    pub sessions_idle_expired_total: AtomicU64,
    /// Failed spawn attempts
    pub spawn_failures_total: AtomicU64,

    /// WebSocket connections accepted
    pub connections_opened_total: AtomicU64,
    /// Connections rejected for naming an unknown session
    pub unknown_session_total: AtomicU64,
    /// Fan-out sends that failed and detached a connection
    pub send_failures_total: AtomicU64,
    /// Inbound frames rejected by the codec
    pub rejected_frames_total: AtomicU64,

    /// Bytes written to PTYs
    pub input_bytes_total: AtomicU64,
    /// Bytes read from PTYs
    pub output_bytes_total: AtomicU64,
}

impl Metrics {
    /// Get the global metrics instance
    pub fn global() -> &'static Self {
        static INSTANCE: OnceLock<Metrics> = OnceLock::new();
        INSTANCE.get_or_init(|| Self {
            sessions_created_total: AtomicU64::new(0),
            sessions_destroyed_total: AtomicU64::new(0),
            sessions_exited_total: AtomicU64::new(0),
            sessions_idle_expired_total: AtomicU64::new(0),
            spawn_failures_total: AtomicU64::new(0),
            connections_opened_total: AtomicU64::new(0),
            unknown_session_total: AtomicU64::new(0),
            send_failures_total: AtomicU64::new(0),
            rejected_frames_total: AtomicU64::new(0),
            input_bytes_total: AtomicU64::new(0),
            output_bytes_total: AtomicU64::new(0),
        })
    }

    pub fn record_session_created(&self) {
        self.sessions_created_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_session_destroyed(&self) {
        self.sessions_destroyed_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_session_exited(&self) {
        self.sessions_exited_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_idle_expired(&self) {
        self.sessions_idle_expired_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_spawn_failure(&self) {
        self.spawn_failures_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_connection_opened(&self) {
        self.connections_opened_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_unknown_session(&self) {
        self.unknown_session_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a failed fan-out send (implicit detach)
    pub fn record_send_failure(&self) {
        self.send_failures_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejected_frame(&self) {
        self.rejected_frames_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_input(&self, bytes: usize) {
        self.input_bytes_total.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_output(&self, bytes: usize) {
        self.output_bytes_total.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    /// Export metrics in Prometheus text format
    pub fn to_prometheus(&self, gauges: &GaugeSnapshot) -> String {
        use std::fmt::Write;

        let mut output = String::with_capacity(2048);

        macro_rules! counter {
            ($name:expr, $help:expr, $value:expr) => {
                let _ = writeln!(output, "# HELP {} {}", $name, $help);
                let _ = writeln!(output, "# TYPE {} counter", $name);
                let _ = writeln!(output, "{} {}", $name, $value.load(Ordering::Relaxed));
            };
        }

        macro_rules! gauge {
            ($name:expr, $help:expr, $value:expr) => {
                let _ = writeln!(output, "# HELP {} {}", $name, $help);
                let _ = writeln!(output, "# TYPE {} gauge", $name);
                let _ = writeln!(output, "{} {}", $name, $value);
            };
        }

        // === Counters ===

        counter!(
            "wsmux_sessions_created_total",
            "Total sessions spawned",
            self.sessions_created_total
        );
        counter!(
            "wsmux_sessions_destroyed_total",
            "Total sessions destroyed on request",
            self.sessions_destroyed_total
        );
        counter!(
            "wsmux_sessions_exited_total",
            "Total sessions whose process exited",
            self.sessions_exited_total
        );
        counter!(
            "wsmux_sessions_idle_expired_total",
            "Total sessions destroyed by idle timeout",
            self.sessions_idle_expired_total
        );
        counter!(
            "wsmux_spawn_failures_total",
            "Total failed session spawns",
            self.spawn_failures_total
        );
        counter!(
            "wsmux_connections_opened_total",
            "Total WebSocket connections accepted",
            self.connections_opened_total
        );
        counter!(
            "wsmux_unknown_session_total",
            "Total connections rejected for an unknown session id",
            self.unknown_session_total
        );
        counter!(
            "wsmux_send_failures_total",
            "Total fan-out sends that detached a connection",
            self.send_failures_total
        );
        counter!(
            "wsmux_rejected_frames_total",
            "Total inbound frames rejected by the codec",
            self.rejected_frames_total
        );
        counter!(
            "wsmux_input_bytes_total",
            "Total bytes written to PTYs",
            self.input_bytes_total
        );
        counter!(
            "wsmux_output_bytes_total",
            "Total bytes read from PTYs",
            self.output_bytes_total
        );

        // === Gauges ===

        gauge!(
            "wsmux_active_sessions",
            "Number of live sessions",
            gauges.active_sessions
        );
        gauge!(
            "wsmux_attached_connections",
            "Number of attached connections",
            gauges.attached_connections
        );
        gauge!(
            "wsmux_buffer_bytes",
            "Bytes held in replay buffers",
            gauges.buffer_bytes
        );

        if let Some(memory) = gauges.process_memory_bytes {
            gauge!(
                "wsmux_process_memory_bytes",
                "Process resident set size in bytes",
                memory
            );
        }
        if let Some(fds) = gauges.process_open_fds {
            gauge!(
                "wsmux_process_open_fds",
                "Number of open file descriptors",
                fds
            );
        }

        output
    }
}
