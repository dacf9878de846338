//! PTY output and exit delivery
//!
//! Each PTY gets a dedicated reader thread and an exit-watcher thread. Both
//! feed the same per-session event channel, so a session's consumer sees
//! output chunks in the order the PTY produced them followed by the exit
//! notice.

use std::io::{ErrorKind, Read};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use portable_pty::{Child, ExitStatus};
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

/// Read buffer size for PTY reads
const READ_BUFFER_SIZE: usize = 4096;

/// Event emitted by a running PTY
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PtyEvent {
    /// A chunk of decoded output; chunk boundaries carry no meaning
    Output(String),
    /// The output stream reached end of file
    Eof,
    /// The child process terminated
    Exit(ExitInfo),
}

/// How the child process ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitInfo {
    pub exit_code: i32,
    /// POSIX signal number, when the process was terminated by one
    pub signal: Option<i32>,
}

impl ExitInfo {
    pub fn from_status(status: &ExitStatus) -> Self {
        Self {
            exit_code: status.exit_code() as i32,
            signal: status.signal().and_then(signal_number),
        }
    }
}

/// Map a reported signal description to its number
///
/// Descriptions come from `strsignal(3)`; unrecognized ones map to `None`.
pub fn signal_number(description: &str) -> Option<i32> {
    if let Some(raw) = description.strip_prefix("Signal ") {
        return raw.trim().parse().ok();
    }

    let signal = match description {
        "Hangup" => libc::SIGHUP,
        "Interrupt" => libc::SIGINT,
        "Quit" => libc::SIGQUIT,
        "Aborted" | "Abort trap" => libc::SIGABRT,
        "Killed" => libc::SIGKILL,
        "Segmentation fault" => libc::SIGSEGV,
        "Broken pipe" => libc::SIGPIPE,
        "Terminated" => libc::SIGTERM,
        _ => return None,
    };
    Some(signal)
}

/// Incremental UTF-8 decoder
///
/// Multi-byte sequences split across reads are carried over to the next
/// chunk; invalid bytes become U+FFFD.
#[derive(Debug, Default)]
pub struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode as much of `chunk` (plus any carry-over) as possible
    pub fn decode(&mut self, chunk: &[u8]) -> String {
        self.pending.extend_from_slice(chunk);
        let mut out = String::with_capacity(self.pending.len());

        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(text) => {
                    out.push_str(text);
                    self.pending.clear();
                    break;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(&self.pending[..valid]));
                    match e.error_len() {
                        Some(bad) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            self.pending.drain(..valid + bad);
                        }
                        None => {
                            // Incomplete sequence at the end, wait for more bytes
                            self.pending.drain(..valid);
                            break;
                        }
                    }
                }
            }
        }

        out
    }

    /// Flush whatever is left at end of stream
    pub fn finish(&mut self) -> String {
        let tail = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        tail
    }
}

/// Start the reader thread for a PTY
///
/// Sends `Output` chunks then a single `Eof`. Stops early if the receiving
/// side goes away.
pub(crate) fn spawn_reader(
    mut reader: Box<dyn Read + Send>,
    tx: mpsc::Sender<PtyEvent>,
    label: &str,
) -> std::io::Result<JoinHandle<()>> {
    let label = label.to_string();
    thread::Builder::new()
        .name(format!("wsmux-pty-reader-{}", label))
        .spawn(move || {
            let mut buf = [0u8; READ_BUFFER_SIZE];
            let mut decoder = Utf8Decoder::new();
            let mut total_bytes = 0usize;

            loop {
                match reader.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => {
                        total_bytes += n;
                        let text = decoder.decode(&buf[..n]);
                        if text.is_empty() {
                            continue;
                        }
                        trace!(session_id = %label, bytes = n, "PTY output");
                        if tx.blocking_send(PtyEvent::Output(text)).is_err() {
                            debug!(session_id = %label, "Event channel closed, reader exiting");
                            return;
                        }
                    }
                    Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                    Err(e) => {
                        // Linux reports EIO once the child side of the PTY is gone
                        debug!(session_id = %label, error = %e, "PTY read ended");
                        break;
                    }
                }
            }

            let tail = decoder.finish();
            if !tail.is_empty() {
                let _ = tx.blocking_send(PtyEvent::Output(tail));
            }
            let _ = tx.blocking_send(PtyEvent::Eof);

            debug!(session_id = %label, total_bytes, "PTY reader finished");
        })
}

/// Start the exit-watcher thread for a PTY child
///
/// Owns the child handle; sets `exited` before reporting so kill requests
/// racing the exit become no-ops.
pub(crate) fn spawn_waiter(
    mut child: Box<dyn Child + Send + Sync>,
    tx: mpsc::Sender<PtyEvent>,
    exited: Arc<AtomicBool>,
    label: &str,
) -> std::io::Result<JoinHandle<()>> {
    let label = label.to_string();
    thread::Builder::new()
        .name(format!("wsmux-pty-waiter-{}", label))
        .spawn(move || {
            let info = match child.wait() {
                Ok(status) => ExitInfo::from_status(&status),
                Err(e) => {
                    warn!(session_id = %label, error = %e, "Waiting on PTY child failed");
                    ExitInfo {
                        exit_code: -1,
                        signal: None,
                    }
                }
            };

            exited.store(true, Ordering::Release);
            debug!(
                session_id = %label,
                exit_code = info.exit_code,
                signal = ?info.signal,
                "PTY child exited"
            );
            let _ = tx.blocking_send(PtyEvent::Exit(info));
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::time::Duration;
    use tokio::time::timeout;

    #[test]
    fn test_decoder_plain_ascii() {
        let mut decoder = Utf8Decoder::new();
        assert_eq!(decoder.decode(b"hello"), "hello");
        assert_eq!(decoder.finish(), "");
    }

    #[test]
    fn test_decoder_split_multibyte() {
        let bytes = "héllo→".as_bytes();
        let mut decoder = Utf8Decoder::new();

        // Split inside the two-byte 'é'
        let first = decoder.decode(&bytes[..2]);
        assert_eq!(first, "h");
        let second = decoder.decode(&bytes[2..bytes.len() - 1]);
        assert_eq!(second, "éllo");
        let third = decoder.decode(&bytes[bytes.len() - 1..]);
        assert_eq!(third, "→");
    }

    #[test]
    fn test_decoder_invalid_bytes() {
        let mut decoder = Utf8Decoder::new();
        assert_eq!(decoder.decode(b"a\xffb"), "a\u{FFFD}b");
    }

    #[test]
    fn test_decoder_finish_flushes_incomplete() {
        let mut decoder = Utf8Decoder::new();
        assert_eq!(decoder.decode(&[0xe2, 0x86]), "");
        assert_eq!(decoder.finish(), "\u{FFFD}");
        assert_eq!(decoder.finish(), "");
    }

    #[test]
    fn test_signal_number() {
        assert_eq!(signal_number("Hangup"), Some(libc::SIGHUP));
        assert_eq!(signal_number("Killed"), Some(libc::SIGKILL));
        assert_eq!(signal_number("Terminated"), Some(libc::SIGTERM));
        assert_eq!(signal_number("Signal 42"), Some(42));
        assert_eq!(signal_number("Something else"), None);
    }

    #[test]
    fn test_exit_info_from_status() {
        let info = ExitInfo::from_status(&ExitStatus::with_exit_code(3));
        assert_eq!(
            info,
            ExitInfo {
                exit_code: 3,
                signal: None
            }
        );
    }

    #[tokio::test]
    async fn test_reader_sends_output_then_eof() {
        let (tx, mut rx) = mpsc::channel(16);
        let reader: Box<dyn Read + Send> = Box::new(Cursor::new(b"line1\nline2\n".to_vec()));
        spawn_reader(reader, tx, "test").unwrap();

        let mut collected = String::new();
        loop {
            match timeout(Duration::from_secs(2), rx.recv()).await {
                Ok(Some(PtyEvent::Output(text))) => collected.push_str(&text),
                Ok(Some(PtyEvent::Eof)) => break,
                other => panic!("Unexpected event: {:?}", other),
            }
        }
        assert_eq!(collected, "line1\nline2\n");
    }

    #[tokio::test]
    async fn test_reader_empty_stream_sends_eof() {
        let (tx, mut rx) = mpsc::channel(16);
        let reader: Box<dyn Read + Send> = Box::new(Cursor::new(Vec::new()));
        spawn_reader(reader, tx, "empty").unwrap();

        let event = timeout(Duration::from_secs(2), rx.recv()).await.unwrap();
        assert_eq!(event, Some(PtyEvent::Eof));
    }
}
