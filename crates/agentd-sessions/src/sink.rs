use std::fs::{File, OpenOptions};
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use agentd_domain::model::{DebugEvent, StdioStream};
use chrono::Utc;
use parking_lot::Mutex;

use crate::hub::Hub;
use crate::output::OutputBuffer;
use crate::ring::DebugRing;

/// Batches contiguous same-stream writes before turning them into a
/// [`DebugEvent`]: flushed on a stream switch, once the pending buffer
/// crosses a size threshold, or explicitly on pump shutdown.
struct PendingDebug {
    stream: StdioStream,
    buf: String,
}

const DEBUG_FLUSH_THRESHOLD_BYTES: usize = 4096;

pub struct DebugSink {
    session_id: String,
    provider: String,
    ring: DebugRing,
    pending: Option<PendingDebug>,
    file: File,
    hub: Arc<Hub<DebugEvent>>,
}

impl DebugSink {
    fn new(
        session_id: String,
        provider: String,
        debug_path: &Path,
        max_events: usize,
        max_bytes: usize,
        hub: Arc<Hub<DebugEvent>>,
    ) -> std::io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(debug_path)?;
        Ok(Self {
            session_id,
            provider,
            ring: DebugRing::new(max_events, max_bytes),
            pending: None,
            file,
            hub,
        })
    }

    pub fn write(&mut self, stream: StdioStream, data: &str) {
        let switched = self.pending.as_ref().map(|p| p.stream) != Some(stream);
        if switched {
            self.flush();
        }
        let pending = self.pending.get_or_insert_with(|| PendingDebug {
            stream,
            buf: String::new(),
        });
        pending.buf.push_str(data);
        if pending.buf.len() >= DEBUG_FLUSH_THRESHOLD_BYTES {
            self.flush();
        }
    }

    pub fn flush(&mut self) {
        let Some(pending) = self.pending.take() else {
            return;
        };
        if pending.buf.is_empty() {
            return;
        }
        let event = DebugEvent {
            seq: 0, // stamped by the ring
            timestamp: Utc::now(),
            stream: pending.stream,
            chunk: pending.buf,
            session_id: self.session_id.clone(),
            provider: self.provider.clone(),
        };
        let stamped = self.ring.push(event);
        if let Ok(json) = serde_json::to_string(&stamped) {
            let _ = writeln!(self.file, "{json}");
        }
        self.hub.publish(&self.session_id, stamped);
    }

    pub fn tail(&self, lines: usize) -> Vec<DebugEvent> {
        self.ring.tail(lines)
    }
}

/// Everything a single session's subprocess pump writes into: files on
/// disk, byte-bounded in-memory rings, and the debug sink. Every write
/// goes through all three synchronously so file offsets and ring
/// ordering never diverge.
pub struct LogSink {
    stdout_file: File,
    stderr_file: File,
    pub stdout_ring: OutputBuffer,
    pub stderr_ring: OutputBuffer,
    pub debug: DebugSink,
}

impl LogSink {
    pub fn create(
        session_dir: &Path,
        session_id: &str,
        provider: &str,
        log_ring_max_bytes: usize,
        debug_ring_max_events: usize,
        debug_ring_max_bytes: usize,
        debug_hub: Arc<Hub<DebugEvent>>,
    ) -> std::io::Result<Self> {
        std::fs::create_dir_all(session_dir)?;
        let stdout_file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(session_dir.join("stdout.log"))?;
        let stderr_file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(session_dir.join("stderr.log"))?;
        let debug = DebugSink::new(
            session_id.to_string(),
            provider.to_string(),
            &session_dir.join("debug.jsonl"),
            debug_ring_max_events,
            debug_ring_max_bytes,
            debug_hub,
        )?;
        Ok(Self {
            stdout_file,
            stderr_file,
            stdout_ring: OutputBuffer::new(log_ring_max_bytes),
            stderr_ring: OutputBuffer::new(log_ring_max_bytes),
            debug,
        })
    }

    pub fn write(&mut self, stream: StdioStream, data: &str) {
        match stream {
            StdioStream::Stdout => {
                let _ = self.stdout_file.write_all(data.as_bytes());
                self.stdout_ring.push(data);
            }
            StdioStream::Stderr => {
                let _ = self.stderr_file.write_all(data.as_bytes());
                self.stderr_ring.push(data);
            }
        }
        self.debug.write(stream, data);
    }
}

pub fn items_log_path(session_dir: &Path) -> PathBuf {
    session_dir.join("items.jsonl")
}

/// Append one item to the session's durable items log. Serialized by
/// the caller's mutex so readers see a prefix-consistent view.
pub fn append_item_line(session_dir: &Path, line: &str) -> std::io::Result<()> {
    let mut f = OpenOptions::new()
        .create(true)
        .append(true)
        .open(items_log_path(session_dir))?;
    writeln!(f, "{line}")
}

/// Read every item in `items.jsonl`, oldest-first. Malformed lines are
/// skipped rather than failing the whole read — a half-written last
/// line must not take the rest of the log down with it.
pub fn read_all_items(session_dir: &Path) -> std::io::Result<Vec<agentd_domain::model::Item>> {
    let path = items_log_path(session_dir);
    if !path.exists() {
        return Ok(Vec::new());
    }
    let text = std::fs::read_to_string(path)?;
    Ok(text
        .lines()
        .filter_map(|line| serde_json::from_str(line).ok())
        .collect())
}

/// Tail of the items log (last `lines` entries, oldest-first within
/// the returned window).
pub fn read_item_tail(
    session_dir: &Path,
    lines: usize,
) -> std::io::Result<Vec<agentd_domain::model::Item>> {
    let all = read_all_items(session_dir)?;
    let start = all.len().saturating_sub(lines);
    Ok(all[start..].to_vec())
}

pub type SharedLogSink = Mutex<LogSink>;

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn write_flushes_debug_on_stream_switch() {
        let dir = tempfile::tempdir().unwrap();
        let hub = Arc::new(Hub::new(8));
        let mut rx = hub.subscribe("s1");
        let mut sink = LogSink::create(dir.path(), "s1", "codex", 1024, 10, 1024, hub).unwrap();
        sink.write(StdioStream::Stdout, "hello\n");
        sink.write(StdioStream::Stderr, "oops\n");
        let first = rx.try_recv().unwrap();
        assert_eq!(first.stream, StdioStream::Stdout);
        assert_eq!(first.chunk, "hello\n");
    }
}
