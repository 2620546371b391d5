use std::path::PathBuf;
use std::sync::Arc;

use agentd_domain::model::StdioStream;
use chrono::Utc;
use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::{mpsc, Notify};

use crate::sink::LogSink;

/// Messages accepted on a runtime's stdin channel.
pub enum StdinMessage {
    Data(Vec<u8>),
    Eof,
}

pub struct SpawnRequest {
    pub command: String,
    pub cwd: String,
    pub env: Vec<(String, String)>,
}

pub struct SpawnedPump {
    pub stdin_tx: mpsc::Sender<StdinMessage>,
    pub kill_tx: mpsc::Sender<()>,
    pub interrupt_tx: mpsc::Sender<()>,
    /// Notified once the subprocess exits for any reason.
    pub exited: Arc<Notify>,
}

/// Outcome of the spawned process reported back after exit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitOutcome {
    Exited(i32),
    Failed,
    Killed,
}

/// Spawn `req.command` via `sh -c`, wire its stdio through `sink`, and
/// hand the caller channels to drive it. The returned `exited` notify
/// fires once with the terminal status already recorded on `on_exit`.
pub fn spawn(
    req: SpawnRequest,
    sink: Arc<Mutex<LogSink>>,
    on_exit: impl FnOnce(ExitOutcome) + Send + 'static,
) -> std::io::Result<SpawnedPump> {
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(&req.command);
    cmd.current_dir(&req.cwd);
    for (k, v) in &req.env {
        cmd.env(k, v);
    }
    cmd.stdout(std::process::Stdio::piped());
    cmd.stderr(std::process::Stdio::piped());
    cmd.stdin(std::process::Stdio::piped());

    let mut child = cmd.spawn()?;
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let stdin = child.stdin.take();
    let pid = child.id();

    let (stdin_tx, mut stdin_rx) = mpsc::channel::<StdinMessage>(32);
    let (kill_tx, mut kill_rx) = mpsc::channel::<()>(1);
    let (interrupt_tx, mut interrupt_rx) = mpsc::channel::<()>(1);
    let exited = Arc::new(Notify::new());
    let exited_task = exited.clone();

    tokio::spawn(async move {
        let sink_out = sink.clone();
        let stdout_task = tokio::spawn(async move {
            if let Some(stdout) = stdout {
                let mut reader = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = reader.next_line().await {
                    let mut line = line;
                    line.push('\n');
                    sink_out.lock().write(StdioStream::Stdout, &line);
                }
            }
        });

        let sink_err = sink.clone();
        let stderr_task = tokio::spawn(async move {
            if let Some(stderr) = stderr {
                let mut reader = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = reader.next_line().await {
                    let mut line = line;
                    line.push('\n');
                    sink_err.lock().write(StdioStream::Stderr, &line);
                }
            }
        });

        let stdin_task = tokio::spawn(async move {
            if let Some(mut stdin) = stdin {
                while let Some(msg) = stdin_rx.recv().await {
                    match msg {
                        StdinMessage::Data(data) => {
                            let _ = stdin.write_all(&data).await;
                            let _ = stdin.flush().await;
                        }
                        StdinMessage::Eof => {
                            drop(stdin);
                            return;
                        }
                    }
                }
            }
        });

        let outcome;
        tokio::select! {
            result = child.wait() => {
                let _ = stdout_task.await;
                let _ = stderr_task.await;
                stdin_task.abort();
                outcome = match result {
                    Ok(status) => match status.code() {
                        Some(0) => ExitOutcome::Exited(0),
                        Some(code) => ExitOutcome::Exited(code),
                        None => ExitOutcome::Failed,
                    },
                    Err(_) => ExitOutcome::Failed,
                };
            }
            _ = kill_rx.recv() => {
                let _ = child.kill().await;
                let _ = stdout_task.await;
                let _ = stderr_task.await;
                stdin_task.abort();
                outcome = ExitOutcome::Killed;
            }
            _ = interrupt_loop(&mut interrupt_rx, pid) => {
                // SIGINT delivered; keep waiting for the actual exit.
                let result = child.wait().await;
                let _ = stdout_task.await;
                let _ = stderr_task.await;
                stdin_task.abort();
                outcome = match result {
                    Ok(status) => match status.code() {
                        Some(code) => ExitOutcome::Exited(code),
                        None => ExitOutcome::Failed,
                    },
                    Err(_) => ExitOutcome::Failed,
                };
            }
        }

        sink.lock().debug.flush();
        tracing::debug!(pid = ?pid, outcome = ?outcome, "process pump completed");
        on_exit(outcome);
        exited_task.notify_waiters();
    });

    Ok(SpawnedPump {
        stdin_tx,
        kill_tx,
        interrupt_tx,
        exited,
    })
}

/// Wait for one interrupt request and deliver SIGINT, then return so
/// the caller can fall through to waiting on the real exit. A no-op on
/// non-unix targets or once the channel closes.
async fn interrupt_loop(rx: &mut mpsc::Receiver<()>, pid: Option<u32>) {
    if rx.recv().await.is_none() {
        std::future::pending::<()>().await;
    }
    send_sigint(pid);
}

#[cfg(unix)]
fn send_sigint(pid: Option<u32>) {
    if let Some(pid) = pid {
        let _ = nix::sys::signal::kill(
            nix::unistd::Pid::from_raw(pid as i32),
            nix::sys::signal::Signal::SIGINT,
        );
    }
}

#[cfg(not(unix))]
fn send_sigint(_pid: Option<u32>) {}

pub fn session_dir(base: &std::path::Path, session_id: &str) -> PathBuf {
    base.join(session_id)
}
