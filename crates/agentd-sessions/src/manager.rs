use std::collections::HashMap;
use std::sync::Arc;

use agentd_domain::config::DaemonConfig;
use agentd_domain::error::{Error, Result};
use agentd_domain::model::{DebugEvent, Item, Session, SessionStatus};
use agentd_domain::ports::{SessionIndexStore, SessionMetaStore};
use agentd_domain::trace::TraceEvent;
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use tokio::sync::{broadcast, mpsc};

use crate::hub::Hub;
use crate::pump::{self, ExitOutcome, SpawnRequest, SpawnedPump, StdinMessage};
use crate::sink::{self, LogSink};

/// Config accepted by `StartSession`/`ResumeSession`.
pub struct StartSessionConfig {
    pub provider: String,
    pub cwd: String,
    pub command: String,
    pub env: Vec<(String, String)>,
}

/// Live, in-process state for one session. The manager is the
/// *exclusive* owner of this record — the Session Service only ever
/// holds the session id and re-looks the runtime up per call.
struct SessionRuntime {
    session_id: String,
    provider: String,
    status: RwLock<SessionStatus>,
    stdin_tx: Mutex<Option<mpsc::Sender<StdinMessage>>>,
    kill_tx: Mutex<Option<mpsc::Sender<()>>>,
    interrupt_tx: Mutex<Option<mpsc::Sender<()>>>,
    sink: Arc<Mutex<LogSink>>,
    session_dir: std::path::PathBuf,
}

/// Orchestrates agent subprocess lifecycle: spawn, input, interrupt,
/// kill, and fan-out of items/debug output to live subscribers.
pub struct SessionManager {
    runtimes: RwLock<HashMap<String, Arc<SessionRuntime>>>,
    item_hub: Arc<Hub<Item>>,
    debug_hub: Arc<Hub<DebugEvent>>,
    index_store: Arc<dyn SessionIndexStore>,
    meta_store: Arc<dyn SessionMetaStore>,
    config: DaemonConfig,
}

impl SessionManager {
    pub fn new(
        config: DaemonConfig,
        index_store: Arc<dyn SessionIndexStore>,
        meta_store: Arc<dyn SessionMetaStore>,
    ) -> Self {
        Self {
            runtimes: RwLock::new(HashMap::new()),
            item_hub: Arc::new(Hub::new(config.subscriber_channel_capacity)),
            debug_hub: Arc::new(Hub::new(config.subscriber_channel_capacity)),
            index_store,
            meta_store,
            config,
        }
    }

    /// Mark every durable session row with no live runtime as
    /// `inactive` (unless already terminal). Must run before the
    /// Session Service accepts traffic.
    pub async fn reconcile_on_startup(&self) -> Result<()> {
        let rows = self.index_store.list().await?;
        let live = self.runtimes.read();
        for mut row in rows {
            if live.contains_key(&row.id) {
                continue;
            }
            if row.status.is_terminal() || row.status == SessionStatus::Inactive {
                continue;
            }
            row.status = SessionStatus::Inactive;
            TraceEvent::SessionReconciledInactive {
                session_id: row.id.clone(),
            }
            .emit();
            self.index_store.upsert(row).await?;
        }
        Ok(())
    }

    pub async fn start_session(&self, cfg: StartSessionConfig) -> Result<Session> {
        if cfg.provider.trim().is_empty() {
            return Err(Error::Invalid("provider must not be empty".into()));
        }
        if cfg.command.trim().is_empty() {
            return Err(Error::Invalid("command must not be empty".into()));
        }

        let session_id = uuid::Uuid::new_v4().to_string();
        let session_dir = pump::session_dir(&self.config.sessions_dir, &session_id);

        let sink = Arc::new(Mutex::new(
            LogSink::create(
                &session_dir,
                &session_id,
                &cfg.provider,
                self.config.log_ring_max_bytes,
                self.config.debug_ring_max_events,
                self.config.debug_ring_max_bytes,
                self.debug_hub.clone(),
            )
            .map_err(|e| Error::Unavailable(format!("failed to create session directory: {e}")))?,
        ));

        let session_id_for_exit = session_id.clone();
        let provider_for_exit = cfg.provider.clone();
        let item_hub_for_exit = self.item_hub.clone();

        let spawned = pump::spawn(
            SpawnRequest {
                command: cfg.command.clone(),
                cwd: cfg.cwd.clone(),
                env: cfg.env.clone(),
            },
            sink.clone(),
            move |outcome| {
                let status = match outcome {
                    ExitOutcome::Exited(0) => SessionStatus::Exited,
                    ExitOutcome::Exited(_) => SessionStatus::Failed,
                    ExitOutcome::Failed => SessionStatus::Failed,
                    ExitOutcome::Killed => SessionStatus::Killed,
                };
                let mut exit_item = serde_json::Map::new();
                exit_item.insert("type".into(), serde_json::Value::String("exit".into()));
                exit_item.insert(
                    "status".into(),
                    serde_json::Value::String(format!("{status:?}").to_lowercase()),
                );
                item_hub_for_exit.publish(&session_id_for_exit, Item(exit_item));
                tracing::info!(session_id = %session_id_for_exit, provider = %provider_for_exit, status = ?status, "session subprocess exited");
            },
        )
        .map_err(|e| Error::Unavailable(format!("failed to spawn subprocess: {e}")))?;

        let runtime = Arc::new(SessionRuntime {
            session_id: session_id.clone(),
            provider: cfg.provider.clone(),
            status: RwLock::new(SessionStatus::Running),
            stdin_tx: Mutex::new(Some(spawned.stdin_tx)),
            kill_tx: Mutex::new(Some(spawned.kill_tx)),
            interrupt_tx: Mutex::new(Some(spawned.interrupt_tx)),
            sink,
            session_dir: session_dir.clone(),
        });

        self.runtimes
            .write()
            .insert(session_id.clone(), runtime);

        let session = Session {
            id: session_id,
            provider: cfg.provider,
            cwd: cfg.cwd,
            command: cfg.command,
            env: cfg.env,
            status: SessionStatus::Running,
            created_at: Utc::now(),
        };
        self.index_store.upsert(session.clone()).await?;
        TraceEvent::SessionStarted {
            session_id: session.id.clone(),
            provider: session.provider.clone(),
        }
        .emit();
        Ok(session)
    }

    pub async fn send_input(&self, id: &str, payload: Vec<u8>) -> Result<()> {
        let runtime = self.lookup(id)?;
        let tx = runtime.stdin_tx.lock().clone();
        let Some(tx) = tx else {
            return Err(Error::session_not_found(id));
        };
        tx.send(StdinMessage::Data(payload))
            .await
            .map_err(|_| Error::session_not_found(id))
    }

    pub async fn resume_session(&self, id: &str, cfg: StartSessionConfig) -> Result<Session> {
        let session_dir = pump::session_dir(&self.config.sessions_dir, id);
        let existing = self.runtimes.read().get(id).cloned();
        let sink = if let Some(existing) = &existing {
            existing.sink.clone()
        } else {
            Arc::new(Mutex::new(
                LogSink::create(
                    &session_dir,
                    id,
                    &cfg.provider,
                    self.config.log_ring_max_bytes,
                    self.config.debug_ring_max_events,
                    self.config.debug_ring_max_bytes,
                    self.debug_hub.clone(),
                )
                .map_err(|e| Error::Unavailable(format!("failed to reopen session directory: {e}")))?,
            ))
        };

        let item_hub_for_exit = self.item_hub.clone();
        let session_id_for_exit = id.to_string();
        let provider_for_exit = cfg.provider.clone();

        let spawned = pump::spawn(
            SpawnRequest {
                command: cfg.command.clone(),
                cwd: cfg.cwd.clone(),
                env: cfg.env.clone(),
            },
            sink.clone(),
            move |outcome| {
                let status = match outcome {
                    ExitOutcome::Exited(0) => SessionStatus::Exited,
                    ExitOutcome::Exited(_) => SessionStatus::Failed,
                    ExitOutcome::Failed => SessionStatus::Failed,
                    ExitOutcome::Killed => SessionStatus::Killed,
                };
                let mut exit_item = serde_json::Map::new();
                exit_item.insert("type".into(), serde_json::Value::String("exit".into()));
                exit_item.insert(
                    "status".into(),
                    serde_json::Value::String(format!("{status:?}").to_lowercase()),
                );
                item_hub_for_exit.publish(&session_id_for_exit, Item(exit_item));
                tracing::info!(session_id = %session_id_for_exit, provider = %provider_for_exit, status = ?status, "resumed session subprocess exited");
            },
        )
        .map_err(|e| Error::Unavailable(format!("failed to respawn subprocess: {e}")))?;

        let runtime = Arc::new(SessionRuntime {
            session_id: id.to_string(),
            provider: cfg.provider.clone(),
            status: RwLock::new(SessionStatus::Running),
            stdin_tx: Mutex::new(Some(spawned.stdin_tx)),
            kill_tx: Mutex::new(Some(spawned.kill_tx)),
            interrupt_tx: Mutex::new(Some(spawned.interrupt_tx)),
            sink,
            session_dir,
        });
        self.runtimes.write().insert(id.to_string(), runtime);

        let session = Session {
            id: id.to_string(),
            provider: cfg.provider,
            cwd: cfg.cwd,
            command: cfg.command,
            env: cfg.env,
            status: SessionStatus::Running,
            created_at: Utc::now(),
        };
        self.index_store.upsert(session.clone()).await?;
        TraceEvent::SessionResumed {
            session_id: session.id.clone(),
            provider: session.provider.clone(),
        }
        .emit();
        Ok(session)
    }

    /// Idempotent: invoking interrupt on an already-interrupted or
    /// exited session is a no-op.
    pub fn interrupt_session(&self, id: &str) -> Result<()> {
        let runtime = self.lookup(id)?;
        if let Some(tx) = runtime.interrupt_tx.lock().clone() {
            let _ = tx.try_send(());
        }
        Ok(())
    }

    pub fn kill_session(&self, id: &str) -> Result<()> {
        let runtime = self.lookup(id)?;
        if let Some(tx) = runtime.kill_tx.lock().take() {
            let _ = tx.try_send(());
        }
        *runtime.status.write() = SessionStatus::Killed;
        Ok(())
    }

    pub fn subscribe_items(&self, id: &str) -> Result<broadcast::Receiver<Item>> {
        self.lookup(id)?;
        Ok(self.item_hub.subscribe(id))
    }

    pub fn subscribe_debug(&self, id: &str) -> Result<broadcast::Receiver<DebugEvent>> {
        self.lookup(id)?;
        Ok(self.debug_hub.subscribe(id))
    }

    pub fn broadcast_items(&self, id: &str, items: Vec<Item>) {
        for item in items {
            self.item_hub.publish(id, item);
        }
    }

    /// Append to the debug sink even when the normal stdio pump didn't
    /// originate the data (synthesized failure logs).
    pub fn write_session_debug(&self, id: &str, stream: agentd_domain::model::StdioStream, data: &str) -> Result<()> {
        let runtime = self.lookup(id)?;
        runtime.sink.lock().debug.write(stream, data);
        Ok(())
    }

    pub fn debug_snapshot(&self, id: &str, lines: usize) -> Result<Vec<DebugEvent>> {
        let runtime = self.lookup(id)?;
        Ok(runtime.sink.lock().debug.tail(lines))
    }

    /// Tail of the raw stdout ring buffer, newline-joined. Used as the
    /// Conversation Adapter Registry's broad history fallback for
    /// providers with no dedicated history adapter.
    pub fn stdout_tail(&self, id: &str, lines: usize) -> Result<String> {
        let runtime = self.lookup(id)?;
        Ok(runtime.sink.lock().stdout_ring.tail(lines))
    }

    /// Read the tail of a session's durable `items.jsonl`.
    pub fn read_items(&self, id: &str, lines: usize) -> Result<Vec<Item>> {
        let runtime = self.lookup(id)?;
        sink::read_item_tail(&runtime.session_dir, lines)
            .map_err(|e| Error::Internal(format!("failed to read items.jsonl: {e}")))
    }

    /// Append one item to the durable items log and fan it out to
    /// live subscribers.
    pub fn append_and_broadcast_item(&self, id: &str, item: Item) -> Result<()> {
        let runtime = self.lookup(id)?;
        if let Ok(line) = serde_json::to_string(&item) {
            let _ = sink::append_item_line(&runtime.session_dir, &line);
        }
        self.item_hub.publish(id, item);
        Ok(())
    }

    fn lookup(&self, id: &str) -> Result<Arc<SessionRuntime>> {
        self.runtimes
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| Error::session_not_found(id))
    }
}
