//! Claude Turn Scheduler: the Claude transport cannot interleave
//! turns, so this serializes them through a fixed bounded queue with a
//! single consumer worker.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use agentd_domain::error::{Error, Result};
use agentd_domain::model::{new_turn_id, Item, RuntimeOptions, Session, SessionMeta, SessionStatus, StdioStream};
use agentd_providers::stdio_transport::StdioTransport;
use agentd_providers::traits::TurnEnqueuePort;
use agentd_sessions::SessionManager;
use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};

use crate::cancel::CancelMap;
use crate::completion::{CompletionDecisionPolicy, CompletionEvent, CompletionSource, NotificationService, TurnWaitRegistry};

pub struct TurnJob {
    pub turn_id: String,
    pub session: Session,
    pub meta: SessionMeta,
    pub options: RuntimeOptions,
    pub input: String,
}

/// Writes a prepared turn's input to the agent and blocks until the
/// Turn Completion Pipeline has resolved it.
#[async_trait]
pub trait ClaudeTurnExecutor: Send + Sync {
    async fn execute_prepared_turn(&self, job: &TurnJob) -> Result<()>;
}

/// How many lines of an already-started session's `items.jsonl` to
/// snapshot before a send, so the post-send decision can tell a truly
/// new assistant item from one that was already on disk.
const COMPLETION_LOOKBACK_LINES: usize = 500;

/// Default executor: writes to stdio, then waits on the shared
/// [`TurnWaitRegistry`] for the completion pipeline to resolve this
/// turn id. The wait itself is driven here: watch the session's item
/// stream for a fresh assistant/reasoning item or an exit, bounded by
/// `completion_wait` so a quiet subprocess can never wedge the single
/// scheduler worker.
pub struct StdioClaudeExecutor {
    transport: StdioTransport,
    waiters: Arc<TurnWaitRegistry>,
    sessions: Arc<SessionManager>,
    notifications: Arc<NotificationService>,
    completion_wait: Duration,
}

impl StdioClaudeExecutor {
    pub fn new(
        transport: StdioTransport,
        waiters: Arc<TurnWaitRegistry>,
        sessions: Arc<SessionManager>,
        notifications: Arc<NotificationService>,
        completion_wait: Duration,
    ) -> Self {
        Self { transport, waiters, sessions, notifications, completion_wait }
    }

    /// Watch for a fresh assistant/reasoning item, a synthetic session
    /// exit item, or the wait timing out, whichever comes first.
    async fn wait_for_completion(&self, item_rx: Option<broadcast::Receiver<Item>>, items_before: &[Item]) -> CompletionSource {
        let Some(mut rx) = item_rx else {
            return CompletionSource::ClaudeSyncSendCompleted;
        };
        let watch = async {
            loop {
                match rx.recv().await {
                    Ok(item) if item.item_type() == Some("exit") => return CompletionSource::ClaudeSyncSendCompleted,
                    Ok(item) => {
                        let decided = CompletionDecisionPolicy::decide(items_before, std::slice::from_ref(&item), None);
                        if decided == CompletionSource::ClaudeItemsPostSend {
                            return decided;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => return CompletionSource::ClaudeSyncSendCompleted,
                }
            }
        };
        tokio::time::timeout(self.completion_wait, watch)
            .await
            .unwrap_or(CompletionSource::ClaudeSyncSendCompleted)
    }

    fn notify_and_resolve(&self, job: &TurnJob, source: CompletionSource) {
        let trigger = match source {
            CompletionSource::ClaudeItemsPostSend => "claude_items_post_send",
            _ => "claude_sync_send_completed",
        };
        self.notifications.publish(CompletionEvent {
            session_id: job.session.id.clone(),
            turn_id: job.turn_id.clone(),
            provider: job.session.provider.clone(),
            workspace_id: job.meta.workspace_id.clone(),
            worktree_id: job.meta.worktree_id.clone(),
            trigger: trigger.into(),
            status: "completed".into(),
            source: trigger.into(),
            error: None,
            payload: serde_json::Value::Null,
        });
        self.waiters.resolve(&job.turn_id, source);
    }
}

#[async_trait]
impl ClaudeTurnExecutor for StdioClaudeExecutor {
    async fn execute_prepared_turn(&self, job: &TurnJob) -> Result<()> {
        let rx = self.waiters.register(&job.turn_id);
        let items_before = self.sessions.read_items(&job.session.id, COMPLETION_LOOKBACK_LINES).unwrap_or_default();
        let item_rx = self.sessions.subscribe_items(&job.session.id).ok();

        let mut payload = job.input.as_bytes().to_vec();
        payload.push(b'\n');
        if let Err(e) = self.transport.send(&job.session, &job.meta, &payload).await {
            // Nothing to wait for: drop the registration so it doesn't
            // linger in the registry for a turn that never started.
            self.waiters.resolve(&job.turn_id, CompletionSource::Suppressed);
            return Err(e);
        }

        let source = self.wait_for_completion(item_rx, &items_before).await;
        self.notify_and_resolve(job, source);

        rx.await
            .map_err(|_| Error::Internal("completion waiter dropped before resolving".into()))?;
        Ok(())
    }
}

/// On failure: logs, writes a synthetic stderr chunk to the debug
/// sink, appends a `log`-type item carrying the turn id, and notifies
/// the completion pipeline with status `"failed"`.
pub struct ClaudeFailureReporter {
    sessions: Arc<SessionManager>,
    notifications: Arc<NotificationService>,
}

impl ClaudeFailureReporter {
    pub fn new(sessions: Arc<SessionManager>, notifications: Arc<NotificationService>) -> Self {
        Self { sessions, notifications }
    }

    pub fn report(&self, job: &TurnJob, err: &Error) {
        tracing::error!(session_id = %job.session.id, turn_id = %job.turn_id, error = %err, "claude turn failed");

        let _ = self.sessions.write_session_debug(
            &job.session.id,
            StdioStream::Stderr,
            &format!("[turn {}] {err}\n", job.turn_id),
        );

        let mut map = serde_json::Map::new();
        map.insert("type".into(), serde_json::Value::String("log".into()));
        map.insert("turn_id".into(), serde_json::Value::String(job.turn_id.clone()));
        map.insert("message".into(), serde_json::Value::String(err.to_string()));
        let _ = self
            .sessions
            .append_and_broadcast_item(&job.session.id, agentd_domain::model::Item(map));

        self.notifications.publish(CompletionEvent {
            session_id: job.session.id.clone(),
            turn_id: job.turn_id.clone(),
            provider: job.session.provider.clone(),
            workspace_id: job.meta.workspace_id.clone(),
            worktree_id: job.meta.worktree_id.clone(),
            trigger: "claude_turn_failure".into(),
            status: "failed".into(),
            source: "claude_turn_failure".into(),
            error: Some(err.to_string()),
            payload: serde_json::Value::Null,
        });
    }
}

/// Serializes Claude turns through a bounded FIFO queue. Jobs start in
/// enqueue order and no two jobs run concurrently.
pub struct ClaudeTurnScheduler {
    tx: mpsc::Sender<TurnJob>,
    active_turn: Arc<Mutex<HashMap<String, String>>>,
    cancel_map: Arc<CancelMap>,
}

impl ClaudeTurnScheduler {
    pub fn start(
        queue_capacity: usize,
        executor: Arc<dyn ClaudeTurnExecutor>,
        failure_reporter: Arc<ClaudeFailureReporter>,
        cancel_map: Arc<CancelMap>,
    ) -> Arc<Self> {
        let (tx, mut rx) = mpsc::channel::<TurnJob>(queue_capacity);
        let active_turn: Arc<Mutex<HashMap<String, String>>> = Arc::new(Mutex::new(HashMap::new()));
        let active_turn_worker = active_turn.clone();
        let cancel_map_worker = cancel_map.clone();

        tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                let session_id = job.session.id.clone();
                active_turn_worker.lock().insert(session_id.clone(), job.turn_id.clone());
                cancel_map_worker.register(&session_id);

                if let Err(err) = executor.execute_prepared_turn(&job).await {
                    failure_reporter.report(&job, &err);
                }

                let mut guard = active_turn_worker.lock();
                if guard.get(&session_id) == Some(&job.turn_id) {
                    guard.remove(&session_id);
                }
                drop(guard);
                cancel_map_worker.remove(&session_id);
            }
        });

        Arc::new(Self { tx, active_turn, cancel_map })
    }

    pub fn active_turn_id(&self, session_id: &str) -> Option<String> {
        self.active_turn.lock().get(session_id).cloned()
    }

    pub fn interrupt(&self, session_id: &str) -> bool {
        self.cancel_map.cancel(session_id)
    }
}

#[async_trait]
impl TurnEnqueuePort for ClaudeTurnScheduler {
    async fn enqueue(
        &self,
        session: Session,
        meta: SessionMeta,
        options: RuntimeOptions,
        input: String,
    ) -> Result<String> {
        if session.status != SessionStatus::Running {
            return Err(Error::Invalid(format!("session '{}' is not running", session.id)));
        }
        let turn_id = new_turn_id("claude");
        let job = TurnJob { turn_id: turn_id.clone(), session, meta, options, input };
        self.tx
            .try_send(job)
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => Error::Unavailable("claude turn queue is full".into()),
                mpsc::error::TrySendError::Closed(_) => Error::Unavailable("claude turn scheduler is closed".into()),
            })?;
        Ok(turn_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completion::{DefaultRecipientResolver, DedupPolicy};
    use agentd_domain::config::DaemonConfig;
    use agentd_domain::error::Result as DomainResult;
    use agentd_domain::ports::{SessionIndexStore, SessionMetaStore};
    use std::collections::HashMap as StdHashMap;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    struct FakeIndexStore {
        rows: StdMutex<StdHashMap<String, Session>>,
    }
    #[async_trait]
    impl SessionIndexStore for FakeIndexStore {
        async fn list(&self) -> DomainResult<Vec<Session>> {
            Ok(self.rows.lock().unwrap().values().cloned().collect())
        }
        async fn get(&self, id: &str) -> DomainResult<Option<Session>> {
            Ok(self.rows.lock().unwrap().get(id).cloned())
        }
        async fn upsert(&self, session: Session) -> DomainResult<()> {
            self.rows.lock().unwrap().insert(session.id.clone(), session);
            Ok(())
        }
        async fn delete(&self, id: &str) -> DomainResult<()> {
            self.rows.lock().unwrap().remove(id);
            Ok(())
        }
    }
    struct FakeMetaStore;
    #[async_trait]
    impl SessionMetaStore for FakeMetaStore {
        async fn get(&self, _id: &str) -> DomainResult<Option<SessionMeta>> {
            Ok(None)
        }
        async fn upsert(&self, _meta: SessionMeta) -> DomainResult<()> {
            Ok(())
        }
        async fn delete(&self, _id: &str) -> DomainResult<()> {
            Ok(())
        }
    }

    struct ImmediateExecutor;
    #[async_trait]
    impl ClaudeTurnExecutor for ImmediateExecutor {
        async fn execute_prepared_turn(&self, _job: &TurnJob) -> Result<()> {
            Ok(())
        }
    }

    struct AlwaysFailsExecutor;
    #[async_trait]
    impl ClaudeTurnExecutor for AlwaysFailsExecutor {
        async fn execute_prepared_turn(&self, _job: &TurnJob) -> Result<()> {
            Err(Error::Internal("boom".into()))
        }
    }

    fn running_session(id: &str) -> Session {
        Session {
            id: id.into(),
            provider: "claude".into(),
            cwd: ".".into(),
            command: "cat".into(),
            env: vec![],
            status: SessionStatus::Running,
            created_at: chrono::Utc::now(),
        }
    }

    fn notifications() -> Arc<NotificationService> {
        let dedup = Arc::new(DedupPolicy::new(Duration::from_secs(10)));
        let resolver: Arc<dyn crate::completion::RecipientResolver> = Arc::new(DefaultRecipientResolver);
        Arc::new(NotificationService::start(8, 10, dedup, resolver, Arc::new(|_| {})))
    }

    fn sessions(dir: &std::path::Path) -> Arc<SessionManager> {
        let mut cfg = DaemonConfig::default();
        cfg.sessions_dir = dir.to_path_buf();
        Arc::new(SessionManager::new(
            cfg,
            Arc::new(FakeIndexStore { rows: StdMutex::new(StdHashMap::new()) }),
            Arc::new(FakeMetaStore),
        ))
    }

    #[tokio::test]
    async fn enqueue_rejects_non_running_session() {
        let scheduler = ClaudeTurnScheduler::start(
            4,
            Arc::new(ImmediateExecutor),
            Arc::new(ClaudeFailureReporter::new(
                sessions(tempfile::tempdir().unwrap().path()),
                notifications(),
            )),
            Arc::new(CancelMap::new()),
        );
        let mut session = running_session("s1");
        session.status = SessionStatus::Exited;
        let err = scheduler
            .enqueue(session, SessionMeta::new("s1"), RuntimeOptions::default(), "hi".into())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), agentd_domain::error::ErrorKind::Invalid);
    }

    #[tokio::test]
    async fn successful_turn_clears_active_turn_id() {
        let scheduler = ClaudeTurnScheduler::start(
            4,
            Arc::new(ImmediateExecutor),
            Arc::new(ClaudeFailureReporter::new(
                sessions(tempfile::tempdir().unwrap().path()),
                notifications(),
            )),
            Arc::new(CancelMap::new()),
        );
        let turn_id = scheduler
            .enqueue(running_session("s1"), SessionMeta::new("s1"), RuntimeOptions::default(), "hi".into())
            .await
            .unwrap();
        assert!(turn_id.starts_with("claude-turn-"));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(scheduler.active_turn_id("s1").is_none());
    }

    #[tokio::test]
    async fn failed_turn_invokes_failure_reporter_and_still_clears_active_turn() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = sessions(dir.path());
        let started = mgr
            .start_session(agentd_sessions::StartSessionConfig {
                provider: "claude".into(),
                cwd: ".".into(),
                command: "cat".into(),
                env: vec![],
            })
            .await
            .unwrap();
        let scheduler = ClaudeTurnScheduler::start(
            4,
            Arc::new(AlwaysFailsExecutor),
            Arc::new(ClaudeFailureReporter::new(mgr.clone(), notifications())),
            Arc::new(CancelMap::new()),
        );
        scheduler
            .enqueue(started.clone(), SessionMeta::new(&started.id), RuntimeOptions::default(), "hi".into())
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(scheduler.active_turn_id(&started.id).is_none());
        let items = mgr.read_items(&started.id, 10).unwrap();
        assert!(items.iter().any(|i| i.item_type() == Some("log")));
    }

    fn job_for(session: &Session, turn_id: &str) -> TurnJob {
        TurnJob {
            turn_id: turn_id.into(),
            session: session.clone(),
            meta: SessionMeta::new(&session.id),
            options: RuntimeOptions::default(),
            input: "hi".into(),
        }
    }

    #[tokio::test]
    async fn stdio_executor_resolves_on_fresh_assistant_item_and_publishes_notification() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = sessions(dir.path());
        let started = mgr
            .start_session(agentd_sessions::StartSessionConfig {
                provider: "claude".into(),
                cwd: ".".into(),
                command: "cat".into(),
                env: vec![],
            })
            .await
            .unwrap();

        let waiters = Arc::new(TurnWaitRegistry::new());
        let transport = agentd_providers::stdio_transport::StdioTransport::new(mgr.clone());
        let (tx, mut rx) = mpsc::unbounded_channel::<CompletionEvent>();
        let dedup = Arc::new(DedupPolicy::new(Duration::from_secs(10)));
        let resolver: Arc<dyn crate::completion::RecipientResolver> = Arc::new(DefaultRecipientResolver);
        let notifications = Arc::new(NotificationService::start(
            8,
            10,
            dedup,
            resolver,
            Arc::new(move |event| {
                let _ = tx.send(event);
            }),
        ));
        let executor =
            StdioClaudeExecutor::new(transport, waiters, mgr.clone(), notifications, Duration::from_secs(5));

        let job = job_for(&started, "t1");
        let mgr_clone = mgr.clone();
        let session_id = started.id.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            let mut map = serde_json::Map::new();
            map.insert("type".into(), serde_json::Value::String("agentMessage".into()));
            map.insert("provider_message_id".into(), serde_json::Value::String("m1".into()));
            let _ = mgr_clone.append_and_broadcast_item(&session_id, agentd_domain::model::Item(map));
        });

        executor.execute_prepared_turn(&job).await.unwrap();
        let event = tokio::time::timeout(Duration::from_secs(1), rx.recv()).await.unwrap().unwrap();
        assert_eq!(event.trigger, "claude_items_post_send");
        assert_eq!(event.status, "completed");
    }

    #[tokio::test]
    async fn stdio_executor_falls_back_to_sync_completed_without_a_fresh_item() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = sessions(dir.path());
        let started = mgr
            .start_session(agentd_sessions::StartSessionConfig {
                provider: "claude".into(),
                cwd: ".".into(),
                command: "cat".into(),
                env: vec![],
            })
            .await
            .unwrap();

        let waiters = Arc::new(TurnWaitRegistry::new());
        let transport = agentd_providers::stdio_transport::StdioTransport::new(mgr.clone());
        let executor =
            StdioClaudeExecutor::new(transport, waiters, mgr.clone(), notifications(), Duration::from_millis(50));

        let job = job_for(&started, "t2");
        // No item ever lands; this must still return once the bounded
        // wait elapses instead of blocking forever.
        tokio::time::timeout(Duration::from_secs(2), executor.execute_prepared_turn(&job))
            .await
            .expect("executor must not block past its completion wait")
            .unwrap();
    }
}
