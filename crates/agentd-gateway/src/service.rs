//! Session Service: the facade the CLI/HTTP layer calls into. Owns
//! nothing the Session Manager or Adapter Registry already own; its
//! only job is the runtime-options merge-and-persist rule around send,
//! plus thin delegation for the other capabilities.

use std::sync::Arc;

use agentd_domain::error::{Error, Result};
use agentd_domain::model::{ApprovalDecision, Item, RuntimeOptions, SessionMeta};
use agentd_domain::ports::{SessionIndexStore, SessionMetaStore};
use agentd_providers::registry::AdapterRegistry;
use chrono::Utc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

/// Per-call overrides layered onto the session's persisted runtime
/// options before dispatch. `persist_runtime_option = true` asks the
/// merged record to be written back before the send is attempted; a
/// failed write there is fatal to the send. Without it, the merge is
/// used for this call only.
#[derive(Debug, Clone, Default)]
pub struct SendOptions {
    pub overrides: RuntimeOptions,
    pub persist_runtime_option: bool,
}

pub struct SessionService {
    registry: Arc<AdapterRegistry>,
    index_store: Arc<dyn SessionIndexStore>,
    meta_store: Arc<dyn SessionMetaStore>,
}

impl SessionService {
    pub fn new(
        registry: Arc<AdapterRegistry>,
        index_store: Arc<dyn SessionIndexStore>,
        meta_store: Arc<dyn SessionMetaStore>,
    ) -> Self {
        Self { registry, index_store, meta_store }
    }

    pub async fn send_message(&self, session_id: &str, input: &str) -> Result<String> {
        self.send_message_with_options(session_id, input, SendOptions::default()).await
    }

    /// 1. Load the persisted runtime options as baseline. 2. Overlay
    /// `opts.overrides` field-by-field (empty fields don't overwrite).
    /// 3. If `persist_runtime_option` is set, write the merge back
    /// before dispatch; a failure there aborts the send without
    /// touching the adapter. 4. Dispatch on an ephemeral meta clone —
    /// the stored meta is never mutated directly here.
    pub async fn send_message_with_options(
        &self,
        session_id: &str,
        input: &str,
        opts: SendOptions,
    ) -> Result<String> {
        let session = self
            .index_store
            .get(session_id)
            .await?
            .ok_or_else(|| Error::session_not_found(session_id))?;
        let baseline = self.meta_store.get(session_id).await?.unwrap_or_else(|| SessionMeta::new(session_id));
        let merged_options = baseline.runtime_options.merged_with(&opts.overrides);

        if opts.persist_runtime_option {
            let mut persisted = SessionMeta::new(session_id);
            persisted.runtime_options = merged_options.clone();
            self.meta_store.upsert(persisted).await.map_err(Error::runtime_options_persist_failed)?;
        }

        let mut dispatch_meta = baseline.clone();
        dispatch_meta.runtime_options = merged_options.clone();

        let turn_id = self.registry.send(&session, &dispatch_meta, &merged_options, input).await?;

        // Best-effort: a send already succeeded, so a failure recording
        // the turn must not be reported back as a send failure.
        let mut turn_record = SessionMeta::new(session_id);
        turn_record.record_turn(turn_id.clone(), Utc::now());
        if let Err(e) = self.meta_store.upsert(turn_record).await {
            tracing::warn!(session_id, error = %e, "failed to persist last_turn_id after send");
        }

        Ok(turn_id)
    }

    pub async fn history(&self, session_id: &str, lines: usize) -> Result<Vec<Item>> {
        let session = self
            .index_store
            .get(session_id)
            .await?
            .ok_or_else(|| Error::session_not_found(session_id))?;
        let meta = self.meta_store.get(session_id).await?.unwrap_or_else(|| SessionMeta::new(session_id));
        self.registry.history(&session, &meta, lines).await
    }

    pub async fn subscribe_events(
        &self,
        session_id: &str,
    ) -> Result<(broadcast::Receiver<Item>, CancellationToken)> {
        let session = self
            .index_store
            .get(session_id)
            .await?
            .ok_or_else(|| Error::session_not_found(session_id))?;
        self.registry.subscribe_events(&session)
    }

    pub async fn approve(
        &self,
        session_id: &str,
        request_id: &str,
        decision: ApprovalDecision,
        responses: Option<serde_json::Value>,
    ) -> Result<()> {
        let session = self
            .index_store
            .get(session_id)
            .await?
            .ok_or_else(|| Error::session_not_found(session_id))?;
        self.registry.approve(&session, request_id, decision, responses).await
    }

    pub async fn interrupt(&self, session_id: &str) -> Result<()> {
        let session = self
            .index_store
            .get(session_id)
            .await?
            .ok_or_else(|| Error::session_not_found(session_id))?;
        self.registry.interrupt(&session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stores::memory::{InMemorySessionIndexStore, InMemorySessionMetaStore};
    use agentd_domain::model::{Session, SessionStatus};
    use agentd_providers::traits::SendPort;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct FailingMetaStore {
        inner: InMemorySessionMetaStore,
        fail_upsert: AtomicBool,
    }

    impl FailingMetaStore {
        fn new() -> Self {
            Self { inner: InMemorySessionMetaStore::new(), fail_upsert: AtomicBool::new(false) }
        }
    }

    #[async_trait]
    impl SessionMetaStore for FailingMetaStore {
        async fn get(&self, session_id: &str) -> Result<Option<SessionMeta>> {
            self.inner.get(session_id).await
        }
        async fn upsert(&self, meta: SessionMeta) -> Result<()> {
            if self.fail_upsert.load(Ordering::SeqCst) {
                return Err(Error::Unavailable("disk full".into()));
            }
            self.inner.upsert(meta).await
        }
        async fn delete(&self, session_id: &str) -> Result<()> {
            self.inner.delete(session_id).await
        }
    }

    struct RecordingSendAdapter {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl SendPort for RecordingSendAdapter {
        async fn send(
            &self,
            _session: &Session,
            _meta: &SessionMeta,
            _options: &RuntimeOptions,
            _input: &str,
        ) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok("turn-1".into())
        }
    }

    fn session(id: &str) -> Session {
        Session {
            id: id.into(),
            provider: "claude".into(),
            cwd: ".".into(),
            command: "cat".into(),
            env: vec![],
            status: SessionStatus::Running,
            created_at: Utc::now(),
        }
    }

    fn registry_with_send(sessions: Arc<agentd_sessions::SessionManager>, send: Arc<dyn SendPort>) -> AdapterRegistry {
        let mut registry = AdapterRegistry::new(sessions);
        registry.register_send("claude", send);
        registry
    }

    fn new_manager() -> Arc<agentd_sessions::SessionManager> {
        Arc::new(agentd_sessions::SessionManager::new(
            agentd_domain::config::DaemonConfig::default(),
            Arc::new(InMemorySessionIndexStore::new()),
            Arc::new(InMemorySessionMetaStore::new()),
        ))
    }

    #[tokio::test]
    async fn runtime_options_persist_failure_blocks_the_send_and_skips_the_adapter() {
        let index_store: Arc<dyn SessionIndexStore> = Arc::new(InMemorySessionIndexStore::new());
        index_store.upsert(session("s1")).await.unwrap();
        let meta_store = Arc::new(FailingMetaStore::new());
        meta_store.fail_upsert.store(true, Ordering::SeqCst);

        let send = Arc::new(RecordingSendAdapter { calls: AtomicUsize::new(0) });
        let registry = Arc::new(registry_with_send(new_manager(), send.clone()));
        let service = SessionService::new(registry, index_store, meta_store.clone() as Arc<dyn SessionMetaStore>);

        let opts = SendOptions { overrides: RuntimeOptions::default(), persist_runtime_option: true };
        let err = service.send_message_with_options("s1", "hello", opts).await.unwrap_err();

        assert_eq!(err.kind(), agentd_domain::error::ErrorKind::Unavailable);
        assert!(err.to_string().contains("RuntimeOptionsPersistFailed"));
        assert_eq!(send.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn persisted_runtime_options_are_inherited_by_the_next_send_without_overrides() {
        let index_store: Arc<dyn SessionIndexStore> = Arc::new(InMemorySessionIndexStore::new());
        index_store.upsert(session("s1")).await.unwrap();
        let meta_store: Arc<dyn SessionMetaStore> = Arc::new(InMemorySessionMetaStore::new());

        let send = Arc::new(RecordingSendAdapter { calls: AtomicUsize::new(0) });
        let registry = Arc::new(registry_with_send(new_manager(), send.clone()));
        let service = SessionService::new(registry, index_store, meta_store.clone());

        let mut overrides = RuntimeOptions::default();
        overrides.model = Some("opus".into());
        let opts = SendOptions { overrides, persist_runtime_option: true };
        service.send_message_with_options("s1", "hello", opts).await.unwrap();

        let persisted = meta_store.get("s1").await.unwrap().unwrap();
        assert_eq!(persisted.runtime_options.model.as_deref(), Some("opus"));

        service.send_message("s1", "again").await.unwrap();
        let still_persisted = meta_store.get("s1").await.unwrap().unwrap();
        assert_eq!(still_persisted.runtime_options.model.as_deref(), Some("opus"));
        assert_eq!(send.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn send_without_options_does_not_fail_when_turn_bookkeeping_write_fails() {
        let index_store: Arc<dyn SessionIndexStore> = Arc::new(InMemorySessionIndexStore::new());
        index_store.upsert(session("s1")).await.unwrap();
        let meta_store = Arc::new(FailingMetaStore::new());

        let send = Arc::new(RecordingSendAdapter { calls: AtomicUsize::new(0) });
        let registry = Arc::new(registry_with_send(new_manager(), send.clone()));
        let service = SessionService::new(registry, index_store, meta_store.clone() as Arc<dyn SessionMetaStore>);

        // no persist_runtime_option set, but the post-send bookkeeping
        // write still goes through the same (failing) store; it must
        // not turn a successful send into an error.
        meta_store.fail_upsert.store(true, Ordering::SeqCst);
        let turn_id = service.send_message("s1", "hello").await.unwrap();
        assert_eq!(turn_id, "turn-1");
        assert_eq!(send.calls.load(Ordering::SeqCst), 1);
    }
}
