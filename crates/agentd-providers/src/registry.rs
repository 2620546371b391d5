//! Conversation Adapter Registry: a polymorphic dispatcher keyed by
//! normalized provider name, one map per capability plus a fallback
//! entry for each.

use std::collections::HashMap;
use std::sync::Arc;

use agentd_domain::error::{Error, ErrorKind, Result};
use agentd_domain::model::{ApprovalDecision, Item, RuntimeOptions, Session, SessionMeta};
use agentd_sessions::SessionManager;
use async_trait::async_trait;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::traits::{ApprovePort, HistoryPort, InterruptPort, SendPort, SubscribeEventsPort};

fn normalize(provider: &str) -> String {
    provider.trim().to_ascii_lowercase()
}

/// History fallback that tails the raw stdout ring so even a provider
/// with no dedicated history adapter shows something.
struct StdoutTailHistory {
    sessions: Arc<SessionManager>,
}

#[async_trait]
impl HistoryPort for StdoutTailHistory {
    async fn history(&self, session: &Session, _meta: &SessionMeta, lines: usize) -> Result<Vec<Item>> {
        let tail = self.sessions.stdout_tail(&session.id, lines)?;
        let mut map = serde_json::Map::new();
        map.insert("type".into(), serde_json::Value::String("stdoutTail".into()));
        map.insert("content".into(), serde_json::Value::String(tail));
        Ok(vec![Item(map)])
    }
}

#[derive(Default)]
pub struct AdapterRegistry {
    send: HashMap<String, Arc<dyn SendPort>>,
    history: HashMap<String, Arc<dyn HistoryPort>>,
    subscribe: HashMap<String, Arc<dyn SubscribeEventsPort>>,
    approve: HashMap<String, Arc<dyn ApprovePort>>,
    interrupt: HashMap<String, Arc<dyn InterruptPort>>,
    history_fallback: Option<Arc<dyn HistoryPort>>,
}

impl AdapterRegistry {
    pub fn new(sessions: Arc<SessionManager>) -> Self {
        Self {
            history_fallback: Some(Arc::new(StdoutTailHistory { sessions })),
            ..Default::default()
        }
    }

    pub fn register_send(&mut self, provider: &str, port: Arc<dyn SendPort>) {
        self.send.insert(normalize(provider), port);
    }

    pub fn register_history(&mut self, provider: &str, port: Arc<dyn HistoryPort>) {
        self.history.insert(normalize(provider), port);
    }

    pub fn register_subscribe(&mut self, provider: &str, port: Arc<dyn SubscribeEventsPort>) {
        self.subscribe.insert(normalize(provider), port);
    }

    pub fn register_approve(&mut self, provider: &str, port: Arc<dyn ApprovePort>) {
        self.approve.insert(normalize(provider), port);
    }

    pub fn register_interrupt(&mut self, provider: &str, port: Arc<dyn InterruptPort>) {
        self.interrupt.insert(normalize(provider), port);
    }

    fn unsupported(capability: &str, provider: &str) -> Error {
        Error::Invalid(format!("{capability} is not supported for provider '{provider}'"))
    }

    pub async fn send(
        &self,
        session: &Session,
        meta: &SessionMeta,
        options: &RuntimeOptions,
        input: &str,
    ) -> Result<String> {
        match self.send.get(&normalize(&session.provider)) {
            Some(port) => port.send(session, meta, options, input).await,
            None => Err(Self::unsupported("send", &session.provider)),
        }
    }

    pub async fn history(&self, session: &Session, meta: &SessionMeta, lines: usize) -> Result<Vec<Item>> {
        if let Some(port) = self.history.get(&normalize(&session.provider)) {
            return port.history(session, meta, lines).await;
        }
        if let Some(fallback) = &self.history_fallback {
            return fallback.history(session, meta, lines).await;
        }
        Err(Self::unsupported("history", &session.provider))
    }

    pub fn subscribe_events(
        &self,
        session: &Session,
    ) -> Result<(broadcast::Receiver<Item>, CancellationToken)> {
        match self.subscribe.get(&normalize(&session.provider)) {
            Some(port) => port.subscribe_events(session),
            None => Err(Self::unsupported("subscribe_events", &session.provider)),
        }
    }

    pub async fn approve(
        &self,
        session: &Session,
        request_id: &str,
        decision: ApprovalDecision,
        responses: Option<serde_json::Value>,
    ) -> Result<()> {
        match self.approve.get(&normalize(&session.provider)) {
            Some(port) => port.approve(session, request_id, decision, responses).await,
            None => Err(Self::unsupported("approve", &session.provider)),
        }
    }

    pub fn interrupt(&self, session: &Session) -> Result<()> {
        match self.interrupt.get(&normalize(&session.provider)) {
            Some(port) => port.interrupt(session),
            None => Err(Self::unsupported("interrupt", &session.provider)),
        }
    }
}

/// Convenience helper shared by adapter-error mapping code: used by
/// adapter bundles to decide whether a send failure should itself be
/// reported as provider-unsupported vs. an internal fault.
pub fn is_unsupported(e: &Error) -> bool {
    e.kind() == ErrorKind::Invalid
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentd_domain::config::DaemonConfig;
    use agentd_domain::error::Result as DomainResult;
    use agentd_domain::model::SessionStatus;
    use agentd_domain::ports::{SessionIndexStore, SessionMetaStore};
    use std::collections::HashMap as StdHashMap;
    use std::sync::Mutex as StdMutex;

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

    fn session(id: &str, provider: &str) -> Session {
        Session {
            id: id.into(),
            provider: provider.into(),
            cwd: ".".into(),
            command: "cat".into(),
            env: vec![],
            status: SessionStatus::Running,
            created_at: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn send_is_unsupported_for_unregistered_provider() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = DaemonConfig::default();
        cfg.sessions_dir = dir.path().to_path_buf();
        let sessions = Arc::new(SessionManager::new(
            cfg,
            Arc::new(FakeIndexStore { rows: StdMutex::new(StdHashMap::new()) }),
            Arc::new(FakeMetaStore),
        ));
        let registry = AdapterRegistry::new(sessions);
        let session = session("s1", "unknown-provider");
        let meta = SessionMeta::new("s1");
        let err = registry
            .send(&session, &meta, &RuntimeOptions::default(), "hi")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Invalid);
    }

    #[tokio::test]
    async fn history_falls_back_to_stdout_tail_when_unregistered() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = DaemonConfig::default();
        cfg.sessions_dir = dir.path().to_path_buf();
        let sessions = Arc::new(SessionManager::new(
            cfg,
            Arc::new(FakeIndexStore { rows: StdMutex::new(StdHashMap::new()) }),
            Arc::new(FakeMetaStore),
        ));
        let started = sessions
            .start_session(agentd_sessions::StartSessionConfig {
                provider: "mystery".into(),
                cwd: ".".into(),
                command: "echo hi".into(),
                env: vec![],
            })
            .await
            .unwrap();
        let registry = AdapterRegistry::new(sessions);
        let meta = SessionMeta::new(&started.id);
        let items = registry.history(&started, &meta, 10).await.unwrap();
        assert_eq!(items[0].item_type(), Some("stdoutTail"));
    }
}
