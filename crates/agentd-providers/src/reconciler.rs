//! OpenCode/KiloCode history reconciler: when the HTTP transport's
//! event stream can't be trusted to have delivered the assistant's
//! reply, fetch the remote message list and backfill whatever the
//! local `items.jsonl` is missing.

use std::collections::HashSet;
use std::sync::Arc;

use agentd_domain::error::Result;
use agentd_domain::model::{Item, Session, SessionMeta};
use agentd_sessions::SessionManager;
use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::http_transport::HttpTransport;
use crate::traits::HistoryPort;

/// Result of one reconciliation pass.
pub struct SyncOutcome {
    /// Canonicalized remote item list, for immediate display.
    pub items: Vec<Item>,
    /// Subset of `items` that were newly persisted this pass.
    pub backfilled: Vec<Item>,
}

pub struct OpenCodeReconciler {
    transport: HttpTransport,
    sessions: Arc<SessionManager>,
}

impl OpenCodeReconciler {
    pub fn new(transport: HttpTransport, sessions: Arc<SessionManager>) -> Self {
        Self { transport, sessions }
    }

    /// Fetch the remote message list, dedupe by `provider_message_id`
    /// against the local log, append anything missing, and return the
    /// union. On a remote fetch error, or a remote response with no
    /// messages, fall back to the local tail instead — the backend
    /// being briefly unreachable shouldn't blank out history the local
    /// log already has.
    pub async fn sync(&self, session: &Session, meta: &SessionMeta, lines: usize) -> Result<SyncOutcome> {
        let local = self.sessions.read_items(&session.id, lines).unwrap_or_default();
        let opencode_session_id = meta.provider_session_id.clone().unwrap_or_default();

        let remote = match self
            .transport
            .get_json(
                &format!("/session/{opencode_session_id}/message"),
                Some(session.cwd.as_str()),
            )
            .await
        {
            Ok(remote) => remote,
            Err(e) => {
                tracing::warn!(session_id = %session.id, error = %e, "opencode history fetch failed, returning local items");
                return Ok(SyncOutcome { items: local, backfilled: Vec::new() });
            }
        };

        let items: Vec<Item> = remote
            .as_array()
            .into_iter()
            .flatten()
            .filter_map(normalize_remote_message)
            .collect();
        if items.is_empty() {
            return Ok(SyncOutcome { items: local, backfilled: Vec::new() });
        }

        let known: HashSet<&str> = local.iter().filter_map(|i| i.provider_message_id()).collect();
        let missing: Vec<Item> = items
            .iter()
            .filter(|i| match i.provider_message_id() {
                Some(id) => !known.contains(id),
                None => false,
            })
            .cloned()
            .collect();

        let mut backfilled = Vec::new();
        for item in missing {
            if self
                .sessions
                .append_and_broadcast_item(&session.id, item.clone())
                .is_ok()
            {
                backfilled.push(item);
            } else {
                tracing::warn!(session_id = %session.id, "failed to backfill reconciled item");
            }
        }

        // Re-read the durable tail now that the backfill has landed,
        // so the returned union preserves on-disk ordering.
        let union = self.sessions.read_items(&session.id, lines).unwrap_or(items);
        Ok(SyncOutcome { items: union, backfilled })
    }
}

#[async_trait]
impl HistoryPort for OpenCodeReconciler {
    async fn history(&self, session: &Session, meta: &SessionMeta, lines: usize) -> Result<Vec<Item>> {
        Ok(self.sync(session, meta, lines).await?.items)
    }
}

/// Detect an OpenCode permission-request event on the `/event` SSE
/// stream and pull out the fields an `Approval` row needs. Distinct
/// from `normalize_remote_message`, which only maps chat messages.
pub(crate) fn extract_permission_request(raw: &Value) -> Option<(String, String, Value)> {
    let obj = raw.as_object()?;
    if obj.get("type").and_then(Value::as_str) != Some("permission.updated") {
        return None;
    }
    let props = obj.get("properties")?.as_object()?;
    let request_id = props.get("id").and_then(Value::as_str)?.to_string();
    let method = props.get("method").and_then(Value::as_str).unwrap_or_default().to_string();
    let params = props.get("params").cloned().unwrap_or(Value::Null);
    Some((request_id, method, params))
}

/// Map an OpenCode-shaped remote message (`role`, `parts`, `id`) onto
/// the core item shape. Unrecognized entries are dropped rather than
/// failing the whole sync.
pub(crate) fn normalize_remote_message(raw: &Value) -> Option<Item> {
    let obj = raw.as_object()?;
    let role = obj.get("role").and_then(Value::as_str)?;
    let id = obj.get("id").and_then(Value::as_str)?;
    let content = obj
        .get("parts")
        .and_then(Value::as_array)
        .map(|parts| {
            parts
                .iter()
                .filter_map(|p| p.get("text").and_then(Value::as_str))
                .collect::<Vec<_>>()
                .join("")
        })
        .unwrap_or_default();

    let item_type = match role {
        "user" => "userMessage",
        "assistant" => "agentMessage",
        other => other,
    };

    let mut map = Map::new();
    map.insert("type".into(), Value::String(item_type.into()));
    map.insert("provider_message_id".into(), Value::String(id.into()));
    map.insert("content".into(), Value::String(content));
    Some(Item(map))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn normalize_remote_message_maps_role_to_item_type() {
        let raw = json!({
            "id": "msg-1",
            "role": "assistant",
            "parts": [{"text": "hello "}, {"text": "world"}]
        });
        let item = normalize_remote_message(&raw).unwrap();
        assert_eq!(item.item_type(), Some("agentMessage"));
        assert_eq!(item.provider_message_id(), Some("msg-1"));
        assert_eq!(item.0.get("content").and_then(Value::as_str), Some("hello world"));
    }

    #[test]
    fn normalize_remote_message_rejects_entries_missing_id() {
        let raw = json!({"role": "assistant", "parts": []});
        assert!(normalize_remote_message(&raw).is_none());
    }

    #[test]
    fn extract_permission_request_reads_id_method_and_params() {
        let raw = json!({
            "type": "permission.updated",
            "properties": {"id": "perm-1", "method": "fs.write", "params": {"path": "/tmp/x"}}
        });
        let (request_id, method, params) = extract_permission_request(&raw).unwrap();
        assert_eq!(request_id, "perm-1");
        assert_eq!(method, "fs.write");
        assert_eq!(params, json!({"path": "/tmp/x"}));
    }

    #[test]
    fn extract_permission_request_ignores_other_event_types() {
        let raw = json!({"type": "message.updated", "properties": {"id": "msg-1"}});
        assert!(extract_permission_request(&raw).is_none());
    }

    use std::collections::HashMap as StdHashMap;
    use std::sync::Mutex as StdMutex;

    use agentd_sessions::{SessionManager, StartSessionConfig};

    struct FakeIndexStore {
        rows: StdMutex<StdHashMap<String, Session>>,
    }

    #[async_trait]
    impl agentd_domain::ports::SessionIndexStore for FakeIndexStore {
        async fn list(&self) -> Result<Vec<Session>> {
            Ok(self.rows.lock().unwrap().values().cloned().collect())
        }
        async fn get(&self, session_id: &str) -> Result<Option<Session>> {
            Ok(self.rows.lock().unwrap().get(session_id).cloned())
        }
        async fn upsert(&self, session: Session) -> Result<()> {
            self.rows.lock().unwrap().insert(session.id.clone(), session);
            Ok(())
        }
        async fn delete(&self, session_id: &str) -> Result<()> {
            self.rows.lock().unwrap().remove(session_id);
            Ok(())
        }
    }

    struct FakeMetaStore;

    #[async_trait]
    impl agentd_domain::ports::SessionMetaStore for FakeMetaStore {
        async fn get(&self, _session_id: &str) -> Result<Option<SessionMeta>> {
            Ok(None)
        }
        async fn upsert(&self, _meta: SessionMeta) -> Result<()> {
            Ok(())
        }
        async fn delete(&self, _session_id: &str) -> Result<()> {
            Ok(())
        }
    }

    async fn reconciler_with_session(dir: &std::path::Path, base_url: &str) -> (OpenCodeReconciler, Session, SessionMeta) {
        let mut cfg = agentd_domain::config::DaemonConfig::default();
        cfg.sessions_dir = dir.to_path_buf();
        let sessions = Arc::new(SessionManager::new(
            cfg,
            Arc::new(FakeIndexStore { rows: StdMutex::new(StdHashMap::new()) }),
            Arc::new(FakeMetaStore),
        ));
        let session = sessions
            .start_session(StartSessionConfig {
                provider: "opencode".into(),
                cwd: ".".into(),
                command: "true".into(),
                env: vec![],
            })
            .await
            .unwrap();
        let transport = HttpTransport::new(base_url, None, None, 200).unwrap();
        let reconciler = OpenCodeReconciler::new(transport, sessions);
        let meta = SessionMeta { provider_session_id: Some("remote-1".into()), ..SessionMeta::new(&session.id) };
        (reconciler, session, meta)
    }

    #[tokio::test]
    async fn sync_falls_back_to_local_items_when_remote_is_unreachable() {
        let dir = tempfile::tempdir().unwrap();
        let (reconciler, session, meta) = reconciler_with_session(dir.path(), "http://127.0.0.1:1").await;
        reconciler
            .sessions
            .append_and_broadcast_item(
                &session.id,
                Item(Map::from_iter([
                    ("type".to_string(), Value::String("userMessage".into())),
                    ("provider_message_id".to_string(), Value::String("local-1".into())),
                ])),
            )
            .unwrap();

        let outcome = reconciler.sync(&session, &meta, 10).await.unwrap();
        assert_eq!(outcome.items.len(), 1);
        assert_eq!(outcome.items[0].provider_message_id(), Some("local-1"));
        assert!(outcome.backfilled.is_empty());
    }
}
