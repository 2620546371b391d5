//! Codex adapter bundle: send/subscribe/approve/interrupt delegate to
//! the live stdio transport; history is served from a small pooled
//! client that reads Codex's own thread file under its data directory.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use agentd_domain::error::Result;
use agentd_domain::model::{new_turn_id, Approval, ApprovalDecision, Item, RuntimeOptions, Session, SessionMeta};
use agentd_sessions::SessionManager;
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::stdio_transport::StdioTransport;
use crate::traits::{ApprovalSink, ApprovePort, HistoryPort, InterruptPort, SendPort, SubscribeEventsPort};

/// Codex surfaces a sandboxed-action request as an item of this shape
/// on its own item stream before the subprocess blocks on a reply.
fn approval_request_from_item(session_id: &str, item: &Item) -> Option<Approval> {
    if item.item_type() != Some("approvalRequest") {
        return None;
    }
    let request_id = item.0.get("request_id").and_then(serde_json::Value::as_str)?.to_string();
    let method = item
        .0
        .get("method")
        .and_then(serde_json::Value::as_str)
        .unwrap_or_default()
        .to_string();
    let params = item.0.get("params").cloned().unwrap_or(serde_json::Value::Null);
    Some(Approval {
        session_id: session_id.to_string(),
        request_id,
        method,
        params,
        created_at: Utc::now(),
    })
}

pub struct CodexSendAdapter {
    transport: StdioTransport,
}

impl CodexSendAdapter {
    pub fn new(transport: StdioTransport) -> Self {
        Self { transport }
    }
}

#[async_trait]
impl SendPort for CodexSendAdapter {
    async fn send(
        &self,
        session: &Session,
        meta: &SessionMeta,
        _options: &RuntimeOptions,
        input: &str,
    ) -> Result<String> {
        let turn_id = new_turn_id("codex");
        let mut payload = input.as_bytes().to_vec();
        payload.push(b'\n');
        self.transport.send(session, meta, &payload).await?;
        Ok(turn_id)
    }
}

/// Reads Codex's own thread log from its data directory rather than
/// `items.jsonl`, with a small in-memory cache keyed by thread id
/// standing in for the "pooled history client" Codex itself runs.
pub struct CodexHistoryClient {
    data_dir: PathBuf,
    cache: Mutex<HashMap<String, Vec<Item>>>,
}

impl CodexHistoryClient {
    pub fn new(data_dir: PathBuf) -> Self {
        Self {
            data_dir,
            cache: Mutex::new(HashMap::new()),
        }
    }

    fn thread_path(&self, thread_id: &str) -> PathBuf {
        self.data_dir.join(format!("{thread_id}.jsonl"))
    }

    fn load(&self, thread_id: &str) -> Vec<Item> {
        if let Some(cached) = self.cache.lock().get(thread_id) {
            return cached.clone();
        }
        let items = std::fs::read_to_string(self.thread_path(thread_id))
            .ok()
            .map(|text| {
                text.lines()
                    .filter_map(|line| serde_json::from_str(line).ok())
                    .collect::<Vec<Item>>()
            })
            .unwrap_or_default();
        self.cache.lock().insert(thread_id.to_string(), items.clone());
        items
    }
}

#[async_trait]
impl HistoryPort for CodexHistoryClient {
    async fn history(&self, _session: &Session, meta: &SessionMeta, lines: usize) -> Result<Vec<Item>> {
        let Some(thread_id) = meta.thread_id.as_deref().or(meta.provider_session_id.as_deref()) else {
            return Ok(Vec::new());
        };
        let all = self.load(thread_id);
        let start = all.len().saturating_sub(lines);
        Ok(all[start..].to_vec())
    }
}

pub struct CodexSubscribeAdapter {
    sessions: Arc<SessionManager>,
    approvals: Arc<dyn ApprovalSink>,
}

impl CodexSubscribeAdapter {
    pub fn new(sessions: Arc<SessionManager>, approvals: Arc<dyn ApprovalSink>) -> Self {
        Self { sessions, approvals }
    }
}

impl SubscribeEventsPort for CodexSubscribeAdapter {
    fn subscribe_events(&self, session: &Session) -> Result<(broadcast::Receiver<Item>, CancellationToken)> {
        let rx = self.sessions.subscribe_items(&session.id)?;
        let mut watch_rx = self.sessions.subscribe_items(&session.id)?;
        let approvals = self.approvals.clone();
        let session_id = session.id.clone();
        let token = CancellationToken::new();
        let watch_token = token.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = watch_token.cancelled() => break,
                    item = watch_rx.recv() => {
                        match item {
                            Ok(item) => {
                                if let Some(approval) = approval_request_from_item(&session_id, &item) {
                                    approvals.insert(approval);
                                }
                            }
                            Err(broadcast::error::RecvError::Lagged(_)) => continue,
                            Err(broadcast::error::RecvError::Closed) => break,
                        }
                    }
                }
            }
        });

        Ok((rx, token))
    }
}

pub struct CodexInterruptAdapter {
    transport: StdioTransport,
}

impl CodexInterruptAdapter {
    pub fn new(transport: StdioTransport) -> Self {
        Self { transport }
    }
}

impl InterruptPort for CodexInterruptAdapter {
    fn interrupt(&self, session: &Session) -> Result<()> {
        self.transport.interrupt(&session.id)
    }
}

/// Codex has no remote approval endpoint: the decision is relayed by
/// writing a JSON-RPC-shaped response line to the subprocess's stdin.
pub struct CodexApproveAdapter {
    transport: StdioTransport,
    approvals: Arc<dyn ApprovalSink>,
}

impl CodexApproveAdapter {
    pub fn new(transport: StdioTransport, approvals: Arc<dyn ApprovalSink>) -> Self {
        Self { transport, approvals }
    }
}

#[async_trait]
impl ApprovePort for CodexApproveAdapter {
    async fn approve(
        &self,
        session: &Session,
        request_id: &str,
        decision: ApprovalDecision,
        responses: Option<serde_json::Value>,
    ) -> Result<()> {
        let meta = SessionMeta::new(&session.id);
        let body = serde_json::json!({
            "type": "approvalResponse",
            "request_id": request_id,
            "decision": decision,
            "responses": responses,
        });
        let mut payload = serde_json::to_vec(&body)?;
        payload.push(b'\n');
        self.transport.send(session, &meta, &payload).await?;
        self.approvals.take(&session.id, request_id)?;
        Ok(())
    }
}
