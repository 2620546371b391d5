//! Shared adapter bundle for OpenCode and KiloCode: both speak the
//! same HTTP + SSE wire protocol, so one bundle parameterized by base
//! URL serves either provider brand. History is served by the
//! `OpenCodeReconciler` (see `reconciler.rs`), registered directly as
//! this bundle's `HistoryPort`.

use std::sync::Arc;

use agentd_domain::error::{Error, ErrorKind, Result};
use agentd_domain::model::{new_turn_id, Approval, ApprovalDecision, Item, RuntimeOptions, Session, SessionMeta};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::autostart::{AutostartConfig, AutostartState};
use crate::http_transport::{is_unreachable, HttpTransport};
use crate::reconciler::{extract_permission_request, normalize_remote_message};
use crate::sse::sse_item_stream;
use crate::traits::{ApprovalSink, ApprovePort, SendPort, SubscribeEventsPort};

pub struct OpenCodeSendAdapter {
    transport: Arc<HttpTransport>,
    provider_label: String,
    autostart: Arc<AutostartState>,
    autostart_cfg: AutostartConfig,
    auth_username: Option<String>,
    token: Option<String>,
    request_timeout_ms: u64,
}

impl OpenCodeSendAdapter {
    pub fn new(
        transport: Arc<HttpTransport>,
        provider_label: impl Into<String>,
        autostart: Arc<AutostartState>,
        autostart_cfg: AutostartConfig,
        auth_username: Option<String>,
        token: Option<String>,
        request_timeout_ms: u64,
    ) -> Self {
        Self {
            transport,
            provider_label: provider_label.into(),
            autostart,
            autostart_cfg,
            auth_username,
            token,
            request_timeout_ms,
        }
    }

    /// Relaunch (or clean up and relaunch) the backend and retry the
    /// send once against whatever base URL comes back. Errors from the
    /// retry itself propagate unchanged.
    async fn retry_after_autostart(&self, path: &str, directory: &str, body: &serde_json::Value) -> Result<()> {
        let base_url = self.autostart.ensure_running(&self.provider_label, &self.autostart_cfg).await?;
        let transport = HttpTransport::new(&base_url, self.auth_username.clone(), self.token.clone(), self.request_timeout_ms)?;
        transport.post_json(path, Some(directory), body).await?;
        Ok(())
    }
}

#[async_trait]
impl SendPort for OpenCodeSendAdapter {
    async fn send(
        &self,
        session: &Session,
        meta: &SessionMeta,
        _options: &RuntimeOptions,
        input: &str,
    ) -> Result<String> {
        let Some(remote_id) = meta.provider_session_id.as_deref() else {
            return Err(Error::Invalid("opencode send requires a provider_session_id".into()));
        };
        let body = json!({ "parts": [{ "type": "text", "text": input }] });
        let path = format!("/session/{remote_id}/message");
        match self.transport.post_json(&path, Some(session.cwd.as_str()), &body).await {
            Ok(_) => Ok(new_turn_id(&self.provider_label)),
            Err(e) if is_unreachable(&e) => {
                tracing::warn!(provider = %self.provider_label, "backend unreachable, attempting autostart before failing the send");
                self.retry_after_autostart(&path, &session.cwd, &body).await?;
                Ok(new_turn_id(&self.provider_label))
            }
            Err(e) => Err(e),
        }
    }
}

pub struct OpenCodeSubscribeAdapter {
    transport: Arc<HttpTransport>,
    subscriber_channel_capacity: usize,
    approvals: Arc<dyn ApprovalSink>,
}

impl OpenCodeSubscribeAdapter {
    pub fn new(transport: Arc<HttpTransport>, subscriber_channel_capacity: usize, approvals: Arc<dyn ApprovalSink>) -> Self {
        Self { transport, subscriber_channel_capacity, approvals }
    }
}

impl SubscribeEventsPort for OpenCodeSubscribeAdapter {
    fn subscribe_events(&self, session: &Session) -> Result<(broadcast::Receiver<Item>, CancellationToken)> {
        let (tx, rx) = broadcast::channel(self.subscriber_channel_capacity);
        let token = CancellationToken::new();
        let child_token = token.clone();
        let path = format!("/event?parentID={}", session.id);
        let transport = self.transport.clone();
        let approvals = self.approvals.clone();
        let session_id = session.id.clone();

        tokio::spawn(async move {
            let Ok(response) = transport.raw_get(&path).await else {
                return;
            };
            let mut stream = sse_item_stream(response, move |data| {
                let Ok(value) = serde_json::from_str::<serde_json::Value>(data) else {
                    return Vec::new();
                };
                if let Some((request_id, method, params)) = extract_permission_request(&value) {
                    approvals.insert(Approval {
                        session_id: session_id.clone(),
                        request_id,
                        method,
                        params,
                        created_at: Utc::now(),
                    });
                    return Vec::new();
                }
                normalize_remote_message(&value).into_iter().collect()
            });
            loop {
                tokio::select! {
                    _ = child_token.cancelled() => break,
                    item = futures_util::StreamExt::next(&mut stream) => {
                        match item {
                            Some(item) => { let _ = tx.send(item); }
                            None => break,
                        }
                    }
                }
            }
        });

        Ok((rx, token))
    }
}

pub struct OpenCodeApproveAdapter {
    transport: Arc<HttpTransport>,
    approvals: Arc<dyn ApprovalSink>,
}

impl OpenCodeApproveAdapter {
    pub fn new(transport: Arc<HttpTransport>, approvals: Arc<dyn ApprovalSink>) -> Self {
        Self { transport, approvals }
    }
}

#[async_trait]
impl ApprovePort for OpenCodeApproveAdapter {
    async fn approve(
        &self,
        session: &Session,
        request_id: &str,
        decision: ApprovalDecision,
        responses: Option<serde_json::Value>,
    ) -> Result<()> {
        let body = json!({ "decision": decision, "responses": responses });
        self.transport
            .post_json_or_legacy(
                &format!("/session/{}/permissions/{request_id}", session.id),
                &format!("/permission/{request_id}/reply"),
                Some(session.cwd.as_str()),
                &body,
            )
            .await
            .map_err(classify_approve_error)?;
        self.approvals.take(&session.id, request_id)?;
        Ok(())
    }
}

/// `kind()` is used by the registry's `is_unsupported` helper; keep
/// approve failures classified consistently with the rest of the
/// bundle rather than leaking raw HTTP error kinds.
pub fn classify_approve_error(e: Error) -> Error {
    if e.kind() == ErrorKind::NotFound {
        Error::Invalid(format!("no pending approval for this request: {e}"))
    } else {
        e
    }
}
