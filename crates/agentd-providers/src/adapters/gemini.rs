//! Gemini adapter bundle. Not named with a distinct wire shape in the
//! spec, so it is modeled as a stdio-transport provider analogous to
//! Codex: live subprocess, history from `items.jsonl` rather than a
//! pooled thread file.

use std::sync::Arc;

use agentd_domain::error::Result;
use agentd_domain::model::{new_turn_id, Item, RuntimeOptions, Session, SessionMeta};
use agentd_sessions::SessionManager;
use async_trait::async_trait;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::stdio_transport::StdioTransport;
use crate::traits::{HistoryPort, InterruptPort, SendPort, SubscribeEventsPort};

pub struct GeminiSendAdapter {
    transport: StdioTransport,
}

impl GeminiSendAdapter {
    pub fn new(transport: StdioTransport) -> Self {
        Self { transport }
    }
}

#[async_trait]
impl SendPort for GeminiSendAdapter {
    async fn send(
        &self,
        session: &Session,
        meta: &SessionMeta,
        _options: &RuntimeOptions,
        input: &str,
    ) -> Result<String> {
        let turn_id = new_turn_id("gemini");
        let mut payload = input.as_bytes().to_vec();
        payload.push(b'\n');
        self.transport.send(session, meta, &payload).await?;
        Ok(turn_id)
    }
}

pub struct GeminiHistoryAdapter {
    sessions: Arc<SessionManager>,
}

impl GeminiHistoryAdapter {
    pub fn new(sessions: Arc<SessionManager>) -> Self {
        Self { sessions }
    }
}

#[async_trait]
impl HistoryPort for GeminiHistoryAdapter {
    async fn history(&self, session: &Session, _meta: &SessionMeta, lines: usize) -> Result<Vec<Item>> {
        self.sessions.read_items(&session.id, lines)
    }
}

pub struct GeminiSubscribeAdapter {
    sessions: Arc<SessionManager>,
}

impl GeminiSubscribeAdapter {
    pub fn new(sessions: Arc<SessionManager>) -> Self {
        Self { sessions }
    }
}

impl SubscribeEventsPort for GeminiSubscribeAdapter {
    fn subscribe_events(&self, session: &Session) -> Result<(broadcast::Receiver<Item>, CancellationToken)> {
        let rx = self.sessions.subscribe_items(&session.id)?;
        Ok((rx, CancellationToken::new()))
    }
}

pub struct GeminiInterruptAdapter {
    transport: StdioTransport,
}

impl GeminiInterruptAdapter {
    pub fn new(transport: StdioTransport) -> Self {
        Self { transport }
    }
}

impl InterruptPort for GeminiInterruptAdapter {
    fn interrupt(&self, session: &Session) -> Result<()> {
        self.transport.interrupt(&session.id)
    }
}
