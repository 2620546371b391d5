//! Claude adapter bundle. `send` hands off to the Claude Turn
//! Scheduler (`agentd-runtime`) via `TurnEnqueuePort` rather than
//! writing to stdio directly, since Claude cannot interleave turns.
//! `subscribe`/`interrupt` stay local; approval is unsupported.

use std::sync::Arc;

use agentd_domain::error::Result;
use agentd_domain::model::{Item, RuntimeOptions, Session, SessionMeta};
use agentd_sessions::SessionManager;
use async_trait::async_trait;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::stdio_transport::StdioTransport;
use crate::traits::{HistoryPort, InterruptPort, SendPort, SubscribeEventsPort, TurnEnqueuePort};

pub struct ClaudeSendAdapter {
    scheduler: Arc<dyn TurnEnqueuePort>,
}

impl ClaudeSendAdapter {
    pub fn new(scheduler: Arc<dyn TurnEnqueuePort>) -> Self {
        Self { scheduler }
    }
}

#[async_trait]
impl SendPort for ClaudeSendAdapter {
    async fn send(
        &self,
        session: &Session,
        meta: &SessionMeta,
        options: &RuntimeOptions,
        input: &str,
    ) -> Result<String> {
        self.scheduler
            .enqueue(session.clone(), meta.clone(), options.clone(), input.to_string())
            .await
    }
}

pub struct ClaudeHistoryAdapter {
    sessions: Arc<SessionManager>,
}

impl ClaudeHistoryAdapter {
    pub fn new(sessions: Arc<SessionManager>) -> Self {
        Self { sessions }
    }
}

#[async_trait]
impl HistoryPort for ClaudeHistoryAdapter {
    async fn history(&self, session: &Session, _meta: &SessionMeta, lines: usize) -> Result<Vec<Item>> {
        self.sessions.read_items(&session.id, lines)
    }
}

pub struct ClaudeSubscribeAdapter {
    sessions: Arc<SessionManager>,
}

impl ClaudeSubscribeAdapter {
    pub fn new(sessions: Arc<SessionManager>) -> Self {
        Self { sessions }
    }
}

impl SubscribeEventsPort for ClaudeSubscribeAdapter {
    fn subscribe_events(&self, session: &Session) -> Result<(broadcast::Receiver<Item>, CancellationToken)> {
        let rx = self.sessions.subscribe_items(&session.id)?;
        Ok((rx, CancellationToken::new()))
    }
}

pub struct ClaudeInterruptAdapter {
    transport: StdioTransport,
}

impl ClaudeInterruptAdapter {
    pub fn new(transport: StdioTransport) -> Self {
        Self { transport }
    }
}

impl InterruptPort for ClaudeInterruptAdapter {
    fn interrupt(&self, session: &Session) -> Result<()> {
        self.transport.interrupt(&session.id)
    }
}
