use agentd_domain::error::Result;
use agentd_domain::model::{Approval, ApprovalDecision, Item, RuntimeOptions, Session, SessionMeta};
use async_trait::async_trait;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

/// `send` must be non-blocking past the enqueue point: it may validate
/// and allocate a turn id synchronously, but background work continues
/// in a spawned task. It never waits for the agent to fully reply.
#[async_trait]
pub trait SendPort: Send + Sync {
    async fn send(
        &self,
        session: &Session,
        meta: &SessionMeta,
        options: &RuntimeOptions,
        input: &str,
    ) -> Result<String>;
}

#[async_trait]
pub trait HistoryPort: Send + Sync {
    async fn history(&self, session: &Session, meta: &SessionMeta, lines: usize) -> Result<Vec<Item>>;
}

pub trait SubscribeEventsPort: Send + Sync {
    /// Returns a receiver plus an idempotent cancel token; the channel
    /// closes when the underlying stream ends.
    fn subscribe_events(
        &self,
        session: &Session,
    ) -> Result<(broadcast::Receiver<Item>, CancellationToken)>;
}

#[async_trait]
pub trait ApprovePort: Send + Sync {
    /// Must delete the approval row on success.
    async fn approve(
        &self,
        session: &Session,
        request_id: &str,
        decision: ApprovalDecision,
        responses: Option<serde_json::Value>,
    ) -> Result<()>;
}

pub trait InterruptPort: Send + Sync {
    fn interrupt(&self, session: &Session) -> Result<()>;
}

/// The seam between the Claude adapter bundle (this crate) and the
/// Claude Turn Scheduler (`agentd-runtime`). Kept as a port here rather
/// than a direct dependency so `agentd-providers` never needs to depend
/// on `agentd-runtime` — the gateway wires the concrete scheduler in at
/// startup, same pattern as the store ports in `agentd-domain::ports`.
#[async_trait]
pub trait TurnEnqueuePort: Send + Sync {
    /// Enqueue a turn and return its `turn_id` immediately. Must not
    /// wait for the turn to finish executing.
    async fn enqueue(
        &self,
        session: Session,
        meta: SessionMeta,
        options: RuntimeOptions,
        input: String,
    ) -> Result<String>;
}

/// The seam between the approve adapters (this crate) and the pending
/// approval table (`agentd-runtime`), same reasoning as
/// `TurnEnqueuePort`. Subscribe adapters insert a row when a provider
/// surfaces a sandboxed-action request on its event stream; approve
/// adapters take the row once the decision has been relayed back.
pub trait ApprovalSink: Send + Sync {
    fn insert(&self, approval: Approval);
    fn take(&self, session_id: &str, request_id: &str) -> Result<Approval>;
}
