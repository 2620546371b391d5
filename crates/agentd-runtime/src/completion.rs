//! Turn Completion Pipeline: readiness policies, an evidence freshness
//! tracker, the Claude-specific completion decision policy, a dedup
//! window, and the notification service that fans a single "completed"
//! event out per turn.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use agentd_domain::error::Error;
use agentd_domain::model::Item;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};

/// Signal a readiness policy inspects alongside the triggering event.
#[derive(Debug, Clone, Default)]
pub struct Evidence {
    pub terminal: bool,
    pub error: Option<String>,
    pub fresh_output: bool,
    pub turn_output_fresh: bool,
}

/// Per-provider rule for whether an event may progress a turn towards
/// "completed."
#[derive(Debug, Clone, Copy)]
pub enum ReadinessPolicy {
    /// Codex/Claude/Gemini: only a terminal event counts.
    Terminal,
    /// OpenCode/KiloCode: terminal AND (error, fresh output, or the
    /// vendor's own freshness signal); non-terminal never counts.
    OpenCode,
    /// Registry fallback for unknown providers; still requires terminal.
    AllowAll,
}

impl ReadinessPolicy {
    pub fn allow(self, evidence: &Evidence) -> bool {
        match self {
            ReadinessPolicy::Terminal | ReadinessPolicy::AllowAll => evidence.terminal,
            ReadinessPolicy::OpenCode => {
                evidence.terminal
                    && (evidence.error.is_some() || evidence.fresh_output || evidence.turn_output_fresh)
            }
        }
    }
}

/// A keyed set of `(session_id, evidence_key)` pairs already observed,
/// scoped per session to avoid cross-session collisions.
#[derive(Default)]
pub struct FreshnessTracker {
    seen: Mutex<HashSet<(String, String)>>,
}

impl FreshnessTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true iff `evidence_key` was not seen before for this
    /// session. An empty key falls back to "non-empty output is fresh."
    pub fn mark_fresh(&self, session_id: &str, evidence_key: &str, has_output: bool) -> bool {
        if evidence_key.is_empty() {
            return has_output;
        }
        self.seen
            .lock()
            .insert((session_id.to_string(), evidence_key.to_string()))
    }
}

/// Where a Claude completion notification's "this turn is done" signal
/// came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionSource {
    Suppressed,
    ClaudeItemsPostSend,
    ClaudeSyncSendCompleted,
}

/// Claude-specific: decide how (or whether) to publish completion by
/// comparing the item log before and after a send.
pub struct CompletionDecisionPolicy;

impl CompletionDecisionPolicy {
    /// A new assistant or reasoning item appearing in `items_after` but
    /// not `items_before` is the strong signal; absent that, fall back
    /// to "the send call itself returned with no error."
    pub fn decide(items_before: &[Item], items_after: &[Item], send_err: Option<&Error>) -> CompletionSource {
        if send_err.is_some() {
            return CompletionSource::Suppressed;
        }
        let before_ids: HashSet<&str> = items_before.iter().filter_map(|i| i.provider_message_id()).collect();
        let new_assistant_item = items_after.iter().any(|item| {
            let is_new = item
                .provider_message_id()
                .map(|id| !before_ids.contains(id))
                .unwrap_or(true);
            is_new && matches!(item.item_type(), Some("agentMessage") | Some("reasoning"))
        });
        if new_assistant_item {
            CompletionSource::ClaudeItemsPostSend
        } else {
            CompletionSource::ClaudeSyncSendCompleted
        }
    }
}

/// A sliding dedup window keyed by `(session_id, turn_id, trigger)`.
pub struct DedupPolicy {
    window: Duration,
    seen: Mutex<HashMap<(String, String, String), Instant>>,
}

impl DedupPolicy {
    pub fn new(window: Duration) -> Self {
        Self { window, seen: Mutex::new(HashMap::new()) }
    }

    /// Returns true if `(session_id, turn_id, trigger)` was already
    /// published within the window (a duplicate to suppress).
    pub fn is_duplicate(&self, session_id: &str, turn_id: &str, trigger: &str) -> bool {
        let key = (session_id.to_string(), turn_id.to_string(), trigger.to_string());
        let now = Instant::now();
        let mut seen = self.seen.lock();
        if let Some(last) = seen.get(&key) {
            if now.duration_since(*last) < self.window {
                return true;
            }
        }
        seen.insert(key, now);
        false
    }
}

/// One completion notification ready to be dispatched downstream.
#[derive(Debug, Clone, Default)]
pub struct CompletionEvent {
    pub session_id: String,
    pub turn_id: String,
    pub provider: String,
    pub workspace_id: Option<String>,
    pub worktree_id: Option<String>,
    /// What caused this event to fire (e.g. `"claude_items_post_send"`,
    /// `"claude_turn_failure"`, `"opencode_sse_terminal"`).
    pub trigger: String,
    pub status: String,
    pub source: String,
    pub error: Option<String>,
    pub payload: serde_json::Value,
}

/// Resolves which recipient settings apply to a session; swappable so
/// tests don't need a real workspace-settings backend.
pub trait RecipientResolver: Send + Sync {
    fn script_timeout_ms(&self, session_id: &str) -> u64;
}

pub struct DefaultRecipientResolver;

impl RecipientResolver for DefaultRecipientResolver {
    fn script_timeout_ms(&self, _session_id: &str) -> u64 {
        3_000
    }
}

/// Accepts completion events via `publish`, runs a single worker that
/// consults dedup and hands the event to a dispatcher with a timeout.
pub struct NotificationService {
    tx: mpsc::Sender<CompletionEvent>,
}

impl NotificationService {
    pub fn start(
        queue_capacity: usize,
        min_timeout_ms: u64,
        dedup: Arc<DedupPolicy>,
        resolver: Arc<dyn RecipientResolver>,
        dispatch: Arc<dyn Fn(CompletionEvent) + Send + Sync>,
    ) -> Self {
        let (tx, mut rx) = mpsc::channel::<CompletionEvent>(queue_capacity);
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                if dedup.is_duplicate(&event.session_id, &event.turn_id, &event.trigger) {
                    agentd_domain::trace::TraceEvent::CompletionSuppressedDuplicate {
                        session_id: event.session_id.clone(),
                        turn_id: event.turn_id.clone(),
                        trigger: event.trigger.clone(),
                    }
                    .emit();
                    continue;
                }
                agentd_domain::trace::TraceEvent::CompletionPublished {
                    session_id: event.session_id.clone(),
                    turn_id: event.turn_id.clone(),
                    trigger: event.trigger.clone(),
                    status: event.status.clone(),
                }
                .emit();
                let script_timeout = resolver.script_timeout_ms(&event.session_id);
                let timeout = Duration::from_millis(script_timeout + 2_000).max(Duration::from_millis(min_timeout_ms));
                let dispatch = dispatch.clone();
                let _ = tokio::time::timeout(timeout, async move {
                    dispatch(event);
                })
                .await;
            }
        });
        Self { tx }
    }

    /// Non-blocking; overflow drops the event with a warning log.
    pub fn publish(&self, event: CompletionEvent) {
        if self.tx.try_send(event).is_err() {
            tracing::warn!("notification queue full or closed, dropping completion event");
        }
    }
}

/// A per-turn rendezvous the Claude Turn Scheduler's executor blocks
/// on until the completion pipeline has resolved the turn (published
/// or failure-reported), so at most one in-flight write ever exists.
#[derive(Default)]
pub struct TurnWaitRegistry {
    waiters: Mutex<HashMap<String, oneshot::Sender<CompletionSource>>>,
}

impl TurnWaitRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, turn_id: &str) -> oneshot::Receiver<CompletionSource> {
        let (tx, rx) = oneshot::channel();
        self.waiters.lock().insert(turn_id.to_string(), tx);
        rx
    }

    /// Resolve a pending waiter, if still registered. Idempotent: a
    /// second resolve for the same turn is a silent no-op.
    pub fn resolve(&self, turn_id: &str, source: CompletionSource) {
        if let Some(tx) = self.waiters.lock().remove(turn_id) {
            let _ = tx.send(source);
        }
    }
}
