use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Session
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Lifecycle status of a session's underlying agent process.
///
/// `Running` is the only state in which turns may be enqueued.
/// Transitions are monotone: once a session reaches a terminal state
/// (`Exited`/`Failed`/`Killed`/`Orphaned`) it never rolls back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Starting,
    Running,
    Inactive,
    Exited,
    Failed,
    Killed,
    Orphaned,
}

impl SessionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionStatus::Exited
                | SessionStatus::Failed
                | SessionStatus::Killed
                | SessionStatus::Orphaned
        )
    }
}

/// Identity and lifecycle record for one agent process. Durable copy
/// lives in the Session Index Store; id and provider never change
/// after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub provider: String,
    pub cwd: String,
    pub command: String,
    #[serde(default)]
    pub env: Vec<(String, String)>,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// SessionMeta / RuntimeOptions
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessLevel {
    ReadOnly,
    OnRequest,
    Full,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasoningLevel {
    Low,
    Medium,
    High,
    ExtraHigh,
}

/// Per-session knobs merged into every adapter call. Fields left unset
/// fall through to the provider's own defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuntimeOptions {
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub access_level: Option<AccessLevel>,
    #[serde(default)]
    pub reasoning_level: Option<ReasoningLevel>,
    /// Provider-specific flags not covered by the common fields above.
    #[serde(default)]
    pub provider_flags: Map<String, Value>,
}

impl RuntimeOptions {
    /// Merge `self` as the base with `override_opts` taking precedence
    /// field-by-field. Used by the Session Service to combine stored
    /// runtime options with per-request overrides before dispatch.
    pub fn merged_with(&self, overrides: &RuntimeOptions) -> RuntimeOptions {
        let mut provider_flags = self.provider_flags.clone();
        for (k, v) in &overrides.provider_flags {
            provider_flags.insert(k.clone(), v.clone());
        }
        RuntimeOptions {
            model: overrides.model.clone().or_else(|| self.model.clone()),
            access_level: overrides.access_level.or(self.access_level),
            reasoning_level: overrides.reasoning_level.or(self.reasoning_level),
            provider_flags,
        }
    }
}

/// Routing and continuity metadata for a session, owned by the
/// Session Meta Store. `last_turn_id` and `last_active_at` always
/// advance together.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMeta {
    pub session_id: String,
    #[serde(default)]
    pub workspace_id: Option<String>,
    #[serde(default)]
    pub worktree_id: Option<String>,
    /// Identifier used by remote agent servers (OpenCode/KiloCode) to
    /// address this conversation on their side.
    #[serde(default)]
    pub provider_session_id: Option<String>,
    #[serde(default)]
    pub thread_id: Option<String>,
    #[serde(default)]
    pub last_turn_id: Option<String>,
    #[serde(default)]
    pub last_active_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub runtime_options: RuntimeOptions,
}

impl SessionMeta {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            workspace_id: None,
            worktree_id: None,
            provider_session_id: None,
            thread_id: None,
            last_turn_id: None,
            last_active_at: None,
            runtime_options: RuntimeOptions::default(),
        }
    }

    /// Advance `last_turn_id` and `last_active_at` in lockstep.
    pub fn record_turn(&mut self, turn_id: impl Into<String>, at: DateTime<Utc>) {
        self.last_turn_id = Some(turn_id.into());
        self.last_active_at = Some(at);
    }

    /// Advance only `last_active_at`, for approval-path activity that
    /// isn't itself a new turn.
    pub fn touch(&mut self, at: DateTime<Utc>) {
        self.last_active_at = Some(at);
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Turn
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnStatus {
    Completed,
    Failed,
    Interrupted,
    Cancelled,
}

/// A single request/response cycle against an agent. Not stored as a
/// first-class row; reconstructed from the items log when needed. At
/// most one non-terminal turn exists per session at a time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub turn_id: String,
    pub session_id: String,
    pub input: String,
    pub start_time: DateTime<Utc>,
    pub status: Option<TurnStatus>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Generate an opaque turn id in the documented `<provider>-turn-<random>`
/// shape.
pub fn new_turn_id(provider: &str) -> String {
    format!("{provider}-turn-{}", uuid::Uuid::new_v4().simple())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Item
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// An opaque JSON map appended to a session's `items.jsonl`. The only
/// fields core code ever probes are `type`, `turn_id`,
/// `provider_message_id`, and `content`; everything else passes
/// through untouched so new provider item shapes never require a
/// schema change here.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Item(pub Map<String, Value>);

impl Item {
    pub fn item_type(&self) -> Option<&str> {
        self.0.get("type").and_then(Value::as_str)
    }

    pub fn turn_id(&self) -> Option<&str> {
        self.0.get("turn_id").and_then(Value::as_str)
    }

    pub fn provider_message_id(&self) -> Option<&str> {
        self.0.get("provider_message_id").and_then(Value::as_str)
    }

    /// Stamp `created_at` if the provider didn't supply one.
    pub fn with_daemon_created_at(mut self, at: DateTime<Utc>) -> Self {
        self.0
            .entry("created_at")
            .or_insert_with(|| Value::String(at.to_rfc3339()));
        self
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// DebugEvent
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StdioStream {
    Stdout,
    Stderr,
}

/// One chunk of raw subprocess stdio, indexed by a monotonic
/// per-session sequence number. Held in a bounded ring buffer (event
/// count and byte size both capped) and mirrored to a JSONL file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebugEvent {
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    pub stream: StdioStream,
    pub chunk: String,
    pub session_id: String,
    pub provider: String,
}

impl DebugEvent {
    pub fn byte_len(&self) -> usize {
        self.chunk.len()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Approval
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A pending sandboxed-action request from an agent, awaiting a user
/// decision. Keyed by `(session_id, request_id)`; at most one open
/// approval per key. Removed once the decision is relayed back.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Approval {
    pub session_id: String,
    pub request_id: String,
    pub method: String,
    pub params: Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalDecision {
    Approve,
    Deny,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Workspace / Worktree / WorkspaceGroup / Note
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Row shapes only: persistence format is an ambient/CLI concern, not
// core (see WorkspaceStore/WorktreeStore/NoteStore in ports.rs).

/// A repository the daemon knows about. `repo_path` must be absolute
/// and exist on disk; enforced by the store implementation, not here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workspace {
    pub id: String,
    pub name: String,
    pub repo_path: String,
    pub created_at: DateTime<Utc>,
}

/// A checkout of a workspace's repo, optionally scoped to a subpath
/// within it (`session_subpath`, e.g. a git worktree under a
/// `.worktrees/` directory).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Worktree {
    pub id: String,
    pub workspace_id: String,
    pub repo_path: String,
    #[serde(default)]
    pub session_subpath: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A named grouping of workspaces, e.g. for shared notification routing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceGroup {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub workspace_ids: Vec<String>,
}

/// A freeform annotation scoped to some combination of kind/workspace/session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Note {
    pub id: String,
    pub kind: String,
    pub scope: String,
    #[serde(default)]
    pub workspace_id: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// Filter accepted by `NoteStore::list`. Every field is an optional
/// exact-match predicate; `None` means "don't filter on this."
#[derive(Debug, Clone, Default)]
pub struct NoteFilter {
    pub kind: Option<String>,
    pub scope: Option<String>,
    pub workspace_id: Option<String>,
    pub session_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_statuses() {
        assert!(SessionStatus::Exited.is_terminal());
        assert!(SessionStatus::Orphaned.is_terminal());
        assert!(!SessionStatus::Running.is_terminal());
        assert!(!SessionStatus::Inactive.is_terminal());
    }

    #[test]
    fn runtime_options_merge_prefers_override() {
        let base = RuntimeOptions {
            model: Some("base-model".into()),
            access_level: Some(AccessLevel::ReadOnly),
            reasoning_level: None,
            provider_flags: Map::new(),
        };
        let overrides = RuntimeOptions {
            model: None,
            access_level: Some(AccessLevel::Full),
            reasoning_level: Some(ReasoningLevel::High),
            provider_flags: Map::new(),
        };
        let merged = base.merged_with(&overrides);
        assert_eq!(merged.model.as_deref(), Some("base-model"));
        assert_eq!(merged.access_level, Some(AccessLevel::Full));
        assert_eq!(merged.reasoning_level, Some(ReasoningLevel::High));
    }

    #[test]
    fn session_meta_advances_turn_and_active_together() {
        let mut meta = SessionMeta::new("sess-1");
        let t = Utc::now();
        meta.record_turn("claude-turn-abc", t);
        assert_eq!(meta.last_turn_id.as_deref(), Some("claude-turn-abc"));
        assert_eq!(meta.last_active_at, Some(t));
    }

    #[test]
    fn item_probes_discriminator_fields() {
        let mut map = Map::new();
        map.insert("type".into(), Value::String("agentMessage".into()));
        map.insert("turn_id".into(), Value::String("t-1".into()));
        let item = Item(map);
        assert_eq!(item.item_type(), Some("agentMessage"));
        assert_eq!(item.turn_id(), Some("t-1"));
        assert_eq!(item.provider_message_id(), None);
    }

    #[test]
    fn new_turn_id_has_provider_prefix() {
        let id = new_turn_id("codex");
        assert!(id.starts_with("codex-turn-"));
    }
}
