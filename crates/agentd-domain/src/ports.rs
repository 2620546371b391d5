//! Store port traits shared by the Session Manager and the Session Service.
//!
//! Kept here rather than alongside their reference implementations so
//! `agentd-sessions` can call them without depending on `agentd-gateway`.

use async_trait::async_trait;

use crate::error::Result;
use crate::model::{Approval, Note, NoteFilter, Session, SessionMeta, Workspace, WorkspaceGroup, Worktree};

/// Durable owner of `Session` rows. The Session Manager's in-memory
/// runtime map is the *live* owner; the two are reconciled on startup.
#[async_trait]
pub trait SessionIndexStore: Send + Sync {
    async fn list(&self) -> Result<Vec<Session>>;
    async fn get(&self, session_id: &str) -> Result<Option<Session>>;
    async fn upsert(&self, session: Session) -> Result<()>;
    async fn delete(&self, session_id: &str) -> Result<()>;
}

/// Durable owner of `SessionMeta` rows (routing/continuity metadata).
/// `upsert` is a field merge: values left unset in the input must not
/// overwrite already-persisted fields.
#[async_trait]
pub trait SessionMetaStore: Send + Sync {
    async fn get(&self, session_id: &str) -> Result<Option<SessionMeta>>;
    async fn upsert(&self, meta: SessionMeta) -> Result<()>;
    async fn delete(&self, session_id: &str) -> Result<()>;
}

/// CRUD over workspaces. `repo_path` must be absolute and exist on
/// disk; implementations validate this, the trait only names the rule.
#[async_trait]
pub trait WorkspaceStore: Send + Sync {
    async fn list(&self) -> Result<Vec<Workspace>>;
    async fn get(&self, workspace_id: &str) -> Result<Option<Workspace>>;
    async fn upsert(&self, workspace: Workspace) -> Result<()>;
    async fn delete(&self, workspace_id: &str) -> Result<()>;
}

/// CRUD over worktrees. `session_subpath`, when set, must resolve
/// inside the owning workspace's `repo_path`.
#[async_trait]
pub trait WorktreeStore: Send + Sync {
    async fn list(&self, workspace_id: &str) -> Result<Vec<Worktree>>;
    async fn get(&self, worktree_id: &str) -> Result<Option<Worktree>>;
    async fn upsert(&self, worktree: Worktree) -> Result<()>;
    async fn delete(&self, worktree_id: &str) -> Result<()>;
}

/// CRUD over named workspace groupings.
#[async_trait]
pub trait WorkspaceGroupStore: Send + Sync {
    async fn list(&self) -> Result<Vec<WorkspaceGroup>>;
    async fn get(&self, group_id: &str) -> Result<Option<WorkspaceGroup>>;
    async fn upsert(&self, group: WorkspaceGroup) -> Result<()>;
    async fn delete(&self, group_id: &str) -> Result<()>;
}

/// Durable owner of pending `Approval` rows, keyed by
/// `(session_id, request_id)`. Distinct from the in-process
/// `agentd_runtime::approval::ApprovalStore`, which is the one
/// concrete in-memory implementation of this port the runtime ships.
#[async_trait]
pub trait ApprovalStore: Send + Sync {
    async fn list_by_session(&self, session_id: &str) -> Result<Vec<Approval>>;
    async fn get(&self, session_id: &str, request_id: &str) -> Result<Option<Approval>>;
    async fn upsert(&self, approval: Approval) -> Result<()>;
    async fn delete(&self, session_id: &str, request_id: &str) -> Result<()>;
    async fn delete_session(&self, session_id: &str) -> Result<()>;
}

/// CRUD over freeform notes, filterable by kind/scope/workspace/session.
#[async_trait]
pub trait NoteStore: Send + Sync {
    async fn list(&self, filter: &NoteFilter) -> Result<Vec<Note>>;
    async fn get(&self, note_id: &str) -> Result<Option<Note>>;
    async fn upsert(&self, note: Note) -> Result<()>;
    async fn delete(&self, note_id: &str) -> Result<()>;
}
