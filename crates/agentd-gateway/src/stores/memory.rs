//! In-memory store port implementations: no persistence, useful for
//! tests and a no-persistence run mode. Each store is a
//! `RwLock<HashMap<..>>` guarded the same way the session runtime map
//! itself is guarded.

use std::collections::HashMap;

use agentd_domain::error::Result;
use agentd_domain::model::{Approval, Note, NoteFilter, Session, SessionMeta, Workspace, WorkspaceGroup, Worktree};
use agentd_domain::ports::{
    ApprovalStore, NoteStore, SessionIndexStore, SessionMetaStore, WorkspaceGroupStore, WorkspaceStore, WorktreeStore,
};
use async_trait::async_trait;
use parking_lot::RwLock;

#[derive(Default)]
pub struct InMemorySessionIndexStore {
    rows: RwLock<HashMap<String, Session>>,
}

impl InMemorySessionIndexStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionIndexStore for InMemorySessionIndexStore {
    async fn list(&self) -> Result<Vec<Session>> {
        Ok(self.rows.read().values().cloned().collect())
    }
    async fn get(&self, session_id: &str) -> Result<Option<Session>> {
        Ok(self.rows.read().get(session_id).cloned())
    }
    async fn upsert(&self, session: Session) -> Result<()> {
        self.rows.write().insert(session.id.clone(), session);
        Ok(())
    }
    async fn delete(&self, session_id: &str) -> Result<()> {
        self.rows.write().remove(session_id);
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemorySessionMetaStore {
    rows: RwLock<HashMap<String, SessionMeta>>,
}

impl InMemorySessionMetaStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionMetaStore for InMemorySessionMetaStore {
    async fn get(&self, session_id: &str) -> Result<Option<SessionMeta>> {
        Ok(self.rows.read().get(session_id).cloned())
    }

    /// Field merge: any field left at its `SessionMeta::new` default in
    /// `meta` keeps the previously persisted value instead of
    /// clobbering it with `None`/`0`.
    async fn upsert(&self, meta: SessionMeta) -> Result<()> {
        let mut rows = self.rows.write();
        match rows.get(&meta.session_id).cloned() {
            Some(mut existing) => {
                if meta.workspace_id.is_some() {
                    existing.workspace_id = meta.workspace_id;
                }
                if meta.worktree_id.is_some() {
                    existing.worktree_id = meta.worktree_id;
                }
                if meta.provider_session_id.is_some() {
                    existing.provider_session_id = meta.provider_session_id;
                }
                if meta.thread_id.is_some() {
                    existing.thread_id = meta.thread_id;
                }
                if meta.last_turn_id.is_some() {
                    existing.last_turn_id = meta.last_turn_id;
                }
                if meta.last_active_at.is_some() {
                    existing.last_active_at = meta.last_active_at;
                }
                existing.runtime_options = existing.runtime_options.merged_with(&meta.runtime_options);
                rows.insert(meta.session_id.clone(), existing);
            }
            None => {
                rows.insert(meta.session_id.clone(), meta);
            }
        }
        Ok(())
    }

    async fn delete(&self, session_id: &str) -> Result<()> {
        self.rows.write().remove(session_id);
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryWorkspaceStore {
    rows: RwLock<HashMap<String, Workspace>>,
}

impl InMemoryWorkspaceStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WorkspaceStore for InMemoryWorkspaceStore {
    async fn list(&self) -> Result<Vec<Workspace>> {
        Ok(self.rows.read().values().cloned().collect())
    }
    async fn get(&self, workspace_id: &str) -> Result<Option<Workspace>> {
        Ok(self.rows.read().get(workspace_id).cloned())
    }
    async fn upsert(&self, workspace: Workspace) -> Result<()> {
        self.rows.write().insert(workspace.id.clone(), workspace);
        Ok(())
    }
    async fn delete(&self, workspace_id: &str) -> Result<()> {
        self.rows.write().remove(workspace_id);
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryWorktreeStore {
    rows: RwLock<HashMap<String, Worktree>>,
}

impl InMemoryWorktreeStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WorktreeStore for InMemoryWorktreeStore {
    async fn list(&self, workspace_id: &str) -> Result<Vec<Worktree>> {
        Ok(self.rows.read().values().filter(|w| w.workspace_id == workspace_id).cloned().collect())
    }
    async fn get(&self, worktree_id: &str) -> Result<Option<Worktree>> {
        Ok(self.rows.read().get(worktree_id).cloned())
    }
    async fn upsert(&self, worktree: Worktree) -> Result<()> {
        self.rows.write().insert(worktree.id.clone(), worktree);
        Ok(())
    }
    async fn delete(&self, worktree_id: &str) -> Result<()> {
        self.rows.write().remove(worktree_id);
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryWorkspaceGroupStore {
    rows: RwLock<HashMap<String, WorkspaceGroup>>,
}

impl InMemoryWorkspaceGroupStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WorkspaceGroupStore for InMemoryWorkspaceGroupStore {
    async fn list(&self) -> Result<Vec<WorkspaceGroup>> {
        Ok(self.rows.read().values().cloned().collect())
    }
    async fn get(&self, group_id: &str) -> Result<Option<WorkspaceGroup>> {
        Ok(self.rows.read().get(group_id).cloned())
    }
    async fn upsert(&self, group: WorkspaceGroup) -> Result<()> {
        self.rows.write().insert(group.id.clone(), group);
        Ok(())
    }
    async fn delete(&self, group_id: &str) -> Result<()> {
        self.rows.write().remove(group_id);
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryApprovalStore {
    rows: RwLock<HashMap<(String, String), Approval>>,
}

impl InMemoryApprovalStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ApprovalStore for InMemoryApprovalStore {
    async fn list_by_session(&self, session_id: &str) -> Result<Vec<Approval>> {
        Ok(self.rows.read().values().filter(|a| a.session_id == session_id).cloned().collect())
    }
    async fn get(&self, session_id: &str, request_id: &str) -> Result<Option<Approval>> {
        Ok(self.rows.read().get(&(session_id.to_string(), request_id.to_string())).cloned())
    }
    async fn upsert(&self, approval: Approval) -> Result<()> {
        let key = (approval.session_id.clone(), approval.request_id.clone());
        self.rows.write().insert(key, approval);
        Ok(())
    }
    async fn delete(&self, session_id: &str, request_id: &str) -> Result<()> {
        self.rows.write().remove(&(session_id.to_string(), request_id.to_string()));
        Ok(())
    }
    async fn delete_session(&self, session_id: &str) -> Result<()> {
        self.rows.write().retain(|k, _| k.0 != session_id);
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryNoteStore {
    rows: RwLock<HashMap<String, Note>>,
}

impl InMemoryNoteStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl NoteStore for InMemoryNoteStore {
    async fn list(&self, filter: &NoteFilter) -> Result<Vec<Note>> {
        Ok(self
            .rows
            .read()
            .values()
            .filter(|n| filter.kind.as_deref().map_or(true, |k| n.kind == k))
            .filter(|n| filter.scope.as_deref().map_or(true, |s| n.scope == s))
            .filter(|n| filter.workspace_id.is_none() || filter.workspace_id == n.workspace_id)
            .filter(|n| filter.session_id.is_none() || filter.session_id == n.session_id)
            .cloned()
            .collect())
    }
    async fn get(&self, note_id: &str) -> Result<Option<Note>> {
        Ok(self.rows.read().get(note_id).cloned())
    }
    async fn upsert(&self, note: Note) -> Result<()> {
        self.rows.write().insert(note.id.clone(), note);
        Ok(())
    }
    async fn delete(&self, note_id: &str) -> Result<()> {
        self.rows.write().remove(note_id);
        Ok(())
    }
}
