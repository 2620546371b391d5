//! Thin JSON-file-backed store port implementations for the CLI
//! binary's default (non-ephemeral) run mode. Each store keeps an
//! in-memory `HashMap` cache and flushes the whole table to one JSON
//! file on every mutation, mirroring the host's own session store
//! shape: load-at-construction, write-through on change.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use agentd_domain::error::{Error, Result};
use agentd_domain::model::{Approval, Note, NoteFilter, Session, SessionMeta, Workspace, WorkspaceGroup, Worktree};
use agentd_domain::ports::{
    ApprovalStore, NoteStore, SessionIndexStore, SessionMetaStore, WorkspaceGroupStore, WorkspaceStore, WorktreeStore,
};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// A single JSON file holding a `HashMap<String, T>`, loaded once and
/// flushed in full on every write. Not suited to very large tables,
/// but matches the scale this daemon actually persists (sessions,
/// workspaces, notes — not event logs).
struct JsonFileTable<T> {
    path: PathBuf,
    rows: RwLock<HashMap<String, T>>,
}

impl<T: Clone + Serialize + DeserializeOwned> JsonFileTable<T> {
    fn open(dir: &Path, file_name: &str) -> Result<Self> {
        std::fs::create_dir_all(dir).map_err(Error::Io)?;
        let path = dir.join(file_name);
        let rows = if path.exists() {
            let raw = std::fs::read_to_string(&path).map_err(Error::Io)?;
            serde_json::from_str(&raw).unwrap_or_default()
        } else {
            HashMap::new()
        };
        Ok(Self { path, rows: RwLock::new(rows) })
    }

    fn flush(&self) -> Result<()> {
        let rows = self.rows.read();
        let json = serde_json::to_string_pretty(&*rows)?;
        std::fs::write(&self.path, json).map_err(Error::Io)?;
        Ok(())
    }

    fn get(&self, key: &str) -> Option<T> {
        self.rows.read().get(key).cloned()
    }

    fn list(&self) -> Vec<T> {
        self.rows.read().values().cloned().collect()
    }

    fn upsert(&self, key: String, value: T) -> Result<()> {
        self.rows.write().insert(key, value);
        self.flush()
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.rows.write().remove(key);
        self.flush()
    }
}

pub struct FileSessionIndexStore {
    table: JsonFileTable<Session>,
}

impl FileSessionIndexStore {
    pub fn open(state_dir: &Path) -> Result<Self> {
        Ok(Self { table: JsonFileTable::open(state_dir, "sessions.json")? })
    }
}

#[async_trait]
impl SessionIndexStore for FileSessionIndexStore {
    async fn list(&self) -> Result<Vec<Session>> {
        Ok(self.table.list())
    }
    async fn get(&self, session_id: &str) -> Result<Option<Session>> {
        Ok(self.table.get(session_id))
    }
    async fn upsert(&self, session: Session) -> Result<()> {
        self.table.upsert(session.id.clone(), session)
    }
    async fn delete(&self, session_id: &str) -> Result<()> {
        self.table.remove(session_id)
    }
}

pub struct FileSessionMetaStore {
    table: JsonFileTable<SessionMeta>,
}

impl FileSessionMetaStore {
    pub fn open(state_dir: &Path) -> Result<Self> {
        Ok(Self { table: JsonFileTable::open(state_dir, "session_meta.json")? })
    }
}

#[async_trait]
impl SessionMetaStore for FileSessionMetaStore {
    async fn get(&self, session_id: &str) -> Result<Option<SessionMeta>> {
        Ok(self.table.get(session_id))
    }

    async fn upsert(&self, meta: SessionMeta) -> Result<()> {
        let merged = match self.table.get(&meta.session_id) {
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
                existing
            }
            None => meta,
        };
        self.table.upsert(merged.session_id.clone(), merged)
    }

    async fn delete(&self, session_id: &str) -> Result<()> {
        self.table.remove(session_id)
    }
}

pub struct FileWorkspaceStore {
    table: JsonFileTable<Workspace>,
}

impl FileWorkspaceStore {
    pub fn open(state_dir: &Path) -> Result<Self> {
        Ok(Self { table: JsonFileTable::open(state_dir, "workspaces.json")? })
    }
}

#[async_trait]
impl WorkspaceStore for FileWorkspaceStore {
    async fn list(&self) -> Result<Vec<Workspace>> {
        Ok(self.table.list())
    }
    async fn get(&self, workspace_id: &str) -> Result<Option<Workspace>> {
        Ok(self.table.get(workspace_id))
    }
    async fn upsert(&self, workspace: Workspace) -> Result<()> {
        if !Path::new(&workspace.repo_path).is_absolute() {
            return Err(Error::Invalid(format!("workspace repo_path must be absolute: {}", workspace.repo_path)));
        }
        self.table.upsert(workspace.id.clone(), workspace)
    }
    async fn delete(&self, workspace_id: &str) -> Result<()> {
        self.table.remove(workspace_id)
    }
}

pub struct FileWorktreeStore {
    table: JsonFileTable<Worktree>,
}

impl FileWorktreeStore {
    pub fn open(state_dir: &Path) -> Result<Self> {
        Ok(Self { table: JsonFileTable::open(state_dir, "worktrees.json")? })
    }
}

#[async_trait]
impl WorktreeStore for FileWorktreeStore {
    async fn list(&self, workspace_id: &str) -> Result<Vec<Worktree>> {
        Ok(self.table.list().into_iter().filter(|w| w.workspace_id == workspace_id).collect())
    }
    async fn get(&self, worktree_id: &str) -> Result<Option<Worktree>> {
        Ok(self.table.get(worktree_id))
    }
    async fn upsert(&self, worktree: Worktree) -> Result<()> {
        if let Some(sub) = &worktree.session_subpath {
            let resolved = Path::new(&worktree.repo_path).join(sub);
            if !resolved.starts_with(&worktree.repo_path) {
                return Err(Error::Invalid(format!("session_subpath '{sub}' escapes repo_path")));
            }
        }
        self.table.upsert(worktree.id.clone(), worktree)
    }
    async fn delete(&self, worktree_id: &str) -> Result<()> {
        self.table.remove(worktree_id)
    }
}

pub struct FileWorkspaceGroupStore {
    table: JsonFileTable<WorkspaceGroup>,
}

impl FileWorkspaceGroupStore {
    pub fn open(state_dir: &Path) -> Result<Self> {
        Ok(Self { table: JsonFileTable::open(state_dir, "workspace_groups.json")? })
    }
}

#[async_trait]
impl WorkspaceGroupStore for FileWorkspaceGroupStore {
    async fn list(&self) -> Result<Vec<WorkspaceGroup>> {
        Ok(self.table.list())
    }
    async fn get(&self, group_id: &str) -> Result<Option<WorkspaceGroup>> {
        Ok(self.table.get(group_id))
    }
    async fn upsert(&self, group: WorkspaceGroup) -> Result<()> {
        self.table.upsert(group.id.clone(), group)
    }
    async fn delete(&self, group_id: &str) -> Result<()> {
        self.table.remove(group_id)
    }
}

fn approval_key(session_id: &str, request_id: &str) -> String {
    format!("{session_id}::{request_id}")
}

pub struct FileApprovalStore {
    table: JsonFileTable<Approval>,
}

impl FileApprovalStore {
    pub fn open(state_dir: &Path) -> Result<Self> {
        Ok(Self { table: JsonFileTable::open(state_dir, "approvals.json")? })
    }
}

#[async_trait]
impl ApprovalStore for FileApprovalStore {
    async fn list_by_session(&self, session_id: &str) -> Result<Vec<Approval>> {
        Ok(self.table.list().into_iter().filter(|a| a.session_id == session_id).collect())
    }
    async fn get(&self, session_id: &str, request_id: &str) -> Result<Option<Approval>> {
        Ok(self.table.get(&approval_key(session_id, request_id)))
    }
    async fn upsert(&self, approval: Approval) -> Result<()> {
        let key = approval_key(&approval.session_id, &approval.request_id);
        self.table.upsert(key, approval)
    }
    async fn delete(&self, session_id: &str, request_id: &str) -> Result<()> {
        self.table.remove(&approval_key(session_id, request_id))
    }
    async fn delete_session(&self, session_id: &str) -> Result<()> {
        let prefix = format!("{session_id}::");
        let keys: Vec<String> =
            self.table.rows.read().keys().filter(|k| k.starts_with(&prefix)).cloned().collect();
        for key in keys {
            self.table.rows.write().remove(&key);
        }
        self.table.flush()
    }
}

pub struct FileNoteStore {
    table: JsonFileTable<Note>,
}

impl FileNoteStore {
    pub fn open(state_dir: &Path) -> Result<Self> {
        Ok(Self { table: JsonFileTable::open(state_dir, "notes.json")? })
    }
}

#[async_trait]
impl NoteStore for FileNoteStore {
    async fn list(&self, filter: &NoteFilter) -> Result<Vec<Note>> {
        Ok(self
            .table
            .list()
            .into_iter()
            .filter(|n| filter.kind.as_deref().map_or(true, |k| n.kind == k))
            .filter(|n| filter.scope.as_deref().map_or(true, |s| n.scope == s))
            .filter(|n| filter.workspace_id.is_none() || filter.workspace_id == n.workspace_id)
            .filter(|n| filter.session_id.is_none() || filter.session_id == n.session_id)
            .collect())
    }
    async fn get(&self, note_id: &str) -> Result<Option<Note>> {
        Ok(self.table.get(note_id))
    }
    async fn upsert(&self, note: Note) -> Result<()> {
        self.table.upsert(note.id.clone(), note)
    }
    async fn delete(&self, note_id: &str) -> Result<()> {
        self.table.remove(note_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentd_domain::model::SessionStatus;
    use chrono::Utc;

    #[tokio::test]
    async fn session_index_survives_a_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = FileSessionIndexStore::open(dir.path()).unwrap();
            store
                .upsert(Session {
                    id: "s1".into(),
                    provider: "claude".into(),
                    cwd: ".".into(),
                    command: "cat".into(),
                    env: vec![],
                    status: SessionStatus::Running,
                    created_at: Utc::now(),
                })
                .await
                .unwrap();
        }
        let reopened = FileSessionIndexStore::open(dir.path()).unwrap();
        let got = reopened.get("s1").await.unwrap().unwrap();
        assert_eq!(got.provider, "claude");
    }

    #[tokio::test]
    async fn session_meta_upsert_merges_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSessionMetaStore::open(dir.path()).unwrap();
        let mut first = SessionMeta::new("s1");
        first.workspace_id = Some("w1".into());
        store.upsert(first).await.unwrap();

        let mut second = SessionMeta::new("s1");
        second.last_turn_id = Some("t1".into());
        store.upsert(second).await.unwrap();

        let got = store.get("s1").await.unwrap().unwrap();
        assert_eq!(got.workspace_id.as_deref(), Some("w1"));
        assert_eq!(got.last_turn_id.as_deref(), Some("t1"));
    }

    #[tokio::test]
    async fn workspace_upsert_rejects_relative_repo_path() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileWorkspaceStore::open(dir.path()).unwrap();
        let err = store
            .upsert(Workspace { id: "w1".into(), name: "demo".into(), repo_path: "relative/path".into(), created_at: Utc::now() })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), agentd_domain::error::ErrorKind::Invalid);
    }

    #[tokio::test]
    async fn worktree_upsert_rejects_subpath_escaping_repo() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileWorktreeStore::open(dir.path()).unwrap();
        let err = store
            .upsert(Worktree {
                id: "wt1".into(),
                workspace_id: "w1".into(),
                repo_path: "/repo".into(),
                session_subpath: Some("../../etc".into()),
                created_at: Utc::now(),
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), agentd_domain::error::ErrorKind::Invalid);
    }

    #[tokio::test]
    async fn approval_delete_session_only_removes_that_sessions_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileApprovalStore::open(dir.path()).unwrap();
        store
            .upsert(Approval { session_id: "s1".into(), request_id: "r1".into(), method: "fs.write".into(), params: serde_json::json!({}), created_at: Utc::now() })
            .await
            .unwrap();
        store
            .upsert(Approval { session_id: "s2".into(), request_id: "r2".into(), method: "fs.write".into(), params: serde_json::json!({}), created_at: Utc::now() })
            .await
            .unwrap();
        store.delete_session("s1").await.unwrap();
        assert!(store.list_by_session("s1").await.unwrap().is_empty());
        assert_eq!(store.list_by_session("s2").await.unwrap().len(), 1);
    }
}
