//! Holds sandboxed-action approval requests awaiting a user decision,
//! keyed by the composite `(session_id, request_id)` the spec's data
//! model uses instead of a bare id.

use std::collections::HashMap;

use agentd_domain::error::{Error, Result};
use agentd_domain::model::Approval;
use agentd_providers::traits::ApprovalSink;
use parking_lot::RwLock;

type Key = (String, String);

#[derive(Default)]
pub struct ApprovalStore {
    pending: RwLock<HashMap<Key, Approval>>,
}

impl ApprovalStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, approval: Approval) {
        let key = (approval.session_id.clone(), approval.request_id.clone());
        self.pending.write().insert(key, approval);
    }

    /// Remove and return a pending approval. Called once the decision
    /// is relayed back to the provider so a stale re-decision can't
    /// resurrect it.
    pub fn take(&self, session_id: &str, request_id: &str) -> Result<Approval> {
        self.pending
            .write()
            .remove(&(session_id.to_string(), request_id.to_string()))
            .ok_or_else(|| Error::NotFound(format!("no pending approval '{request_id}' for session '{session_id}'")))
    }

    pub fn list_pending(&self, session_id: &str) -> Vec<Approval> {
        self.pending
            .read()
            .values()
            .filter(|a| a.session_id == session_id)
            .cloned()
            .collect()
    }

    pub fn is_pending(&self, session_id: &str, request_id: &str) -> bool {
        self.pending
            .read()
            .contains_key(&(session_id.to_string(), request_id.to_string()))
    }
}

impl ApprovalSink for ApprovalStore {
    fn insert(&self, approval: Approval) {
        ApprovalStore::insert(self, approval)
    }

    fn take(&self, session_id: &str, request_id: &str) -> Result<Approval> {
        ApprovalStore::take(self, session_id, request_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    fn approval(session_id: &str, request_id: &str) -> Approval {
        Approval {
            session_id: session_id.into(),
            request_id: request_id.into(),
            method: "fs.write".into(),
            params: json!({"path": "/tmp/x"}),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn take_removes_and_returns_the_approval() {
        let store = ApprovalStore::new();
        store.insert(approval("s1", "r1"));
        assert!(store.is_pending("s1", "r1"));
        let taken = store.take("s1", "r1").unwrap();
        assert_eq!(taken.method, "fs.write");
        assert!(!store.is_pending("s1", "r1"));
    }

    #[test]
    fn take_twice_is_not_found_the_second_time() {
        let store = ApprovalStore::new();
        store.insert(approval("s1", "r1"));
        store.take("s1", "r1").unwrap();
        let err = store.take("s1", "r1").unwrap_err();
        assert_eq!(err.kind(), agentd_domain::error::ErrorKind::NotFound);
    }

    #[test]
    fn list_pending_scopes_by_session() {
        let store = ApprovalStore::new();
        store.insert(approval("s1", "r1"));
        store.insert(approval("s2", "r2"));
        let listed = store.list_pending("s1");
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].request_id, "r1");
    }
}
