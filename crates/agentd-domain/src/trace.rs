use serde::Serialize;

/// Structured trace events emitted across the agentd crates.
///
/// These are distinct from routine `tracing::{debug,info,warn}!` call
/// sites: each variant marks a domain-significant occurrence worth
/// structured-searching (a session resolved, a turn scheduled, autostart
/// launched a server, a completion was published).
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum TraceEvent {
    SessionStarted {
        session_id: String,
        provider: String,
    },
    SessionResumed {
        session_id: String,
        provider: String,
    },
    SessionReconciledInactive {
        session_id: String,
    },
    TurnScheduled {
        session_id: String,
        turn_id: String,
        queue_depth: usize,
    },
    TurnStarted {
        session_id: String,
        turn_id: String,
    },
    TurnFailed {
        session_id: String,
        turn_id: String,
        error: String,
    },
    AutostartLaunched {
        provider: String,
        base_url: String,
        port: u16,
    },
    AutostartCleanupKilled {
        provider: String,
        pid: u32,
    },
    HistoryBackfilled {
        session_id: String,
        backfilled: usize,
    },
    CompletionPublished {
        session_id: String,
        turn_id: String,
        trigger: String,
        status: String,
    },
    CompletionSuppressedDuplicate {
        session_id: String,
        turn_id: String,
        trigger: String,
    },
}

impl TraceEvent {
    pub fn emit(&self) {
        let json = serde_json::to_string(self).unwrap_or_default();
        tracing::info!(trace_event = %json, "agentd_event");
    }
}
