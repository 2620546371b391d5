//! Daemon construction: one place that owns the wiring order described
//! by the crate layering (domain → sessions → providers → runtime →
//! gateway). Kept separate from `main.rs` so tests can build the same
//! graph against in-memory stores without touching the filesystem.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use agentd_domain::config::Config;
use agentd_domain::error::{Error, Result};
use agentd_domain::ports::{SessionIndexStore, SessionMetaStore};
use agentd_providers::adapters::{claude, codex, gemini, opencode};
use agentd_providers::autostart::{AutostartConfig, AutostartState};
use agentd_providers::http_transport::HttpTransport;
use agentd_providers::reconciler::OpenCodeReconciler;
use agentd_providers::registry::AdapterRegistry;
use agentd_providers::stdio_transport::StdioTransport;
use agentd_providers::traits::{ApprovalSink, TurnEnqueuePort};
use agentd_runtime::approval::ApprovalStore;
use agentd_runtime::cancel::CancelMap;
use agentd_runtime::completion::{DedupPolicy, DefaultRecipientResolver, NotificationService, TurnWaitRegistry};
use agentd_runtime::scheduler::{ClaudeFailureReporter, ClaudeTurnScheduler, StdioClaudeExecutor};
use agentd_sessions::SessionManager;
use std::time::Duration;

use crate::service::SessionService;
use crate::stores::{file, memory};

/// Where durable session/meta rows live. `Memory` backs tests and a
/// no-persistence run mode; `File` is the CLI binary's default.
pub enum Persistence {
    Memory,
    File(PathBuf),
}

/// The fully wired daemon: everything `main.rs` needs to serve
/// traffic or hand off to a CLI subcommand.
pub struct Daemon {
    pub sessions: Arc<SessionManager>,
    pub registry: Arc<AdapterRegistry>,
    pub service: Arc<SessionService>,
    pub scheduler: Arc<ClaudeTurnScheduler>,
    pub notifications: Arc<NotificationService>,
    pub approvals: Arc<ApprovalStore>,
    pub autostart: Arc<AutostartState>,
}

fn build_stores(persistence: &Persistence) -> Result<(Arc<dyn SessionIndexStore>, Arc<dyn SessionMetaStore>)> {
    match persistence {
        Persistence::Memory => Ok((
            Arc::new(memory::InMemorySessionIndexStore::new()),
            Arc::new(memory::InMemorySessionMetaStore::new()),
        )),
        Persistence::File(dir) => {
            Ok((Arc::new(file::FileSessionIndexStore::open(dir)?), Arc::new(file::FileSessionMetaStore::open(dir)?)))
        }
    }
}

fn normalize(provider: &str) -> String {
    provider.trim().to_ascii_lowercase()
}

/// Pull `host`/`port` back out of a `http://host:port` base URL for
/// `AutostartConfig`, which needs them discrete to build its own
/// loopback probe/relaunch URL. Ad-hoc rather than pulling in a URL
/// crate for one split, matching how `http_transport.rs` handles its
/// one query parameter.
fn parse_host_port(base_url: &str) -> Result<(String, u16)> {
    let without_scheme = base_url
        .trim_start_matches("https://")
        .trim_start_matches("http://");
    let authority = without_scheme.split('/').next().unwrap_or(without_scheme);
    let (host, port) = authority
        .rsplit_once(':')
        .ok_or_else(|| Error::Invalid(format!("base_url '{base_url}' has no explicit port")))?;
    let port: u16 = port
        .parse()
        .map_err(|_| Error::Invalid(format!("base_url '{base_url}' has a non-numeric port")))?;
    Ok((host.to_string(), port))
}

/// Register the adapter bundle for one configured provider entry, by
/// provider-name family. Unknown provider names are left unregistered
/// — the registry's "unsupported" fallback handles them at dispatch.
fn register_provider(
    registry: &mut AdapterRegistry,
    name: &str,
    entry: &agentd_domain::config::ProviderEntry,
    sessions: Arc<SessionManager>,
    scheduler: Arc<ClaudeTurnScheduler>,
    approvals: Arc<dyn ApprovalSink>,
    autostart: Arc<AutostartState>,
    config: &Config,
) -> Result<()> {
    let key = normalize(name);
    match key.as_str() {
        "claude" => {
            let send: Arc<dyn TurnEnqueuePort> = scheduler.clone();
            registry.register_send(&key, Arc::new(claude::ClaudeSendAdapter::new(send)));
            registry.register_history(&key, Arc::new(claude::ClaudeHistoryAdapter::new(sessions.clone())));
            registry.register_subscribe(&key, Arc::new(claude::ClaudeSubscribeAdapter::new(sessions.clone())));
            if entry.command.is_some() {
                let transport = StdioTransport::new(sessions);
                registry.register_interrupt(&key, Arc::new(claude::ClaudeInterruptAdapter::new(transport)));
            }
        }
        "codex" | "gemini" => {
            let transport = StdioTransport::new(sessions.clone());
            let data_dir = config.daemon.sessions_dir.join(&key);
            if key == "codex" {
                registry.register_send(&key, Arc::new(codex::CodexSendAdapter::new(transport.clone())));
                registry.register_history(&key, Arc::new(codex::CodexHistoryClient::new(data_dir)));
                registry.register_subscribe(&key, Arc::new(codex::CodexSubscribeAdapter::new(sessions, approvals.clone())));
                registry.register_interrupt(&key, Arc::new(codex::CodexInterruptAdapter::new(transport.clone())));
                registry.register_approve(&key, Arc::new(codex::CodexApproveAdapter::new(transport, approvals)));
            } else {
                registry.register_send(&key, Arc::new(gemini::GeminiSendAdapter::new(transport.clone())));
                registry.register_subscribe(&key, Arc::new(gemini::GeminiSubscribeAdapter::new(sessions.clone())));
                registry.register_history(&key, Arc::new(gemini::GeminiHistoryAdapter::new(sessions)));
                registry.register_interrupt(&key, Arc::new(gemini::GeminiInterruptAdapter::new(transport)));
            }
        }
        "opencode" | "kilocode" => {
            let base_url = entry
                .base_url
                .as_deref()
                .ok_or_else(|| Error::Invalid(format!("provider '{key}' missing base_url")))?;
            let auth_username = entry.auth_username.clone().or_else(|| Some(key.clone()));
            let token = entry.token.clone();
            let transport = Arc::new(HttpTransport::new(base_url, auth_username.clone(), token.clone(), config.daemon.http_request_timeout_ms)?);

            let (host, port) = parse_host_port(base_url)?;
            let autostart_cfg = AutostartConfig {
                command: entry.command.clone().unwrap_or_default(),
                host,
                port,
                token: token.clone().unwrap_or_default(),
                cleanup_wait_ms: config.daemon.autostart_cleanup_wait_ms,
                launch_ready_wait_ms: config.daemon.autostart_launch_ready_wait_ms,
                rate_limit_window_ms: config.daemon.autostart_rate_limit_window_ms,
            };

            registry.register_send(
                &key,
                Arc::new(opencode::OpenCodeSendAdapter::new(
                    transport.clone(),
                    key.clone(),
                    autostart,
                    autostart_cfg,
                    auth_username,
                    token,
                    config.daemon.http_request_timeout_ms,
                )),
            );
            let reconciler_transport = HttpTransport::new(base_url, entry.auth_username.clone().or_else(|| Some(key.clone())), entry.token.clone(), config.daemon.http_request_timeout_ms)?;
            registry.register_history(
                &key,
                Arc::new(OpenCodeReconciler::new(reconciler_transport, sessions)),
            );
            registry.register_subscribe(
                &key,
                Arc::new(opencode::OpenCodeSubscribeAdapter::new(
                    transport.clone(),
                    config.daemon.subscriber_channel_capacity,
                    approvals.clone(),
                )),
            );
            registry.register_approve(&key, Arc::new(opencode::OpenCodeApproveAdapter::new(transport, approvals)));
        }
        _ => {
            tracing::warn!(provider = %name, "no adapter bundle known for this provider name, leaving unregistered");
        }
    }
    Ok(())
}

pub fn build(config: Config, persistence: Persistence) -> Result<Daemon> {
    let (index_store, meta_store) = build_stores(&persistence)?;
    let sessions = Arc::new(SessionManager::new(config.daemon.clone(), index_store.clone(), meta_store.clone()));

    let mut registry = AdapterRegistry::new(sessions.clone());

    let waiters = Arc::new(TurnWaitRegistry::new());
    let cancel_map = Arc::new(CancelMap::new());
    let dedup = Arc::new(DedupPolicy::new(Duration::from_millis(config.daemon.completion_dedup_window_ms)));
    let approvals = Arc::new(ApprovalStore::new());
    let autostart = Arc::new(AutostartState::new());

    let notifications = Arc::new(NotificationService::start(
        config.daemon.notification_queue_capacity,
        config.daemon.notification_min_timeout_ms,
        dedup,
        Arc::new(DefaultRecipientResolver),
        Arc::new(|event| {
            tracing::info!(
                session_id = %event.session_id,
                turn_id = %event.turn_id,
                status = %event.status,
                "completion notification dispatched"
            );
        }),
    ));

    let claude_transport = StdioTransport::new(sessions.clone());
    let claude_executor = Arc::new(StdioClaudeExecutor::new(
        claude_transport,
        waiters.clone(),
        sessions.clone(),
        notifications.clone(),
        Duration::from_millis(config.daemon.claude_completion_wait_ms),
    ));
    let failure_reporter = Arc::new(ClaudeFailureReporter::new(sessions.clone(), notifications.clone()));
    let scheduler =
        ClaudeTurnScheduler::start(config.daemon.scheduler_queue_capacity, claude_executor, failure_reporter, cancel_map);

    for (name, entry) in &config.providers.entries {
        register_provider(
            &mut registry,
            name,
            entry,
            sessions.clone(),
            scheduler.clone(),
            approvals.clone(),
            autostart.clone(),
            &config,
        )?;
    }

    let registry = Arc::new(registry);
    let service = Arc::new(SessionService::new(registry.clone(), index_store, meta_store));

    Ok(Daemon { sessions, registry, service, scheduler, notifications, approvals, autostart })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn build_with_no_providers_still_produces_a_working_daemon() {
        let daemon = build(Config::default(), Persistence::Memory).unwrap();
        assert!(daemon.scheduler.active_turn_id("no-such-session").is_none());
        assert!(!daemon.approvals.is_pending("s1", "r1"));
    }

    #[tokio::test]
    async fn build_registers_a_claude_bundle_without_requiring_a_command() {
        let mut config = Config::default();
        config.providers.entries.insert(
            "claude".into(),
            agentd_domain::config::ProviderEntry { command: None, base_url: None, auth_username: None, token: None },
        );
        let daemon = build(config, Persistence::Memory).unwrap();
        // send/history/subscribe are registered even without a spawn
        // command; only interrupt needs a live transport to attach to.
        let err = daemon
            .registry
            .history(
                &agentd_domain::model::Session {
                    id: "s1".into(),
                    provider: "claude".into(),
                    cwd: ".".into(),
                    command: "cat".into(),
                    env: vec![],
                    status: agentd_domain::model::SessionStatus::Running,
                    created_at: chrono::Utc::now(),
                },
                &agentd_domain::model::SessionMeta::new("s1"),
                10,
            )
            .await;
        // ClaudeHistoryAdapter reads items.jsonl from disk; for a session
        // the manager never started this surfaces as SessionNotFound
        // rather than "unsupported", proving the bundle is registered.
        assert_ne!(err.unwrap_err().kind(), agentd_domain::error::ErrorKind::Invalid);
    }

    #[test]
    fn parse_host_port_splits_scheme_and_path() {
        assert_eq!(parse_host_port("http://127.0.0.1:4096").unwrap(), ("127.0.0.1".to_string(), 4096));
        assert_eq!(parse_host_port("https://example.com:8443/api").unwrap(), ("example.com".to_string(), 8443));
        assert!(parse_host_port("http://127.0.0.1").is_err());
    }

    #[tokio::test]
    async fn build_registers_an_opencode_bundle_sharing_one_approval_store_and_autostart_state() {
        let mut config = Config::default();
        config.providers.entries.insert(
            "opencode".into(),
            agentd_domain::config::ProviderEntry {
                command: Some("opencode".into()),
                base_url: Some("http://127.0.0.1:1".into()),
                auth_username: None,
                token: Some("secret".into()),
            },
        );
        let daemon = build(config, Persistence::Memory).unwrap();

        // Nothing listens on 127.0.0.1:1, so the call reaches the real
        // transport and fails as "unavailable" rather than "unsupported"
        // (agentd_providers::registry::is_unsupported maps to Invalid) —
        // proving ApprovePort is registered and wired through to a live
        // HttpTransport instead of being left unregistered.
        let err = daemon
            .registry
            .approve(
                &agentd_domain::model::Session {
                    id: "s1".into(),
                    provider: "opencode".into(),
                    cwd: ".".into(),
                    command: "opencode".into(),
                    env: vec![],
                    status: agentd_domain::model::SessionStatus::Running,
                    created_at: chrono::Utc::now(),
                },
                "req-1",
                agentd_domain::model::ApprovalDecision::Approve,
                None,
            )
            .await
            .unwrap_err();
        assert!(!agentd_providers::registry::is_unsupported(&err));
        assert!(!daemon.approvals.is_pending("s1", "req-1"));
    }
}
