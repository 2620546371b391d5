use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub daemon: DaemonConfig,
    #[serde(default)]
    pub providers: ProvidersConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Daemon — ring buffer caps, timeouts, dedup windows
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Base directory for per-session files (stdout.log/stderr.log/items.jsonl/debug.jsonl).
    #[serde(default = "d_sessions_dir")]
    pub sessions_dir: std::path::PathBuf,

    /// Debug ring buffer: max event count.
    #[serde(default = "d_debug_max_events")]
    pub debug_ring_max_events: usize,
    /// Debug ring buffer: max total bytes.
    #[serde(default = "d_debug_max_bytes")]
    pub debug_ring_max_bytes: usize,
    /// Stdout/stderr ring buffer byte cap.
    #[serde(default = "d_log_ring_max_bytes")]
    pub log_ring_max_bytes: usize,

    /// Item/debug subscriber channel capacity.
    #[serde(default = "d_subscriber_capacity")]
    pub subscriber_channel_capacity: usize,

    /// Claude turn scheduler bounded queue capacity.
    #[serde(default = "d_scheduler_capacity")]
    pub scheduler_queue_capacity: usize,

    /// OpenCode/KiloCode autostart timing.
    #[serde(default = "d_autostart_cleanup_wait_ms")]
    pub autostart_cleanup_wait_ms: u64,
    #[serde(default = "d_autostart_launch_wait_ms")]
    pub autostart_launch_ready_wait_ms: u64,
    #[serde(default = "d_autostart_rate_limit_ms")]
    pub autostart_rate_limit_window_ms: u64,

    /// HTTP transport per-request timeout.
    #[serde(default = "d_http_timeout_ms")]
    pub http_request_timeout_ms: u64,

    /// Turn completion dedup window.
    #[serde(default = "d_dedup_window_ms")]
    pub completion_dedup_window_ms: u64,
    /// Notification queue capacity.
    #[serde(default = "d_notification_queue_capacity")]
    pub notification_queue_capacity: usize,
    /// Minimum notification dispatch timeout.
    #[serde(default = "d_notification_min_timeout_ms")]
    pub notification_min_timeout_ms: u64,

    /// How long the Claude turn executor waits for a fresh item (or the
    /// session exiting) before falling back to `claude_sync_send_completed`.
    #[serde(default = "d_claude_completion_wait_ms")]
    pub claude_completion_wait_ms: u64,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            sessions_dir: d_sessions_dir(),
            debug_ring_max_events: d_debug_max_events(),
            debug_ring_max_bytes: d_debug_max_bytes(),
            log_ring_max_bytes: d_log_ring_max_bytes(),
            subscriber_channel_capacity: d_subscriber_capacity(),
            scheduler_queue_capacity: d_scheduler_capacity(),
            autostart_cleanup_wait_ms: d_autostart_cleanup_wait_ms(),
            autostart_launch_ready_wait_ms: d_autostart_launch_wait_ms(),
            autostart_rate_limit_window_ms: d_autostart_rate_limit_ms(),
            http_request_timeout_ms: d_http_timeout_ms(),
            completion_dedup_window_ms: d_dedup_window_ms(),
            notification_queue_capacity: d_notification_queue_capacity(),
            notification_min_timeout_ms: d_notification_min_timeout_ms(),
            claude_completion_wait_ms: d_claude_completion_wait_ms(),
        }
    }
}

fn d_sessions_dir() -> std::path::PathBuf {
    std::path::PathBuf::from("./data/sessions")
}
fn d_debug_max_events() -> usize {
    2048
}
fn d_debug_max_bytes() -> usize {
    512 * 1024
}
fn d_log_ring_max_bytes() -> usize {
    256 * 1024
}
fn d_subscriber_capacity() -> usize {
    256
}
fn d_scheduler_capacity() -> usize {
    256
}
fn d_autostart_cleanup_wait_ms() -> u64 {
    4_000
}
fn d_autostart_launch_wait_ms() -> u64 {
    6_000
}
fn d_autostart_rate_limit_ms() -> u64 {
    5_000
}
fn d_http_timeout_ms() -> u64 {
    30_000
}
fn d_dedup_window_ms() -> u64 {
    10_000
}
fn d_notification_queue_capacity() -> usize {
    256
}
fn d_notification_min_timeout_ms() -> u64 {
    5_000
}
fn d_claude_completion_wait_ms() -> u64 {
    30_000
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Providers — per-provider base URL/token/command
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProvidersConfig {
    /// Keyed by normalized provider name ("codex", "claude", "opencode",
    /// "kilocode", "gemini").
    #[serde(default)]
    pub entries: HashMap<String, ProviderEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderEntry {
    /// CLI command used to spawn a stdio-transport agent, or to launch
    /// `<cmd> serve ...` for autostart-capable HTTP agents.
    #[serde(default)]
    pub command: Option<String>,
    /// Base URL for HTTP transport providers (OpenCode/KiloCode).
    #[serde(default)]
    pub base_url: Option<String>,
    /// Basic-auth username (defaults to the provider name itself).
    #[serde(default)]
    pub auth_username: Option<String>,
    /// Basic-auth/bearer token.
    #[serde(default)]
    pub token: Option<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Server — thin CLI-layer surface
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "d_port")]
    pub port: u16,
    #[serde(default = "d_host")]
    pub host: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: d_port(),
            host: d_host(),
        }
    }
}

fn d_port() -> u16 {
    4650
}
fn d_host() -> String {
    "127.0.0.1".into()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

#[derive(Debug, Clone)]
pub struct ConfigIssue {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl std::fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

impl Config {
    /// Validate the configuration, returning every issue found. An
    /// empty vec means the config is safe to run with as-is.
    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();

        if self.server.port == 0 {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: "server.port".into(),
                message: "port must be greater than 0".into(),
            });
        }
        if self.server.host.is_empty() {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: "server.host".into(),
                message: "host must not be empty".into(),
            });
        }
        if self.daemon.scheduler_queue_capacity == 0 {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: "daemon.scheduler_queue_capacity".into(),
                message: "must be greater than 0".into(),
            });
        }
        if self.providers.entries.is_empty() {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Warning,
                field: "providers".into(),
                message: "no providers configured — every send/history/approve call will be unsupported".into(),
            });
        }
        for (name, entry) in &self.providers.entries {
            let has_stdio = entry.command.is_some();
            let has_http = entry.base_url.is_some();
            if !has_stdio && !has_http {
                issues.push(ConfigIssue {
                    severity: ConfigSeverity::Error,
                    field: format!("providers.{name}"),
                    message: "must set either command (stdio) or base_url (http)".into(),
                });
            }
            if let Some(base_url) = &entry.base_url {
                if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
                    issues.push(ConfigIssue {
                        severity: ConfigSeverity::Error,
                        field: format!("providers.{name}.base_url"),
                        message: format!("must start with http:// or https:// (got \"{base_url}\")"),
                    });
                }
            }
        }

        issues
    }
}
