use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use agentd_domain::config::{Config, ConfigSeverity};
use agentd_gateway::wiring::{self, Persistence};

/// agentd — an AI-coding-agent control daemon.
#[derive(Debug, Parser)]
#[command(name = "agentd", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Start the daemon (default when no subcommand is given).
    Serve,
    /// Print version information.
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        None | Some(Command::Serve) => {
            init_tracing();
            let config = load_config()?;
            run_daemon(config).await
        }
        Some(Command::Version) => {
            println!("agentd {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,agentd_gateway=debug")))
        .json()
        .init();
}

fn load_config() -> anyhow::Result<Config> {
    let config_path = std::env::var("AGENTD_CONFIG").unwrap_or_else(|_| "agentd.toml".into());
    if std::path::Path::new(&config_path).exists() {
        let raw = std::fs::read_to_string(&config_path)
            .map_err(|e| anyhow::anyhow!("reading {config_path}: {e}"))?;
        toml::from_str(&raw).map_err(|e| anyhow::anyhow!("parsing {config_path}: {e}"))
    } else {
        Ok(Config::default())
    }
}

async fn run_daemon(config: Config) -> anyhow::Result<()> {
    tracing::info!("agentd starting");

    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
        anyhow::bail!(
            "config validation failed with {} error(s)",
            issues.iter().filter(|i| i.severity == ConfigSeverity::Error).count()
        );
    }

    let state_dir = config.daemon.sessions_dir.clone();
    let daemon = wiring::build(config.clone(), Persistence::File(state_dir))?;
    daemon.sessions.reconcile_on_startup().await?;
    tracing::info!(port = config.server.port, host = %config.server.host, "agentd ready");

    let router = axum::Router::new().route("/healthz", axum::routing::get(|| async { "ok" }));
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "listening");
    axum::serve(listener, router).await?;

    drop(daemon);
    Ok(())
}
