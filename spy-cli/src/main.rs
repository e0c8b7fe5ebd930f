//! redis-spy: watch a redis instance's `MONITOR` stream while tracking
//! whether this process holds leadership.
//!
//! Startup order: configuration, election, monitor session. The session ends
//! when the stream closes, a read fails, or on SIGINT/SIGTERM; the election
//! is stopped afterwards.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use spy_core::{NetAddr, NetAddrList, NodeState, SpyConfig};
use spy_leader::Election;
use spy_monitor::{MonitorClient, SessionReport};
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Command-line arguments for redis-spy.
#[derive(Parser, Debug)]
#[command(
    name = "redis-spy",
    version,
    about = "Leader-aware observer of a redis instance's live command stream"
)]
struct Cli {
    /// JSON configuration file. Flags override its values.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Redis address to monitor, e.g. 127.0.0.1:6379
    #[arg(long, alias = "redisAddr")]
    redis_addr: Option<NetAddr>,

    /// Address the election listens on
    #[arg(long, alias = "raftBindAddr")]
    raft_bind_addr: Option<NetAddr>,

    /// Directory for election state
    #[arg(long, alias = "raftDataDir")]
    raft_data_dir: Option<PathBuf>,

    /// Comma-separated election peers: host:port,host:port,...
    #[arg(long, alias = "raftPeers")]
    raft_peers: Option<NetAddrList>,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

impl Cli {
    /// Configuration file first, then flag overrides, then validation.
    fn resolve_config(&self) -> Result<SpyConfig> {
        let mut config = match &self.config {
            Some(path) => SpyConfig::from_json_file(path)
                .with_context(|| format!("loading configuration from {}", path.display()))?,
            None => SpyConfig::default(),
        };

        if let Some(addr) = &self.redis_addr {
            config = config.with_redis_addr(addr.clone());
        }
        if let Some(addr) = &self.raft_bind_addr {
            config = config.with_raft_bind_addr(addr.clone());
        }
        if let Some(dir) = &self.raft_data_dir {
            config = config.with_raft_data_dir(dir);
        }
        if let Some(peers) = &self.raft_peers {
            config = config.with_raft_peers(peers.clone());
        }

        config.validate().context("invalid configuration")?;
        Ok(config)
    }
}

fn init_logging(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match format {
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_format);

    let config = cli.resolve_config()?;
    info!(
        "Observing redis at {}; election on {} with {} peer(s), data in {}",
        config.redis_addr,
        config.raft_bind_addr,
        config.raft_peers.len(),
        config.raft_data_dir.display()
    );

    let election = Arc::new(
        Election::new(&config)
            .await
            .context("creating election")?,
    );
    let mut notifications = election
        .take_notifications()
        .context("election notifications already taken")?;
    Arc::clone(&election)
        .start()
        .await
        .context("starting election")?;

    let outcome = monitor(&config, &mut notifications).await;

    if let Err(e) = election.stop().await {
        warn!("Failed to stop election cleanly: {}", e);
    }

    let report = outcome?;
    info!(
        "Session {} finished: {} command(s), leader: {}, {} leadership update(s) applied, {} ignored ({})",
        report.session,
        report.lines_observed,
        report.is_leader,
        report.leadership_applied,
        report.leadership_ignored,
        report.termination
    );

    Ok(())
}

async fn monitor(
    config: &SpyConfig,
    notifications: &mut mpsc::Receiver<NodeState>,
) -> Result<SessionReport> {
    let mut client = MonitorClient::new(config);
    client
        .connect(&config.redis_addr)
        .await
        .with_context(|| format!("connecting to redis at {}", config.redis_addr))?;
    client.send_subscribe_request().await;

    if let Some(terminator) = client.terminator() {
        tokio::spawn(async move {
            shutdown_signal().await;
            terminator.terminate("shutdown signal");
        });
    }

    let report = client.run(notifications).await?;
    Ok(report)
}

/// Wait for SIGTERM or SIGINT (Ctrl+C).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}
