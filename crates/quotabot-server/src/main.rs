mod config;
mod router;
mod scheduler;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use quotabot_db::Database;
use quotabot_irc::{InboundMessage, LinkConfig, LinkHandle, join_all, register};
use quotabot_ledger::{Ledger, SystemClock, UserFiles};

use crate::config::Config;
use crate::router::CommandRouter;
use crate::scheduler::{DailyReportTarget, spawn_daily_report, spawn_sweep};

/// Used when `RUST_LOG` is unset.
const DEFAULT_LOG_FILTER: &str = "quotabot=info,quotabot_ledger=info,quotabot_irc=info,quotabot_db=info";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into()),
        )
        .init();

    // Config
    let config_path: PathBuf = std::env::var("QUOTABOT_CONFIG")
        .unwrap_or_else(|_| "config.json".into())
        .into();
    let mut config = match Config::load(&config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("FATAL: {}", e);
            eprintln!("       Fix {} and restart.", config_path.display());
            std::process::exit(1);
        }
    };
    if let Ok(db_path) = std::env::var("QUOTABOT_DB_PATH") {
        config.paths.database = db_path.into();
    }
    info!("Configuration validation passed");

    // Ledger
    let db = Arc::new(Database::open(&config.paths.database)?);
    let files = Arc::new(UserFiles::new(&config.paths.users_dir, &config.paths.bye_dir));
    let ledger = Arc::new(Ledger::new(
        db,
        files.clone(),
        Arc::new(SystemClock),
        config.ledger_config(),
    ));
    let options = Arc::new(config.import_options());

    match ledger.import_userfiles(&files, &options).await {
        Ok(s) => info!(
            "Initial import: {} added, {} refreshed, {} purged",
            s.added, s.refreshed, s.purged
        ),
        Err(e) => error!("Initial import failed: {:#}", e),
    }

    // Scheduled tasks
    let shutdown = CancellationToken::new();
    let (link_tx, link_rx) = watch::channel(None::<LinkHandle>);

    let mut tasks = vec![spawn_sweep(
        ledger.clone(),
        files,
        options,
        Duration::from_secs(config.sweep_interval_secs),
        &shutdown,
    )];

    if let (true, Some(key)) = (config.daily_report.enabled, &config.daily_report.key) {
        tasks.push(spawn_daily_report(
            ledger.clone(),
            link_rx,
            DailyReportTarget {
                channels: config.daily_report.channels.clone(),
                key: key.clone(),
                limit: config.daily_report.limit,
            },
            Duration::from_secs(config.daily_report.interval_secs),
            &shutdown,
        ));
    } else {
        info!("Daily report is disabled");
    }

    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            shutdown_signal().await;
            shutdown.cancel();
        }
    });

    // Connection
    let router = Arc::new(CommandRouter::new(ledger, &config));
    run_link(&config, router, &link_tx, &shutdown).await;

    for task in &tasks {
        task.cancel();
    }
    for task in tasks {
        task.join().await;
    }

    info!("Shutdown complete");
    Ok(())
}

/// Keep a connection up until shutdown, reconnecting after every drop.
async fn run_link(
    config: &Config,
    router: Arc<CommandRouter>,
    link_tx: &watch::Sender<Option<LinkHandle>>,
    shutdown: &CancellationToken,
) {
    let link_config = config.link_config();
    let channels = config.join_channels();
    let reconnect = Duration::from_secs(config.server.reconnect_secs);

    loop {
        match session(&link_config, &channels, router.clone(), link_tx, shutdown).await {
            Ok(()) => break,
            Err(e) => warn!("Connection lost: {:#}", e),
        }
        link_tx.send_replace(None);

        info!("Reconnecting in {}s", reconnect.as_secs());
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep(reconnect) => {}
        }
    }

    link_tx.send_replace(None);
}

/// One connection from connect to disconnect. `Ok` only on shutdown.
async fn session(
    link_config: &LinkConfig,
    channels: &[&str],
    router: Arc<CommandRouter>,
    link_tx: &watch::Sender<Option<LinkHandle>>,
    shutdown: &CancellationToken,
) -> anyhow::Result<()> {
    let link = quotabot_irc::connect(link_config).await?;
    let handle = link.handle();
    register(&handle, link_config)?;
    join_all(&handle, channels.iter().copied())?;
    link_tx.send_replace(Some(handle.clone()));
    info!("Connected to IRC as {}", link_config.nickname);

    // Commands run off the read loop; keepalive replies never wait on them.
    let (tx, mut rx) = mpsc::unbounded_channel::<InboundMessage>();
    let dispatch = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            router.handle_message(&handle, &msg).await;
        }
    });

    let result = link.run(tx, shutdown.clone()).await;

    if let Err(e) = dispatch.await {
        error!("Command dispatch ended abnormally: {}", e);
    }
    result
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => tokio::select! {
                _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
                _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
            },
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                ctrl_c.await.ok();
                info!("Received Ctrl+C, shutting down...");
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received Ctrl+C, shutting down...");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_log_filter_covers_logging_crates() {
        assert!(tracing_subscriber::EnvFilter::try_new(DEFAULT_LOG_FILTER).is_ok());
        for target in ["quotabot=", "quotabot_ledger=", "quotabot_irc=", "quotabot_db="] {
            assert!(DEFAULT_LOG_FILTER.contains(target), "missing {}", target);
        }
    }
}
