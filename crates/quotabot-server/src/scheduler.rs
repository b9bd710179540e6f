use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use quotabot_irc::LinkHandle;
use quotabot_ledger::report::daily_report;
use quotabot_ledger::{ImportOptions, Ledger, UserFiles};

/// A job that runs every `period` until cancelled. The first run happens one
/// period after spawning.
pub struct ScheduledTask {
    name: &'static str,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl ScheduledTask {
    pub fn spawn<F, Fut>(
        name: &'static str,
        period: Duration,
        parent: &CancellationToken,
        mut job: F,
    ) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let cancel = parent.child_token();
        let token = cancel.clone();

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // First tick completes immediately
            interval.tick().await;

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = interval.tick() => {}
                }
                debug!("Running scheduled task {}", name);
                // A run in progress finishes before cancellation is noticed.
                job().await;
            }
            debug!("Scheduled task {} stopped", name);
        });

        info!("Scheduled {} every {}s", name, period.as_secs());
        Self { name, cancel, handle }
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Wait for the task to stop after [`cancel`](Self::cancel).
    pub async fn join(self) {
        if let Err(e) = self.handle.await {
            error!("Scheduled task {} ended abnormally: {}", self.name, e);
        }
    }
}

/// Refresh counters from the userfiles, then run one ledger sweep.
pub async fn run_sweep(ledger: &Ledger, files: &UserFiles, options: &ImportOptions) {
    match ledger.import_userfiles(files, options).await {
        Ok(s) => info!(
            "Import: {} added, {} refreshed, {} purged, {} skipped, {} failed",
            s.added, s.refreshed, s.purged, s.skipped, s.failed
        ),
        Err(e) => error!("Userfile import failed: {:#}", e),
    }

    match ledger.sweep().await {
        Ok(s) => info!(
            "Sweep: {} evaluated, {} promoted, {} rolled over, {} restarted, {} demoted, {} disabled, {} failed",
            s.evaluated, s.promoted, s.rolled_over, s.restarted, s.demoted, s.disabled, s.failed
        ),
        Err(e) => error!("Sweep failed: {:#}", e),
    }
}

pub fn spawn_sweep(
    ledger: Arc<Ledger>,
    files: Arc<UserFiles>,
    options: Arc<ImportOptions>,
    period: Duration,
    parent: &CancellationToken,
) -> ScheduledTask {
    ScheduledTask::spawn("ledger sweep", period, parent, move || {
        let ledger = ledger.clone();
        let files = files.clone();
        let options = options.clone();
        async move { run_sweep(&ledger, &files, &options).await }
    })
}

/// Where and how the daily leaderboard is announced.
#[derive(Debug, Clone)]
pub struct DailyReportTarget {
    pub channels: Vec<String>,
    pub key: String,
    pub limit: u32,
}

/// Broadcast the daily leaderboard. Returns the number of channels it went to.
pub fn send_daily_report(ledger: &Ledger, link: Option<&LinkHandle>, target: &DailyReportTarget) -> usize {
    if target.channels.is_empty() || target.key.is_empty() {
        warn!("Daily report has no announce channels or key configured");
        return 0;
    }

    let uploaders = match ledger.top_day_uploaders(target.limit) {
        Ok(u) => u,
        Err(e) => {
            error!("Failed to load daily uploaders: {:#}", e);
            return 0;
        }
    };
    if uploaders.is_empty() {
        info!("No uploads recorded for the day");
        return 0;
    }

    let Some(link) = link else {
        warn!("Not connected, skipping daily report");
        return 0;
    };

    let lines = daily_report(&uploaders);
    let mut sent = 0;
    for channel in &target.channels {
        let delivered = lines
            .iter()
            .all(|line| match link.send_encrypted(channel, &target.key, line) {
                Ok(()) => true,
                Err(e) => {
                    error!("Failed to send daily report to {}: {}", channel, e);
                    false
                }
            });
        if delivered {
            sent += 1;
        }
    }
    info!("Daily report sent to {} channel(s)", sent);
    sent
}

pub fn spawn_daily_report(
    ledger: Arc<Ledger>,
    link: watch::Receiver<Option<LinkHandle>>,
    target: DailyReportTarget,
    period: Duration,
    parent: &CancellationToken,
) -> ScheduledTask {
    let target = Arc::new(target);
    ScheduledTask::spawn("daily report", period, parent, move || {
        let ledger = ledger.clone();
        let link = link.borrow().clone();
        let target = target.clone();
        async move {
            send_daily_report(&ledger, link.as_ref(), &target);
        }
    })
}
