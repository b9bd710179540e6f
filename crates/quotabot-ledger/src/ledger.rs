use std::sync::Arc;

use anyhow::{Result, ensure};
use chrono::{DateTime, FixedOffset};
use quotabot_types::{Account, AccountStatus, DayUploader};
use tracing::{debug, error, info, warn};

use crate::clock::{Clock, MAX_TRIAL_DAYS, days_until_end_of_week, trial_days_remaining};
use crate::config::{LedgerConfig, gib_to_kib};
use crate::locks::AccountLocks;
use crate::report::{self, format_size};
use crate::store::{AccountStore, RecordService};
use crate::userfile::{ImportOptions, ImportSummary, UserFiles};

/// What one evaluation did to an account.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// The account left the evaluated state before its turn came.
    Skipped,
    /// Still inside the period; countdown is now this many days.
    Countdown(i64),
    /// Trial passed, moved to Quota.
    Promoted,
    /// Week passed, Quota restarted.
    RolledOver,
    /// Trial failed and restarted.
    TrialRestarted,
    /// Week failed, moved back to Trial.
    Demoted,
    Disabled,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepSummary {
    pub evaluated: usize,
    pub promoted: usize,
    pub rolled_over: usize,
    pub restarted: usize,
    pub demoted: usize,
    pub disabled: usize,
    pub failed: usize,
}

impl SweepSummary {
    fn record(&mut self, transition: Transition) {
        self.evaluated += 1;
        match transition {
            Transition::Promoted => self.promoted += 1,
            Transition::RolledOver => self.rolled_over += 1,
            Transition::TrialRestarted => self.restarted += 1,
            Transition::Demoted => self.demoted += 1,
            Transition::Disabled => self.disabled += 1,
            Transition::Skipped | Transition::Countdown(_) => {}
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtendOutcome {
    Extended(Account),
    NotInTrial(AccountStatus),
    NotFound,
}

/// Account status storage plus the Trial/Quota/Disabled rules.
pub struct Ledger {
    store: Arc<dyn AccountStore>,
    records: Arc<dyn RecordService>,
    clock: Arc<dyn Clock>,
    config: LedgerConfig,
    locks: AccountLocks,
}

impl Ledger {
    pub fn new(
        store: Arc<dyn AccountStore>,
        records: Arc<dyn RecordService>,
        clock: Arc<dyn Clock>,
        config: LedgerConfig,
    ) -> Self {
        Self {
            store,
            records,
            clock,
            config,
            locks: AccountLocks::new(),
        }
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    pub fn now(&self) -> DateTime<FixedOffset> {
        self.clock.now()
    }

    // -- Sweep --

    /// Re-evaluate every Trial and every Quota account once.
    /// A failure on one account is logged and does not stop the others.
    pub async fn sweep(&self) -> Result<SweepSummary> {
        let mut summary = SweepSummary::default();

        if self.config.trial.enabled {
            for account in self.store.by_status(AccountStatus::Trial)? {
                match self.evaluate_trial(&account.username).await {
                    Ok(t) => summary.record(t),
                    Err(e) => {
                        summary.failed += 1;
                        error!("Trial evaluation failed for {}: {:#}", account.username, e);
                    }
                }
            }
        }

        if self.config.quota.enabled {
            for account in self.store.by_status(AccountStatus::Quota)? {
                match self.evaluate_quota(&account.username).await {
                    Ok(t) => summary.record(t),
                    Err(e) => {
                        summary.failed += 1;
                        error!("Quota evaluation failed for {}: {:#}", account.username, e);
                    }
                }
            }
        }

        Ok(summary)
    }

    /// Apply the trial rules to one account, if it is still in Trial.
    pub async fn evaluate_trial(&self, username: &str) -> Result<Transition> {
        let _guard = self.locks.lock(username).await;
        let Some(mut account) = self.store.get(username)? else {
            return Ok(Transition::Skipped);
        };
        if account.status != AccountStatus::Trial {
            return Ok(Transition::Skipped);
        }

        let now = self.clock.now();
        let policy = &self.config.trial;
        let length = account.trial_days.unwrap_or(policy.days);
        let remaining = trial_days_remaining(account.trial_anchor(), length, now.timestamp());

        if remaining > 0 {
            if account.days_remaining != Some(remaining) {
                account.days_remaining = Some(remaining);
                account.last_updated = now.timestamp();
                self.store.upsert(&account)?;
            }
            debug!("[TRIAL] {} has {} days remaining", username, remaining);
            return Ok(Transition::Countdown(remaining));
        }

        if account.week_upload_kib >= gib_to_kib(policy.quota_gb) {
            account.status = AccountStatus::Quota;
            account.passed_trial = true;
            account.days_remaining = Some(days_until_end_of_week(now));
            account.trial_days = None;
            account.last_updated = now.timestamp();
            self.store.upsert(&account)?;
            info!("[TRIAL] {} passed trial and was promoted to quota", username);
            Ok(Transition::Promoted)
        } else if policy.fail_back_to_trial {
            restart_trial(&mut account, policy.days, now);
            self.store.upsert(&account)?;
            info!("[TRIAL] {} failed trial, trial restarted", username);
            Ok(Transition::TrialRestarted)
        } else {
            self.disable(&mut account, &policy.fail_flags, "Trial failure", now)?;
            Ok(Transition::Disabled)
        }
    }

    /// Apply the weekly quota rules to one account, if it is still in Quota.
    pub async fn evaluate_quota(&self, username: &str) -> Result<Transition> {
        let _guard = self.locks.lock(username).await;
        let Some(mut account) = self.store.get(username)? else {
            return Ok(Transition::Skipped);
        };
        if account.status != AccountStatus::Quota {
            return Ok(Transition::Skipped);
        }

        let now = self.clock.now();
        let days_left = days_until_end_of_week(now);

        if account.days_remaining != Some(days_left) {
            account.days_remaining = Some(days_left);
            account.last_updated = now.timestamp();
            self.store.upsert(&account)?;
            info!("[QUOTA] Corrected days remaining for {} to {}", username, days_left);
        }

        if days_left > 0 {
            debug!("[QUOTA] {} has {} days remaining this week", username, days_left);
            return Ok(Transition::Countdown(days_left));
        }

        let policy = &self.config.quota;
        if account.week_upload_kib >= gib_to_kib(policy.quota_gb) {
            account.status = AccountStatus::Quota;
            account.days_remaining = Some(days_until_end_of_week(now));
            account.last_updated = now.timestamp();
            self.store.upsert(&account)?;
            info!("[QUOTA] {} passed quota and was reset for the next week", username);
            Ok(Transition::RolledOver)
        } else if policy.fail_back_to_trial {
            restart_trial(&mut account, self.config.trial.days, now);
            self.store.upsert(&account)?;
            info!("[QUOTA] {} failed quota and was moved back to trial", username);
            Ok(Transition::Demoted)
        } else {
            self.disable(&mut account, &policy.fail_flags, "Quota failure", now)?;
            Ok(Transition::Disabled)
        }
    }

    /// Flag the userfile, leave a farewell note, then mark the account Disabled.
    /// Record-side failures are logged; the status change still happens.
    fn disable(
        &self,
        account: &mut Account,
        flags: &str,
        reason: &str,
        now: DateTime<FixedOffset>,
    ) -> Result<()> {
        let username = account.username.clone();

        match self.records.append_flags(&username, flags) {
            Ok(()) => info!("[FLAGS] Added delete flag ({}) to {}", flags, username),
            Err(e) => error!("Failed to update FLAGS for {}: {:#}", username, e),
        }

        let stats = format!("Uploaded: {}", format_size(account.week_upload_kib));
        if let Err(e) = self.records.write_farewell(&username, reason, &stats, false) {
            error!("Failed to write farewell file for {}: {:#}", username, e);
        }

        account.status = AccountStatus::Disabled;
        account.passed_trial = false;
        account.days_remaining = None;
        account.last_updated = now.timestamp();
        self.store.upsert(account)?;

        info!("[DISABLED] {} has been disabled ({})", username, reason);
        Ok(())
    }

    // -- Staff control --

    /// Put an account on a fresh default-length trial starting now.
    pub async fn start_trial(&self, username: &str) -> Result<Option<Account>> {
        let _guard = self.locks.lock(username).await;
        let Some(mut account) = self.store.get(username)? else {
            return Ok(None);
        };

        restart_trial(&mut account, self.config.trial.days, self.clock.now());
        self.store.upsert(&account)?;
        info!("[CONTROL] {} moved to trial", username);
        Ok(Some(account))
    }

    /// Move an account straight to Quota, counting down to the end of this week.
    pub async fn promote_to_quota(&self, username: &str) -> Result<Option<Account>> {
        let _guard = self.locks.lock(username).await;
        let Some(mut account) = self.store.get(username)? else {
            return Ok(None);
        };

        let now = self.clock.now();
        account.status = AccountStatus::Quota;
        account.passed_trial = true;
        account.days_remaining = Some(days_until_end_of_week(now));
        account.trial_days = None;
        account.last_updated = now.timestamp();
        self.store.upsert(&account)?;
        info!("[CONTROL] {} moved to quota", username);
        Ok(Some(account))
    }

    /// Restart a trialing account's clock with a `days`-long trial.
    /// Accounts outside Trial are left alone.
    pub async fn extend_trial(&self, username: &str, days: i64) -> Result<ExtendOutcome> {
        ensure!(
            (1..=MAX_TRIAL_DAYS).contains(&days),
            "trial length {} is outside 1..={}",
            days,
            MAX_TRIAL_DAYS
        );
        let _guard = self.locks.lock(username).await;
        let Some(mut account) = self.store.get(username)? else {
            return Ok(ExtendOutcome::NotFound);
        };
        if account.status != AccountStatus::Trial {
            return Ok(ExtendOutcome::NotInTrial(account.status));
        }

        let now = self.clock.now();
        account.trial_start = Some(now.timestamp());
        account.trial_days = Some(days);
        account.days_remaining = Some(days);
        account.last_updated = now.timestamp();
        self.store.upsert(&account)?;
        info!("[CONTROL] {} trial extended to {} days", username, days);
        Ok(ExtendOutcome::Extended(account))
    }

    /// Flag the account's userfile for removal. Ledger status is untouched.
    pub async fn mark_for_deletion(&self, username: &str) -> Result<()> {
        let _guard = self.locks.lock(username).await;
        self.records.append_flags(username, &self.config.delete_flag)?;
        info!("[CONTROL] {} marked for deletion", username);
        Ok(())
    }

    // -- Reports --

    /// Top `limit` Quota and Trial accounts rendered as the status report.
    pub fn status_report(&self, limit: u32) -> Result<Vec<String>> {
        let quota = self.store.top_by_status(AccountStatus::Quota, limit)?;
        let trial = self.store.top_by_status(AccountStatus::Trial, limit)?;
        Ok(report::status_report(&quota, &trial, &self.config, self.clock.now()))
    }

    pub fn top_day_uploaders(&self, limit: u32) -> Result<Vec<DayUploader>> {
        self.store.top_day_uploaders(limit)
    }

    // -- Import --

    /// Sync counters from the userfiles. New accounts start in Quota with a
    /// fresh week; known accounts only get counters and metadata refreshed.
    pub async fn import_userfiles(
        &self,
        files: &UserFiles,
        options: &ImportOptions,
    ) -> Result<ImportSummary> {
        let mut summary = ImportSummary::default();
        let names = files.list()?;
        info!("Found {} user files in {}", names.len(), files.users_dir().display());

        for username in names {
            if options.user_skip.contains(&username) {
                debug!("[SKIP] {}", username);
                summary.skipped += 1;
                continue;
            }

            let record = match files.read(&username) {
                Ok(r) => r,
                Err(e) => {
                    warn!("Failed to read userfile for {}: {:#}", username, e);
                    summary.failed += 1;
                    continue;
                }
            };

            if !options.delete_flag.is_empty() && record.has_flag(&options.delete_flag) {
                let _guard = self.locks.lock(&username).await;
                match self.store.delete(&username) {
                    Ok(true) => {
                        info!("[DB] Removed {} (flagged for deletion)", username);
                        summary.purged += 1;
                    }
                    Ok(false) => summary.skipped += 1,
                    Err(e) => {
                        error!("Failed to remove {}: {:#}", username, e);
                        summary.failed += 1;
                    }
                }
                continue;
            }

            let group = record.group.clone().unwrap_or_else(|| "Unknown".into());
            if options.excluded_groups.contains(&group) {
                debug!("[SKIP] {} is in excluded group {}", username, group);
                summary.skipped += 1;
                continue;
            }

            let _guard = self.locks.lock(&username).await;
            let now = self.clock.now();
            let existing = match self.store.get(&username) {
                Ok(a) => a,
                Err(e) => {
                    error!("Failed to load {}: {:#}", username, e);
                    summary.failed += 1;
                    continue;
                }
            };

            let is_new = existing.is_none();
            let mut account = existing.unwrap_or_else(|| {
                let mut a = Account::new(&username, &group, record.added.unwrap_or(now.timestamp()));
                a.status = AccountStatus::Quota;
                a.days_remaining = Some(days_until_end_of_week(now));
                a
            });

            account.group = group;
            account.ratio = record.ratio;
            account.flags = record.flags;
            account.week_files = record.week_files;
            account.week_upload_kib = record.week_upload_kib;
            account.day_files = record.day_files;
            account.day_upload_kib = record.day_upload_kib;
            if let Some(added) = record.added {
                account.added = added;
            }
            account.last_updated = now.timestamp();

            match self.store.upsert(&account) {
                Ok(()) if is_new => {
                    info!("[DB] Added {} to quota", username);
                    summary.added += 1;
                }
                Ok(()) => summary.refreshed += 1,
                Err(e) => {
                    error!("Failed to store stats for {}: {:#}", username, e);
                    summary.failed += 1;
                }
            }
        }

        Ok(summary)
    }
}

fn restart_trial(account: &mut Account, days: i64, now: DateTime<FixedOffset>) {
    account.status = AccountStatus::Trial;
    account.passed_trial = false;
    account.trial_start = Some(now.timestamp());
    account.trial_days = None;
    account.days_remaining = Some(days);
    account.last_updated = now.timestamp();
}
