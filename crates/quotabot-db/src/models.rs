/// Database row types, mapped straight from SQLite rows.
/// Distinct from quotabot-types models to keep the DB layer independent.
use anyhow::{Result, anyhow};
use quotabot_types::{Account, AccountStatus};

pub struct AccountRow {
    pub username: String,
    pub group_name: String,
    pub ratio: i64,
    pub flags: String,
    pub week_files: i64,
    pub week_upload_kib: i64,
    pub day_files: i64,
    pub day_upload_kib: i64,
    pub status: i64,
    pub passed_trial: bool,
    pub days_remaining: Option<i64>,
    pub trial_start: Option<i64>,
    pub trial_days: Option<i64>,
    pub added: i64,
    pub last_updated: i64,
}

impl AccountRow {
    pub fn into_account(self) -> Result<Account> {
        let status = AccountStatus::from_i64(self.status)
            .ok_or_else(|| anyhow!("Unknown status {} for {}", self.status, self.username))?;

        Ok(Account {
            username: self.username,
            group: self.group_name,
            ratio: self.ratio,
            flags: self.flags,
            week_files: self.week_files,
            week_upload_kib: self.week_upload_kib,
            day_files: self.day_files,
            day_upload_kib: self.day_upload_kib,
            status,
            passed_trial: self.passed_trial,
            days_remaining: self.days_remaining,
            trial_start: self.trial_start,
            trial_days: self.trial_days,
            added: self.added,
            last_updated: self.last_updated,
        })
    }
}

pub struct DayUploaderRow {
    pub username: String,
    pub day_files: i64,
    pub day_upload_kib: i64,
}
