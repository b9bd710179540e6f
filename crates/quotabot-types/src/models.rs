use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle state of an account, stored as an integer column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AccountStatus {
    Disabled,
    Trial,
    Quota,
    /// Reserved by the storage format; no transition produces it.
    Both,
}

impl AccountStatus {
    pub fn as_i64(self) -> i64 {
        match self {
            Self::Disabled => 0,
            Self::Trial => 1,
            Self::Quota => 2,
            Self::Both => 3,
        }
    }

    pub fn from_i64(value: i64) -> Option<Self> {
        match value {
            0 => Some(Self::Disabled),
            1 => Some(Self::Trial),
            2 => Some(Self::Quota),
            3 => Some(Self::Both),
            _ => None,
        }
    }
}

impl fmt::Display for AccountStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disabled => "disabled",
            Self::Trial => "trial",
            Self::Quota => "quota",
            Self::Both => "both",
        };
        f.write_str(name)
    }
}

/// One tracked account.
///
/// Upload counters are kibibytes, the unit the ftpd userfiles record.
/// Timestamps are unix seconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub username: String,
    pub group: String,
    pub ratio: i64,
    pub flags: String,
    pub week_files: i64,
    pub week_upload_kib: i64,
    pub day_files: i64,
    pub day_upload_kib: i64,
    pub status: AccountStatus,
    pub passed_trial: bool,
    /// Only meaningful while in Trial or Quota; cleared on Disabled.
    pub days_remaining: Option<i64>,
    pub trial_start: Option<i64>,
    /// Trial length override set by `extend`; `None` means the configured default.
    pub trial_days: Option<i64>,
    pub added: i64,
    pub last_updated: i64,
}

impl Account {
    /// A fresh account with zeroed counters.
    pub fn new(username: impl Into<String>, group: impl Into<String>, added: i64) -> Self {
        Self {
            username: username.into(),
            group: group.into(),
            ratio: 0,
            flags: String::new(),
            week_files: 0,
            week_upload_kib: 0,
            day_files: 0,
            day_upload_kib: 0,
            status: AccountStatus::Quota,
            passed_trial: false,
            days_remaining: None,
            trial_start: None,
            trial_days: None,
            added,
            last_updated: added,
        }
    }

    /// Start of the current trial period, falling back to when the account was added.
    pub fn trial_anchor(&self) -> i64 {
        self.trial_start.unwrap_or(self.added)
    }
}

/// Row of the daily leaderboard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayUploader {
    pub username: String,
    pub day_files: i64,
    pub day_upload_kib: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_are_stable() {
        for status in [
            AccountStatus::Disabled,
            AccountStatus::Trial,
            AccountStatus::Quota,
            AccountStatus::Both,
        ] {
            assert_eq!(AccountStatus::from_i64(status.as_i64()), Some(status));
        }
        assert_eq!(AccountStatus::Trial.as_i64(), 1);
        assert_eq!(AccountStatus::from_i64(9), None);
    }

    #[test]
    fn trial_anchor_falls_back_to_added() {
        let mut account = Account::new("alice", "iND", 1_000);
        assert_eq!(account.trial_anchor(), 1_000);
        account.trial_start = Some(5_000);
        assert_eq!(account.trial_anchor(), 5_000);
    }
}
