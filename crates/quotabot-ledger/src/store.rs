use anyhow::Result;
use quotabot_db::Database;
use quotabot_types::{Account, AccountStatus, DayUploader};

/// Persistence the ledger reads and writes accounts through.
pub trait AccountStore: Send + Sync {
    fn get(&self, username: &str) -> Result<Option<Account>>;
    fn upsert(&self, account: &Account) -> Result<()>;
    fn delete(&self, username: &str) -> Result<bool>;
    fn by_status(&self, status: AccountStatus) -> Result<Vec<Account>>;
    /// Heaviest weekly uploaders in `status` first.
    fn top_by_status(&self, status: AccountStatus, limit: u32) -> Result<Vec<Account>>;
    fn top_day_uploaders(&self, limit: u32) -> Result<Vec<DayUploader>>;
}

impl AccountStore for Database {
    fn get(&self, username: &str) -> Result<Option<Account>> {
        self.get_account(username)
    }

    fn upsert(&self, account: &Account) -> Result<()> {
        self.upsert_account(account)
    }

    fn delete(&self, username: &str) -> Result<bool> {
        self.delete_account(username)
    }

    fn by_status(&self, status: AccountStatus) -> Result<Vec<Account>> {
        self.accounts_by_status(status)
    }

    fn top_by_status(&self, status: AccountStatus, limit: u32) -> Result<Vec<Account>> {
        Database::top_by_status(self, status, limit)
    }

    fn top_day_uploaders(&self, limit: u32) -> Result<Vec<DayUploader>> {
        Database::top_day_uploaders(self, limit)
    }
}

/// The ftpd's own account records, edited out-of-band from the database.
pub trait RecordService: Send + Sync {
    /// Prepend `flags` to the account's FLAGS line.
    fn append_flags(&self, username: &str, flags: &str) -> Result<()>;

    /// Leave a farewell note for a removed account.
    fn write_farewell(
        &self,
        username: &str,
        reason: &str,
        stats: &str,
        policy_failure: bool,
    ) -> Result<()>;
}
