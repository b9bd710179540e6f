use crate::models::{AccountRow, DayUploaderRow};
use crate::Database;
use anyhow::Result;
use quotabot_types::{Account, AccountStatus, DayUploader};
use rusqlite::{Connection, Row};

const ACCOUNT_COLUMNS: &str = "username, group_name, ratio, flags, week_files, week_upload_kib,
     day_files, day_upload_kib, status, passed_trial, days_remaining, trial_start,
     trial_days, added, last_updated";

impl Database {
    // -- Accounts --

    pub fn get_account(&self, username: &str) -> Result<Option<Account>> {
        self.with_conn(|conn| query_account(conn, username))
    }

    /// Insert or fully overwrite an account keyed by username.
    pub fn upsert_account(&self, account: &Account) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO accounts (username, group_name, ratio, flags, week_files, week_upload_kib,
                     day_files, day_upload_kib, status, passed_trial, days_remaining, trial_start,
                     trial_days, added, last_updated)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
                 ON CONFLICT(username) DO UPDATE SET
                     group_name = excluded.group_name,
                     ratio = excluded.ratio,
                     flags = excluded.flags,
                     week_files = excluded.week_files,
                     week_upload_kib = excluded.week_upload_kib,
                     day_files = excluded.day_files,
                     day_upload_kib = excluded.day_upload_kib,
                     status = excluded.status,
                     passed_trial = excluded.passed_trial,
                     days_remaining = excluded.days_remaining,
                     trial_start = excluded.trial_start,
                     trial_days = excluded.trial_days,
                     added = excluded.added,
                     last_updated = excluded.last_updated",
                rusqlite::params![
                    account.username,
                    account.group,
                    account.ratio,
                    account.flags,
                    account.week_files,
                    account.week_upload_kib,
                    account.day_files,
                    account.day_upload_kib,
                    account.status.as_i64(),
                    account.passed_trial,
                    account.days_remaining,
                    account.trial_start,
                    account.trial_days,
                    account.added,
                    account.last_updated,
                ],
            )?;
            Ok(())
        })
    }

    /// Returns whether a row was removed.
    pub fn delete_account(&self, username: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let removed = conn.execute("DELETE FROM accounts WHERE username = ?1", [username])?;
            Ok(removed > 0)
        })
    }

    pub fn accounts_by_status(&self, status: AccountStatus) -> Result<Vec<Account>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM accounts WHERE status = ?1 ORDER BY username",
                ACCOUNT_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([status.as_i64()], account_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows.into_iter().map(AccountRow::into_account).collect()
        })
    }

    /// Accounts in `status`, heaviest weekly uploaders first.
    pub fn top_by_status(&self, status: AccountStatus, limit: u32) -> Result<Vec<Account>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM accounts WHERE status = ?1
                 ORDER BY week_upload_kib DESC, username
                 LIMIT ?2",
                ACCOUNT_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(rusqlite::params![status.as_i64(), limit], account_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows.into_iter().map(AccountRow::into_account).collect()
        })
    }

    // -- Daily leaderboard --

    /// Accounts that uploaded anything today, heaviest first.
    pub fn top_day_uploaders(&self, limit: u32) -> Result<Vec<DayUploader>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT username, day_files, day_upload_kib FROM accounts
                 WHERE day_upload_kib > 0
                 ORDER BY day_upload_kib DESC, username
                 LIMIT ?1",
            )?;
            let rows = stmt
                .query_map([limit], |row| {
                    Ok(DayUploaderRow {
                        username: row.get(0)?,
                        day_files: row.get(1)?,
                        day_upload_kib: row.get(2)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows
                .into_iter()
                .map(|r| DayUploader {
                    username: r.username,
                    day_files: r.day_files,
                    day_upload_kib: r.day_upload_kib,
                })
                .collect())
        })
    }
}

fn account_row(row: &Row<'_>) -> rusqlite::Result<AccountRow> {
    Ok(AccountRow {
        username: row.get(0)?,
        group_name: row.get(1)?,
        ratio: row.get(2)?,
        flags: row.get(3)?,
        week_files: row.get(4)?,
        week_upload_kib: row.get(5)?,
        day_files: row.get(6)?,
        day_upload_kib: row.get(7)?,
        status: row.get(8)?,
        passed_trial: row.get(9)?,
        days_remaining: row.get(10)?,
        trial_start: row.get(11)?,
        trial_days: row.get(12)?,
        added: row.get(13)?,
        last_updated: row.get(14)?,
    })
}

fn query_account(conn: &Connection, username: &str) -> Result<Option<Account>> {
    let sql = format!("SELECT {} FROM accounts WHERE username = ?1", ACCOUNT_COLUMNS);
    let mut stmt = conn.prepare(&sql)?;

    let row = stmt.query_row([username], account_row).optional()?;

    row.map(AccountRow::into_account).transpose()
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account(name: &str, status: AccountStatus, week_kib: i64) -> Account {
        let mut a = Account::new(name, "iND", 1_700_000_000);
        a.status = status;
        a.week_upload_kib = week_kib;
        a
    }

    #[test]
    fn upsert_then_get() {
        let db = Database::open_in_memory().unwrap();
        let mut a = account("alice", AccountStatus::Trial, 10);
        a.trial_start = Some(1_700_000_500);
        a.days_remaining = Some(7);
        db.upsert_account(&a).unwrap();

        assert_eq!(db.get_account("alice").unwrap(), Some(a.clone()));

        a.days_remaining = None;
        a.status = AccountStatus::Disabled;
        db.upsert_account(&a).unwrap();
        let stored = db.get_account("alice").unwrap().unwrap();
        assert_eq!(stored.status, AccountStatus::Disabled);
        assert_eq!(stored.days_remaining, None);
    }

    #[test]
    fn missing_account_is_none() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.get_account("nobody").unwrap().is_none());
        assert!(!db.delete_account("nobody").unwrap());
    }

    #[test]
    fn top_by_status_orders_and_limits() {
        let db = Database::open_in_memory().unwrap();
        db.upsert_account(&account("a", AccountStatus::Quota, 100)).unwrap();
        db.upsert_account(&account("b", AccountStatus::Quota, 300)).unwrap();
        db.upsert_account(&account("c", AccountStatus::Quota, 200)).unwrap();
        db.upsert_account(&account("d", AccountStatus::Trial, 999)).unwrap();

        let top: Vec<String> = db
            .top_by_status(AccountStatus::Quota, 2)
            .unwrap()
            .into_iter()
            .map(|a| a.username)
            .collect();
        assert_eq!(top, vec!["b", "c"]);

        assert_eq!(db.accounts_by_status(AccountStatus::Trial).unwrap().len(), 1);
    }

    #[test]
    fn day_uploaders_skip_idle_accounts() {
        let db = Database::open_in_memory().unwrap();
        let mut busy = account("busy", AccountStatus::Quota, 0);
        busy.day_upload_kib = 2048;
        busy.day_files = 4;
        db.upsert_account(&busy).unwrap();
        db.upsert_account(&account("idle", AccountStatus::Quota, 0)).unwrap();

        let top = db.top_day_uploaders(10).unwrap();
        assert_eq!(top.len(), 1);
        assert_eq!(top[0].username, "busy");
        assert_eq!(top[0].day_files, 4);
    }

    #[test]
    fn delete_removes_row() {
        let db = Database::open_in_memory().unwrap();
        db.upsert_account(&account("gone", AccountStatus::Quota, 0)).unwrap();
        assert!(db.delete_account("gone").unwrap());
        assert!(db.get_account("gone").unwrap().is_none());
    }
}
