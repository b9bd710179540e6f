use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);"
    )?;

    let version: i64 = conn
        .query_row("SELECT COALESCE(MAX(version), 0) FROM schema_version", [], |r| r.get(0))?;

    if version < 1 {
        info!("Running migration v1 (accounts)");
        conn.execute_batch(
            "
            CREATE TABLE accounts (
                username         TEXT PRIMARY KEY,
                group_name       TEXT NOT NULL DEFAULT 'Unknown',
                ratio            INTEGER NOT NULL DEFAULT 0,
                flags            TEXT NOT NULL DEFAULT '',
                week_files       INTEGER NOT NULL DEFAULT 0,
                week_upload_kib  INTEGER NOT NULL DEFAULT 0,
                day_files        INTEGER NOT NULL DEFAULT 0,
                day_upload_kib   INTEGER NOT NULL DEFAULT 0,
                status           INTEGER NOT NULL DEFAULT 2,
                passed_trial     INTEGER NOT NULL DEFAULT 0,
                days_remaining   INTEGER,
                trial_start      INTEGER,
                trial_days       INTEGER,
                added            INTEGER NOT NULL,
                last_updated     INTEGER NOT NULL
            );

            CREATE INDEX idx_accounts_status_week
                ON accounts(status, week_upload_kib DESC);

            CREATE INDEX idx_accounts_day
                ON accounts(day_upload_kib DESC);

            INSERT INTO schema_version (version) VALUES (1);
            "
        )?;
    }

    Ok(())
}
