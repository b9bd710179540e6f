//! Chat-ready report lines. Formatting uses mIRC control codes:
//! `\x02` bold, `\x03NN` colour, `\x0F` reset.

use chrono::{DateTime, FixedOffset};
use quotabot_types::{Account, DayUploader};

use crate::clock::{time_remaining_text, trial_days_remaining};
use crate::config::{LedgerConfig, gib_to_kib};

const BOLD: &str = "\x02";
const RESET: &str = "\x0F";
const GREEN: &str = "\x0303";
const RED: &str = "\x0304";

/// Human-readable size for a KiB counter.
pub fn format_size(kib: i64) -> String {
    let bytes = kib as f64 * 1024.0;
    const KB: f64 = 1024.0;
    const MB: f64 = KB * 1024.0;
    const GB: f64 = MB * 1024.0;
    const TB: f64 = GB * 1024.0;

    if bytes >= TB {
        format!("{:.1}TB", bytes / TB)
    } else if bytes >= GB {
        format!("{:.1}GB", bytes / GB)
    } else if bytes >= MB {
        format!("{:.1}MB", bytes / MB)
    } else {
        format!("{:.1}KB", bytes / KB)
    }
}

/// Response to the status query: quota block, blank line, trial block.
pub fn status_report(
    quota: &[Account],
    trial: &[Account],
    config: &LedgerConfig,
    now: DateTime<FixedOffset>,
) -> Vec<String> {
    let mut lines = Vec::with_capacity(quota.len() + trial.len() + 3);

    let quota_min = gib_to_kib(config.quota.quota_gb);
    lines.push(format!(
        "{b}WEEKLY QUOTA:{b} [ {} Users - {} Remaining - (Min {b}{}GB{b}) ]",
        quota.len(),
        time_remaining_text(now),
        config.quota.quota_gb,
        b = BOLD,
    ));
    for (i, account) in quota.iter().enumerate() {
        lines.push(format!(
            "{} {}/{} ( {b}{} Up{b} ) is currently {}.",
            rank(i, account.week_upload_kib >= quota_min),
            account.username,
            account.group,
            format_size(account.week_upload_kib),
            verdict(account.week_upload_kib >= quota_min),
            b = BOLD,
        ));
    }

    lines.push(String::new());

    let trial_min = gib_to_kib(config.trial.quota_gb);
    lines.push(format!(
        "{b}TRIAL QUOTA:{b} [ Trial List - {} Trialing - (Min {b}{}GB{b}) ]",
        trial.len(),
        config.trial.quota_gb,
        b = BOLD,
    ));
    for (i, account) in trial.iter().enumerate() {
        let passing = account.week_upload_kib >= trial_min;
        let days_left = trial_days_remaining(
            account.trial_anchor(),
            account.trial_days.unwrap_or(config.trial.days),
            now.timestamp(),
        );
        lines.push(format!(
            "{} {}/trial ( {b}{} Up{b} ) is currently {}. ({} Days Remaining)",
            rank(i, passing),
            account.username,
            format_size(account.week_upload_kib),
            verdict(passing),
            days_left,
            b = BOLD,
        ));
    }

    lines
}

/// Daily leaderboard with a trailing totals row.
pub fn daily_report(uploaders: &[DayUploader]) -> Vec<String> {
    let mut lines = Vec::with_capacity(uploaders.len() + 2);

    lines.push(format!(
        "{b}\x0310TOP UPLOADERS FOR THE DAY{b}\x03: [ {b}{}{b} Users ]",
        uploaders.len(),
        b = BOLD,
    ));

    let mut total_files = 0;
    let mut total_kib = 0;
    for (i, u) in uploaders.iter().enumerate() {
        total_files += u.day_files;
        total_kib += u.day_upload_kib;
        lines.push(format!(
            "[ {b}\x0306{:02}{b}\x03 ] {b}{}{b} - ({b}{}{b} Files) - ({b}{}{b})",
            i + 1,
            u.username,
            u.day_files,
            format_size(u.day_upload_kib),
            b = BOLD,
        ));
    }

    lines.push(format!(
        "{b}\x0310TOTAL UPLOADS FOR THE DAY{b}\x03: ( {b}{}{b} Files ) - ( {b}{}{b} )",
        total_files,
        format_size(total_kib),
        b = BOLD,
    ));

    lines
}

fn rank(index: usize, passing: bool) -> String {
    let colour = if passing { GREEN } else { RED };
    format!("[ {}{:02}{} ]", colour, index + 1, RESET)
}

fn verdict(passing: bool) -> String {
    if passing {
        format!("{}{b}PASSING{b}{}", GREEN, RESET, b = BOLD)
    } else {
        format!("{}{b}FAILING{b}{}", RED, RESET, b = BOLD)
    }
}

/// Drop mIRC formatting codes, leaving the visible text.
pub fn strip_formatting(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut chars = line.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\x02' | '\x0F' | '\x1D' | '\x1F' | '\x16' => {}
            '\x03' => {
                for _ in 0..2 {
                    if chars.peek().is_some_and(|c| c.is_ascii_digit()) {
                        chars.next();
                    }
                }
            }
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use quotabot_types::AccountStatus;

    fn now() -> DateTime<FixedOffset> {
        DateTime::parse_from_rfc3339("2026-10-14T12:00:00+00:00").unwrap()
    }

    fn account(name: &str, group: &str, kib: i64, status: AccountStatus) -> Account {
        let mut a = Account::new(name, group, now().timestamp());
        a.status = status;
        a.week_upload_kib = kib;
        a
    }

    #[test]
    fn sizes() {
        assert_eq!(format_size(512), "512.0KB");
        assert_eq!(format_size(1536), "1.5MB");
        assert_eq!(format_size(3 * 1024 * 1024), "3.0GB");
        assert_eq!(format_size(2 * 1024 * 1024 * 1024), "2.0TB");
        assert_eq!(format_size(0), "0.0KB");
    }

    #[test]
    fn status_report_layout() {
        let config = LedgerConfig::default();
        let quota = vec![
            account("alice", "iND", 60 * 1024 * 1024, AccountStatus::Quota),
            account("bob", "SiTE", 1024, AccountStatus::Quota),
        ];
        let mut newbie = account("carol", "iND", 0, AccountStatus::Trial);
        newbie.trial_start = Some(now().timestamp() - 2 * 86_400);
        let trial = vec![newbie];

        let lines: Vec<String> = status_report(&quota, &trial, &config, now())
            .iter()
            .map(|l| strip_formatting(l))
            .collect();

        assert_eq!(
            lines,
            vec![
                "WEEKLY QUOTA: [ 2 Users - 4 days, 11 hours, 59 minutes Remaining - (Min 50GB) ]",
                "[ 01 ] alice/iND ( 60.0GB Up ) is currently PASSING.",
                "[ 02 ] bob/SiTE ( 1.0MB Up ) is currently FAILING.",
                "",
                "TRIAL QUOTA: [ Trial List - 1 Trialing - (Min 25GB) ]",
                "[ 01 ] carol/trial ( 0.0KB Up ) is currently FAILING. (5 Days Remaining)",
            ]
        );
    }

    #[test]
    fn passing_rows_are_green() {
        let config = LedgerConfig::default();
        let quota = vec![account("alice", "iND", 60 * 1024 * 1024, AccountStatus::Quota)];
        let lines = status_report(&quota, &[], &config, now());
        assert!(lines[1].starts_with("[ \x030301\x0F ]"));
        assert!(lines[1].contains("\x0303\x02PASSING\x02\x0F"));
    }

    #[test]
    fn daily_report_totals() {
        let uploaders = vec![
            DayUploader { username: "alice".into(), day_files: 10, day_upload_kib: 2 * 1024 * 1024 },
            DayUploader { username: "bob".into(), day_files: 3, day_upload_kib: 512 * 1024 },
        ];
        let lines: Vec<String> = daily_report(&uploaders).iter().map(|l| strip_formatting(l)).collect();
        assert_eq!(
            lines,
            vec![
                "TOP UPLOADERS FOR THE DAY: [ 2 Users ]",
                "[ 01 ] alice - (10 Files) - (2.0GB)",
                "[ 02 ] bob - (3 Files) - (512.0MB)",
                "TOTAL UPLOADS FOR THE DAY: ( 13 Files ) - ( 2.5GB )",
            ]
        );
    }
}
