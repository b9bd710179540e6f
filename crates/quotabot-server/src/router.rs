use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use quotabot_crypto::MARKER;
use quotabot_irc::{ChannelKeys, InboundMessage, LinkHandle};
use quotabot_ledger::{ExtendOutcome, Ledger, MAX_TRIAL_DAYS};

use crate::config::Config;

const REFUSAL: &str = "This command is not allowed in this channel.";
const INVALID_VERB: &str = "Invalid command. Use \"trial\", \"quota\", \"extend\", or \"delete\".";
const INVALID_DAYS: &str = "Invalid number of days.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Top Quota and Trial accounts.
    Status,
    Control(Control),
}

/// `<trigger> <verb> <username> [<arg>]`, already validated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Control {
    Trial { username: String },
    Quota { username: String },
    Extend { username: String, days: i64 },
    Delete { username: String },
    /// Missing username.
    Usage,
    UnknownVerb,
    InvalidDays,
}

/// Recognise a decrypted line. `None` means it is not addressed to the bot.
pub fn parse_command(text: &str, status_trigger: &str, control_trigger: &str) -> Option<Command> {
    let text = text.trim();
    if text == status_trigger {
        return Some(Command::Status);
    }

    let mut parts = text.split_whitespace();
    if parts.next() != Some(control_trigger) {
        return None;
    }
    let verb = parts.next();
    let Some(username) = parts.next().map(str::to_string) else {
        return Some(Command::Control(Control::Usage));
    };
    let arg = parts.next();

    let control = match verb {
        Some("trial") => Control::Trial { username },
        Some("quota") => Control::Quota { username },
        Some("extend") => match arg.and_then(|a| a.parse::<i64>().ok()) {
            Some(days) if (1..=MAX_TRIAL_DAYS).contains(&days) => Control::Extend { username, days },
            _ => Control::InvalidDays,
        },
        Some("delete") => Control::Delete { username },
        _ => Control::UnknownVerb,
    };
    Some(Command::Control(control))
}

/// Decrypts channel traffic, authorises it and runs the matching command.
pub struct CommandRouter {
    ledger: Arc<Ledger>,
    keys: ChannelKeys,
    staff_users: HashSet<String>,
    status_trigger: String,
    control_trigger: String,
    top_limit: u32,
}

impl CommandRouter {
    pub fn new(ledger: Arc<Ledger>, config: &Config) -> Self {
        Self {
            ledger,
            keys: config.channel_keys(),
            staff_users: config.staff.users.iter().cloned().collect(),
            status_trigger: config.commands.status_trigger.clone(),
            control_trigger: config.commands.control_trigger.clone(),
            top_limit: config.commands.top_limit,
        }
    }

    /// Handle one inbound channel line. Never fails: every problem is
    /// logged here and at most answered in the channel.
    pub async fn handle_message(&self, out: &LinkHandle, msg: &InboundMessage) {
        let Some(key) = self.keys.resolve(&msg.channel) else {
            warn!("No key for channel {}, dropping message from {}", msg.channel, msg.sender);
            return;
        };

        if !msg.text.starts_with(MARKER) {
            debug!("Ignoring unencrypted line in {} from {}", msg.channel, msg.sender);
            return;
        }

        let text = match quotabot_crypto::decode(&msg.text, key) {
            Ok(text) => text,
            Err(e) => {
                warn!("Failed to decrypt message in {} from {}: {}", msg.channel, msg.sender, e);
                return;
            }
        };

        let Some(command) = parse_command(&text, &self.status_trigger, &self.control_trigger)
        else {
            return;
        };

        let is_staff_channel = self.keys.is_staff(&msg.channel);
        if !self.keys.is_monitored(&msg.channel) && !is_staff_channel {
            warn!("Command issued in unauthorized channel {} by {}", msg.channel, msg.sender);
            self.reply(out, &msg.channel, key, REFUSAL);
            return;
        }

        match command {
            Command::Status => self.status(out, &msg.channel, key),
            Command::Control(control) => {
                if !is_staff_channel || !self.staff_users.contains(&msg.sender) {
                    debug!("Ignoring control command from {} in {}", msg.sender, msg.channel);
                    return;
                }
                self.control(out, &msg.channel, key, &msg.sender, control).await;
            }
        }
    }

    fn status(&self, out: &LinkHandle, channel: &str, key: &str) {
        match self.ledger.status_report(self.top_limit) {
            Ok(lines) => {
                for line in &lines {
                    self.reply(out, channel, key, line);
                }
                info!("Status report sent to {}", channel);
            }
            Err(e) => error!("Failed to build status report for {}: {:#}", channel, e),
        }
    }

    async fn control(&self, out: &LinkHandle, channel: &str, key: &str, sender: &str, control: Control) {
        let reply = match control {
            Control::Usage => Some(format!(
                "Usage: {} <trial|quota|extend|delete> <username> [<days>]",
                self.control_trigger
            )),
            Control::UnknownVerb => Some(INVALID_VERB.to_string()),
            Control::InvalidDays => Some(INVALID_DAYS.to_string()),
            Control::Trial { username } => {
                info!("{} requested trial for {}", sender, username);
                match self.ledger.start_trial(&username).await {
                    Ok(Some(account)) => Some(format!(
                        "User {} updated to trial starting {} ({} days).",
                        username,
                        self.ledger.now().format("%Y-%m-%d %H:%M"),
                        account.days_remaining.unwrap_or(self.ledger.config().trial.days),
                    )),
                    Ok(None) => Some(not_found(&username)),
                    Err(e) => {
                        error!("Failed to move {} to trial: {:#}", username, e);
                        None
                    }
                }
            }
            Control::Quota { username } => {
                info!("{} requested quota for {}", sender, username);
                match self.ledger.promote_to_quota(&username).await {
                    Ok(Some(account)) => Some(format!(
                        "User {} updated to quota ({} days left this week).",
                        username,
                        account.days_remaining.unwrap_or(0),
                    )),
                    Ok(None) => Some(not_found(&username)),
                    Err(e) => {
                        error!("Failed to move {} to quota: {:#}", username, e);
                        None
                    }
                }
            }
            Control::Extend { username, days } => {
                info!("{} requested a {} day trial for {}", sender, days, username);
                match self.ledger.extend_trial(&username, days).await {
                    Ok(ExtendOutcome::Extended(_)) => {
                        Some(format!("User {}'s trial extended to {} days.", username, days))
                    }
                    Ok(ExtendOutcome::NotInTrial(status)) => {
                        Some(format!("User {} is not on trial ({}).", username, status))
                    }
                    Ok(ExtendOutcome::NotFound) => Some(not_found(&username)),
                    Err(e) => {
                        error!("Failed to extend trial for {}: {:#}", username, e);
                        None
                    }
                }
            }
            Control::Delete { username } => {
                info!("{} requested deletion of {}", sender, username);
                match self.ledger.mark_for_deletion(&username).await {
                    Ok(()) => Some(format!("User {} marked for deletion.", username)),
                    Err(e) => {
                        error!("Failed to mark {} for deletion: {:#}", username, e);
                        None
                    }
                }
            }
        };

        if let Some(text) = reply {
            self.reply(out, channel, key, &text);
        }
    }

    fn reply(&self, out: &LinkHandle, channel: &str, key: &str, text: &str) {
        if let Err(e) = out.send_encrypted(channel, key, text) {
            error!("Failed to send reply to {}: {}", channel, e);
        }
    }
}

fn not_found(username: &str) -> String {
    format!("User {} not found.", username)
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};

    use anyhow::Result;
    use chrono::DateTime;
    use tokio::sync::mpsc::UnboundedReceiver;

    use quotabot_db::Database;
    use quotabot_ledger::{AccountStore, FixedClock, RecordService};
    use quotabot_types::{Account, AccountStatus, DayUploader};

    /// Counts every read that reaches the database.
    struct CountingStore {
        inner: Database,
        reads: AtomicUsize,
    }

    impl CountingStore {
        fn read(&self) {
            self.reads.fetch_add(1, Ordering::SeqCst);
        }
    }

    impl AccountStore for CountingStore {
        fn get(&self, username: &str) -> Result<Option<Account>> {
            self.read();
            self.inner.get_account(username)
        }
        fn upsert(&self, account: &Account) -> Result<()> {
            self.inner.upsert_account(account)
        }
        fn delete(&self, username: &str) -> Result<bool> {
            self.inner.delete_account(username)
        }
        fn by_status(&self, status: AccountStatus) -> Result<Vec<Account>> {
            self.read();
            self.inner.accounts_by_status(status)
        }
        fn top_by_status(&self, status: AccountStatus, limit: u32) -> Result<Vec<Account>> {
            self.read();
            self.inner.top_by_status(status, limit)
        }
        fn top_day_uploaders(&self, limit: u32) -> Result<Vec<DayUploader>> {
            self.read();
            self.inner.top_day_uploaders(limit)
        }
    }

    #[derive(Default)]
    struct FlagLog(std::sync::Mutex<Vec<String>>);

    impl RecordService for FlagLog {
        fn append_flags(&self, username: &str, flags: &str) -> Result<()> {
            if username == "ghost" {
                anyhow::bail!("Userfile does not exist");
            }
            self.0.lock().unwrap().push(format!("{}:{}", username, flags));
            Ok(())
        }
        fn write_farewell(&self, _: &str, _: &str, _: &str, _: bool) -> Result<()> {
            Ok(())
        }
    }

    const CONFIG: &str = r##"{
        "server": {
            "host": "irc.example.net",
            "nickname": "quotabot",
            "channels": [{ "name": "#main", "key": "mainkey" }]
        },
        "staff": { "users": ["alice"], "channels": ["#staff"], "key": "staffkey" },
        "daily_report": { "channels": ["#announce"], "key": "reportkey" }
    }"##;

    struct Fixture {
        store: Arc<CountingStore>,
        records: Arc<FlagLog>,
        router: CommandRouter,
        out: LinkHandle,
        rx: UnboundedReceiver<String>,
    }

    fn fixture() -> Fixture {
        let config: Config = serde_json::from_str(CONFIG).unwrap();
        let store = Arc::new(CountingStore {
            inner: Database::open_in_memory().unwrap(),
            reads: AtomicUsize::new(0),
        });
        let records = Arc::new(FlagLog::default());
        let clock = Arc::new(FixedClock::new(
            DateTime::parse_from_rfc3339("2026-10-14T12:00:00+00:00").unwrap(),
        ));
        let ledger = Arc::new(Ledger::new(
            store.clone(),
            records.clone(),
            clock,
            config.ledger_config(),
        ));
        let router = CommandRouter::new(ledger, &config);
        let (out, rx) = LinkHandle::detached();
        Fixture { store, records, router, out, rx }
    }

    fn seed(store: &CountingStore, name: &str, status: AccountStatus, days: i64) {
        let mut account = Account::new(name, "iND", 1_700_000_000);
        account.status = status;
        account.days_remaining = Some(days);
        account.trial_start = Some(1_700_000_000);
        store.inner.upsert_account(&account).unwrap();
    }

    fn message(sender: &str, channel: &str, key: &str, text: &str) -> InboundMessage {
        InboundMessage {
            sender: sender.into(),
            channel: channel.into(),
            text: quotabot_crypto::encode(text, key).unwrap(),
        }
    }

    /// Decrypted replies, in order.
    fn replies(rx: &mut UnboundedReceiver<String>, channel: &str, key: &str) -> Vec<String> {
        let prefix = format!("PRIVMSG {} :", channel);
        std::iter::from_fn(|| rx.try_recv().ok())
            .map(|line| {
                let envelope = line.strip_prefix(&prefix).unwrap().to_string();
                quotabot_crypto::decode(&envelope, key).unwrap()
            })
            .collect()
    }

    #[test]
    fn parses_commands() {
        assert_eq!(parse_command(" !top ", "!top", "!ft"), Some(Command::Status));
        assert_eq!(parse_command("hello", "!top", "!ft"), None);
        assert_eq!(parse_command("!ftx trial bob", "!top", "!ft"), None);
        assert_eq!(
            parse_command("!ft trial bob", "!top", "!ft"),
            Some(Command::Control(Control::Trial { username: "bob".into() }))
        );
        assert_eq!(
            parse_command("!ft extend bob 5", "!top", "!ft"),
            Some(Command::Control(Control::Extend { username: "bob".into(), days: 5 }))
        );
        assert_eq!(
            parse_command("!ft extend abc user1", "!top", "!ft"),
            Some(Command::Control(Control::InvalidDays))
        );
        assert_eq!(
            parse_command("!ft extend bob -2", "!top", "!ft"),
            Some(Command::Control(Control::InvalidDays))
        );
        assert_eq!(
            parse_command("!ft extend bob 3650", "!top", "!ft"),
            Some(Command::Control(Control::Extend { username: "bob".into(), days: 3650 }))
        );
        assert_eq!(
            parse_command("!ft extend bob 3651", "!top", "!ft"),
            Some(Command::Control(Control::InvalidDays))
        );
        assert_eq!(parse_command("!ft trial", "!top", "!ft"), Some(Command::Control(Control::Usage)));
        assert_eq!(
            parse_command("!ft promote bob", "!top", "!ft"),
            Some(Command::Control(Control::UnknownVerb))
        );
    }

    #[tokio::test]
    async fn unauthorized_channel_gets_one_refusal_and_no_reads() {
        let mut f = fixture();
        let msg = message("mallory", "#announce", "reportkey", "!top");
        f.router.handle_message(&f.out, &msg).await;

        assert_eq!(replies(&mut f.rx, "#announce", "reportkey"), vec![REFUSAL]);
        assert_eq!(f.store.reads.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn status_query_sends_both_blocks() {
        let mut f = fixture();
        seed(&f.store, "bob", AccountStatus::Quota, 4);
        seed(&f.store, "carol", AccountStatus::Trial, 2);

        f.router.handle_message(&f.out, &message("bob", "#main", "mainkey", "!top")).await;

        let lines: Vec<String> = replies(&mut f.rx, "#main", "mainkey")
            .iter()
            .map(|l| quotabot_ledger::report::strip_formatting(l))
            .collect();
        assert_eq!(lines.len(), 5);
        assert!(lines[0].starts_with("WEEKLY QUOTA: [ 1 Users - "));
        assert!(lines[1].starts_with("[ 01 ] bob/iND"));
        assert_eq!(lines[2], "");
        assert!(lines[3].starts_with("TRIAL QUOTA: [ Trial List - 1 Trialing"));
        assert!(lines[4].starts_with("[ 01 ] carol/trial"));
    }

    #[tokio::test]
    async fn non_numeric_extend_is_rejected_without_change() {
        let mut f = fixture();
        seed(&f.store, "abc", AccountStatus::Trial, 3);

        let msg = message("alice", "#staff", "staffkey", "!ft extend abc user1");
        f.router.handle_message(&f.out, &msg).await;

        assert_eq!(replies(&mut f.rx, "#staff", "staffkey"), vec![INVALID_DAYS]);
        let account = f.store.inner.get_account("abc").unwrap().unwrap();
        assert_eq!(account.days_remaining, Some(3));
    }

    #[tokio::test]
    async fn oversized_extend_is_rejected_without_change() {
        let mut f = fixture();
        seed(&f.store, "bob", AccountStatus::Trial, 3);
        let before = f.store.inner.get_account("bob").unwrap();

        let msg = message("alice", "#staff", "staffkey", "!ft extend bob 200000000000000");
        f.router.handle_message(&f.out, &msg).await;

        assert_eq!(replies(&mut f.rx, "#staff", "staffkey"), vec![INVALID_DAYS]);
        assert_eq!(f.store.inner.get_account("bob").unwrap(), before);
        assert!(f.records.0.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn control_commands_change_status() {
        let mut f = fixture();
        seed(&f.store, "bob", AccountStatus::Quota, 4);

        let send = |text: &str| message("alice", "#staff", "staffkey", text);
        f.router.handle_message(&f.out, &send("!ft trial bob")).await;
        f.router.handle_message(&f.out, &send("!ft extend bob 10")).await;
        f.router.handle_message(&f.out, &send("!ft quota bob")).await;
        f.router.handle_message(&f.out, &send("!ft extend bob 3")).await;
        f.router.handle_message(&f.out, &send("!ft delete bob")).await;
        f.router.handle_message(&f.out, &send("!ft quota nobody")).await;

        assert_eq!(
            replies(&mut f.rx, "#staff", "staffkey"),
            vec![
                "User bob updated to trial starting 2026-10-14 12:00 (7 days).",
                "User bob's trial extended to 10 days.",
                "User bob updated to quota (4 days left this week).",
                "User bob is not on trial (quota).",
                "User bob marked for deletion.",
                "User nobody not found.",
            ]
        );
        assert_eq!(f.records.0.lock().unwrap().as_slice(), &["bob:6".to_string()]);
        let bob = f.store.inner.get_account("bob").unwrap().unwrap();
        assert_eq!(bob.status, AccountStatus::Quota);
    }

    #[tokio::test]
    async fn usage_and_unknown_verb_replies() {
        let mut f = fixture();
        let send = |text: &str| message("alice", "#staff", "staffkey", text);
        f.router.handle_message(&f.out, &send("!ft trial")).await;
        f.router.handle_message(&f.out, &send("!ft promote bob")).await;

        assert_eq!(
            replies(&mut f.rx, "#staff", "staffkey"),
            vec![
                "Usage: !ft <trial|quota|extend|delete> <username> [<days>]",
                INVALID_VERB,
            ]
        );
    }

    #[tokio::test]
    async fn persistence_failure_is_silent() {
        let mut f = fixture();
        let msg = message("alice", "#staff", "staffkey", "!ft delete ghost");
        f.router.handle_message(&f.out, &msg).await;
        assert!(f.rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn control_requires_staff_user_and_channel() {
        let mut f = fixture();
        seed(&f.store, "bob", AccountStatus::Quota, 4);

        f.router
            .handle_message(&f.out, &message("mallory", "#staff", "staffkey", "!ft trial bob"))
            .await;
        f.router
            .handle_message(&f.out, &message("alice", "#main", "mainkey", "!ft trial bob"))
            .await;

        assert!(f.rx.try_recv().is_err());
        let bob = f.store.inner.get_account("bob").unwrap().unwrap();
        assert_eq!(bob.status, AccountStatus::Quota);
    }

    #[tokio::test]
    async fn bad_envelopes_and_unknown_channels_are_dropped() {
        let mut f = fixture();
        let cases = [
            // wrong key
            message("alice", "#main", "otherkey", "!top"),
            // no key for this channel
            message("alice", "#random", "mainkey", "!top"),
            InboundMessage {
                sender: "alice".into(),
                channel: "#main".into(),
                text: "!top".into(),
            },
            InboundMessage {
                sender: "alice".into(),
                channel: "#main".into(),
                text: "+OK *not base64!".into(),
            },
        ];
        for msg in &cases {
            f.router.handle_message(&f.out, msg).await;
        }
        assert!(f.rx.try_recv().is_err());
        assert_eq!(f.store.reads.load(Ordering::SeqCst), 0);
    }
}
