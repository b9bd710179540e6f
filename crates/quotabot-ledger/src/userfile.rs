//! ftpd userfiles: one plain-text file per account under the users directory.
//!
//! ```text
//! GROUP iND 1
//! FLAGS 3
//! RATIO 0
//! WKUP 12 5242880 300
//! DAYUP 2 1048576 60
//! ADDED 1700000000 staff
//! ```

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, info, warn};

use crate::store::RecordService;

/// Counters and metadata read from one userfile.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserRecord {
    pub group: Option<String>,
    pub flags: String,
    pub ratio: i64,
    pub week_files: i64,
    pub week_upload_kib: i64,
    pub day_files: i64,
    pub day_upload_kib: i64,
    pub added: Option<i64>,
}

impl UserRecord {
    pub fn parse(content: &str) -> Self {
        let mut record = Self::default();
        let mut seen_ratio = false;

        for line in content.lines() {
            let mut fields = line.split_whitespace();
            let Some(key) = fields.next() else { continue };
            let values: Vec<&str> = fields.collect();
            let int = |i: usize| values.get(i).and_then(|v| v.parse::<i64>().ok()).unwrap_or(0);

            match key {
                // The first GROUP line is the primary group.
                "GROUP" if record.group.is_none() => {
                    record.group = values.first().map(|g| g.to_string());
                }
                "FLAGS" => record.flags = values.first().unwrap_or(&"").to_string(),
                // One RATIO per section; the first is the default section.
                "RATIO" if !seen_ratio => {
                    record.ratio = int(0);
                    seen_ratio = true;
                }
                "WKUP" => {
                    record.week_files = int(0);
                    record.week_upload_kib = int(1);
                }
                "DAYUP" => {
                    record.day_files = int(0);
                    record.day_upload_kib = int(1);
                }
                "ADDED" => record.added = values.first().and_then(|v| v.parse().ok()),
                _ => {}
            }
        }

        record
    }

    pub fn has_flag(&self, flag: &str) -> bool {
        flag.chars().any(|c| self.flags.contains(c))
    }
}

/// Which userfiles an import considers.
#[derive(Debug, Clone, Default)]
pub struct ImportOptions {
    pub user_skip: HashSet<String>,
    pub excluded_groups: HashSet<String>,
    /// Accounts carrying this flag are purged from the database.
    pub delete_flag: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportSummary {
    pub added: usize,
    pub refreshed: usize,
    pub purged: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Userfile directory plus the directory farewell notes are written to.
pub struct UserFiles {
    users_dir: PathBuf,
    bye_dir: PathBuf,
}

impl UserFiles {
    pub fn new(users_dir: impl Into<PathBuf>, bye_dir: impl Into<PathBuf>) -> Self {
        Self {
            users_dir: users_dir.into(),
            bye_dir: bye_dir.into(),
        }
    }

    pub fn users_dir(&self) -> &Path {
        &self.users_dir
    }

    fn user_path(&self, username: &str) -> Result<PathBuf> {
        if username.is_empty()
            || username.starts_with('.')
            || username.contains(['/', '\\'])
        {
            return Err(anyhow!("Refusing unsafe username {:?}", username));
        }
        Ok(self.users_dir.join(username))
    }

    pub fn read(&self, username: &str) -> Result<UserRecord> {
        let path = self.user_path(username)?;
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Reading userfile {}", path.display()))?;
        Ok(UserRecord::parse(&content))
    }

    /// Usernames of every importable file, sorted. Lock files and dotfiles
    /// (including our own temp files) are left out.
    pub fn list(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.users_dir)
            .with_context(|| format!("Listing {}", self.users_dir.display()))?
        {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
                continue;
            };
            if name.starts_with('.') || name.ends_with(".lock") {
                debug!("Skipping {}", name);
                continue;
            }
            names.push(name);
        }
        names.sort();
        Ok(names)
    }
}

impl RecordService for UserFiles {
    fn append_flags(&self, username: &str, flags: &str) -> Result<()> {
        let path = self.user_path(username)?;
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Userfile does not exist: {}", path.display()))?;

        let mut replaced = false;
        let mut lines: Vec<String> = Vec::new();
        for line in content.lines() {
            if let Some(current) = line.strip_prefix("FLAGS ").or((line == "FLAGS").then_some("")) {
                let current = current.trim();
                let missing: String = flags.chars().filter(|c| !current.contains(*c)).collect();
                lines.push(format!("FLAGS {}{}", missing, current));
                replaced = true;
            } else {
                lines.push(line.to_string());
            }
        }
        if !replaced {
            lines.push(format!("FLAGS {}", flags));
        }

        let mut updated = lines.join("\n");
        if content.ends_with('\n') {
            updated.push('\n');
        }

        // Temp file sits beside the userfile; rename must not cross filesystems.
        let tmp = self.users_dir.join(format!(".{}.tmp", username));
        fs::write(&tmp, updated).with_context(|| format!("Writing {}", tmp.display()))?;
        fs::rename(&tmp, &path).with_context(|| format!("Replacing {}", path.display()))?;

        info!("Added flags {} to {}", flags, username);
        Ok(())
    }

    fn write_farewell(
        &self,
        username: &str,
        reason: &str,
        stats: &str,
        policy_failure: bool,
    ) -> Result<()> {
        self.user_path(username)?;
        let path = self.bye_dir.join(format!("{}.bye", username));

        let mut lines = vec![
            if policy_failure {
                "You were deleted by site policy.".to_string()
            } else {
                "You were deleted because of failed quota.".to_string()
            },
            format!("Stats: {}", stats),
        ];
        if policy_failure {
            lines.push(format!("Reason: {}", reason));
        }

        fs::write(&path, lines.join("\n"))
            .with_context(|| format!("Writing farewell file {}", path.display()))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Err(e) = fs::set_permissions(&path, fs::Permissions::from_mode(0o666)) {
                warn!("Could not chmod {}: {}", path.display(), e);
            }
        }

        info!("Wrote farewell file for {} ({})", username, reason);
        Ok(())
    }
}
