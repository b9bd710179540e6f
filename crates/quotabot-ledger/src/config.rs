use serde::Deserialize;

/// Probation rules for new accounts.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TrialPolicy {
    pub enabled: bool,
    /// Default trial length in days.
    pub days: i64,
    /// Upload needed by the end of the trial, in GiB.
    pub quota_gb: f64,
    /// Flag characters prepended to the userfile on failure.
    pub fail_flags: String,
    /// Restart a failed trial instead of disabling the account.
    pub fail_back_to_trial: bool,
}

impl Default for TrialPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            days: 7,
            quota_gb: 25.0,
            fail_flags: "6".into(),
            fail_back_to_trial: false,
        }
    }
}

/// Weekly upload requirement for accounts past their trial.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct QuotaPolicy {
    pub enabled: bool,
    pub quota_gb: f64,
    pub fail_flags: String,
    /// Demote to Trial instead of disabling when the week is missed.
    pub fail_back_to_trial: bool,
}

impl Default for QuotaPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            quota_gb: 50.0,
            fail_flags: "6".into(),
            fail_back_to_trial: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LedgerConfig {
    pub trial: TrialPolicy,
    pub quota: QuotaPolicy,
    /// Flag written by the staff `delete` command.
    pub delete_flag: String,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            trial: TrialPolicy::default(),
            quota: QuotaPolicy::default(),
            delete_flag: "6".into(),
        }
    }
}

/// GiB threshold expressed in the KiB unit the counters use.
pub fn gib_to_kib(gib: f64) -> i64 {
    (gib * 1024.0 * 1024.0).round() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thresholds_in_kib() {
        assert_eq!(gib_to_kib(1.0), 1_048_576);
        assert_eq!(gib_to_kib(2.5), 2_621_440);
    }

    #[test]
    fn partial_config_uses_defaults() {
        let cfg: LedgerConfig =
            serde_json::from_str(r#"{ "trial": { "days": 14 }, "quota": { "fail_back_to_trial": true } }"#)
                .unwrap();
        assert_eq!(cfg.trial.days, 14);
        assert_eq!(cfg.trial.fail_flags, "6");
        assert!(cfg.quota.fail_back_to_trial);
        assert_eq!(cfg.delete_flag, "6");
    }
}
