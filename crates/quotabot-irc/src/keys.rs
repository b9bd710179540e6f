use std::collections::{HashMap, HashSet};

/// Immutable channel-to-key table, built once from configuration.
///
/// Lookup order: explicit per-channel binding, then the staff channels
/// (staff key), then the daily-report channels (report key).
#[derive(Debug, Clone, Default)]
pub struct ChannelKeys {
    bindings: HashMap<String, String>,
    staff_channels: HashSet<String>,
    staff_key: Option<String>,
    report_channels: HashSet<String>,
    report_key: Option<String>,
}

impl ChannelKeys {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(mut self, channel: impl Into<String>, key: impl Into<String>) -> Self {
        self.bindings.insert(channel.into(), key.into());
        self
    }

    pub fn staff<I, S>(mut self, channels: I, key: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.staff_channels = channels.into_iter().map(Into::into).collect();
        self.staff_key = Some(key.into());
        self
    }

    pub fn report<I, S>(mut self, channels: I, key: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.report_channels = channels.into_iter().map(Into::into).collect();
        self.report_key = Some(key.into());
        self
    }

    pub fn resolve(&self, channel: &str) -> Option<&str> {
        if let Some(key) = self.bindings.get(channel) {
            return Some(key);
        }
        if self.staff_channels.contains(channel) {
            if let Some(key) = &self.staff_key {
                return Some(key);
            }
        }
        if self.report_channels.contains(channel) {
            if let Some(key) = &self.report_key {
                return Some(key);
            }
        }
        None
    }

    /// Channel with its own binding, i.e. a monitored channel.
    pub fn is_monitored(&self, channel: &str) -> bool {
        self.bindings.contains_key(channel)
    }

    pub fn is_staff(&self, channel: &str) -> bool {
        self.staff_channels.contains(channel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys() -> ChannelKeys {
        ChannelKeys::new()
            .bind("#main", "mainkey")
            .bind("#both", "bothkey")
            .staff(["#staff", "#both"], "staffkey")
            .report(["#announce", "#staff"], "reportkey")
    }

    #[test]
    fn resolution_order() {
        let keys = keys();
        assert_eq!(keys.resolve("#main"), Some("mainkey"));
        assert_eq!(keys.resolve("#both"), Some("bothkey"));
        assert_eq!(keys.resolve("#staff"), Some("staffkey"));
        assert_eq!(keys.resolve("#announce"), Some("reportkey"));
        assert_eq!(keys.resolve("#elsewhere"), None);
    }

    #[test]
    fn monitored_and_staff_sets() {
        let keys = keys();
        assert!(keys.is_monitored("#main"));
        assert!(!keys.is_monitored("#staff"));
        assert!(keys.is_staff("#both"));
        assert!(!keys.is_staff("#announce"));
    }
}
