use std::path::PathBuf;

use crate::policy::{BookingPolicy, PolicyError};

pub const DEFAULT_DATA_DIR: &str = "./data";
pub const DEFAULT_COMPACT_THRESHOLD: u64 = 1000;
const JOURNAL_FILE: &str = "sessions.journal";

/// Process settings read from `SESSIONDESK_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub data_dir: PathBuf,
    /// TOML policy file; the canonical policy applies when unset.
    pub policy_path: Option<PathBuf>,
    pub metrics_port: Option<u16>,
    /// Stale journal records tolerated before an automatic compaction.
    pub compact_threshold: u64,
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. Unparseable numbers fall back to their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let data_dir = lookup("SESSIONDESK_DATA_DIR").unwrap_or_else(|| DEFAULT_DATA_DIR.into());
        let policy_path = lookup("SESSIONDESK_POLICY")
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from);
        let metrics_port = lookup("SESSIONDESK_METRICS_PORT").and_then(|s| s.parse().ok());
        let compact_threshold = lookup("SESSIONDESK_COMPACT_THRESHOLD")
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_COMPACT_THRESHOLD);
        Self {
            data_dir: PathBuf::from(data_dir),
            policy_path,
            metrics_port,
            compact_threshold,
        }
    }

    pub fn journal_path(&self) -> PathBuf {
        self.data_dir.join(JOURNAL_FILE)
    }

    pub fn load_policy(&self) -> Result<BookingPolicy, PolicyError> {
        match &self.policy_path {
            Some(path) => BookingPolicy::load(path),
            None => Ok(BookingPolicy::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_unset() {
        let cfg = Config::from_lookup(lookup(&[]));
        assert_eq!(cfg.data_dir, PathBuf::from("./data"));
        assert_eq!(cfg.policy_path, None);
        assert_eq!(cfg.metrics_port, None);
        assert_eq!(cfg.compact_threshold, 1000);
        assert_eq!(cfg.journal_path(), PathBuf::from("./data/sessions.journal"));
        assert_eq!(cfg.load_policy().unwrap(), BookingPolicy::default());
    }

    #[test]
    fn reads_values() {
        let cfg = Config::from_lookup(lookup(&[
            ("SESSIONDESK_DATA_DIR", "/var/lib/sessiondesk"),
            ("SESSIONDESK_POLICY", "/etc/sessiondesk/policy.toml"),
            ("SESSIONDESK_METRICS_PORT", "9100"),
            ("SESSIONDESK_COMPACT_THRESHOLD", "50"),
        ]));
        assert_eq!(cfg.data_dir, PathBuf::from("/var/lib/sessiondesk"));
        assert_eq!(cfg.policy_path, Some(PathBuf::from("/etc/sessiondesk/policy.toml")));
        assert_eq!(cfg.metrics_port, Some(9100));
        assert_eq!(cfg.compact_threshold, 50);
    }

    #[test]
    fn bad_numbers_fall_back() {
        let cfg = Config::from_lookup(lookup(&[
            ("SESSIONDESK_METRICS_PORT", "metrics"),
            ("SESSIONDESK_COMPACT_THRESHOLD", "-3"),
            ("SESSIONDESK_POLICY", ""),
        ]));
        assert_eq!(cfg.metrics_port, None);
        assert_eq!(cfg.compact_threshold, 1000);
        assert_eq!(cfg.policy_path, None);
    }

    #[test]
    fn missing_policy_file_is_an_error() {
        let cfg = Config::from_lookup(lookup(&[(
            "SESSIONDESK_POLICY",
            "/nonexistent/sessiondesk/policy.toml",
        )]));
        assert!(matches!(cfg.load_policy(), Err(PolicyError::Io(_))));
    }
}
