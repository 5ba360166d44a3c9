//! Engine configuration.
//!
//! Read-only at call time. Loaded from TOML (every field optional) or built
//! programmatically with the `with_*` setters:
//!
//! ```toml
//! ignore_ip_addresses = ["10.0.0.1", "127.0.0.1"]
//! robot_user_agent_pattern = "(?i)\\b(Googlebot|bingbot)\\b"
//! db_failover = true
//! allow_multiple_experiments = false
//! ```

use std::collections::BTreeSet;
use std::path::Path;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SplitError};

/// Crawler user agents excluded from experiments unless overridden.
pub const DEFAULT_ROBOT_PATTERN: &str = r"(?i)\b(Baidu|Gigabot|Googlebot|bingbot|libwww-perl|lwp-trivial|msnbot|SiteUptime|Slurp|WordPress|YandexBot|DuckDuckBot|facebookexternalhit|ZIBB|ZyBorg)\b";

static DEFAULT_ROBOT_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(DEFAULT_ROBOT_PATTERN).expect("built-in robot pattern compiles"));

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SplitConfig {
    /// Client addresses that never take part in experiments.
    pub ignore_ip_addresses: BTreeSet<String>,
    /// Regex matched against the user agent to detect robots.
    pub robot_user_agent_pattern: String,
    /// Serve the first alternative instead of failing when the store is down.
    pub db_failover: bool,
    /// Let one session take part in several experiments at once.
    pub allow_multiple_experiments: bool,
}

impl Default for SplitConfig {
    fn default() -> Self {
        Self {
            ignore_ip_addresses: BTreeSet::new(),
            robot_user_agent_pattern: DEFAULT_ROBOT_PATTERN.to_string(),
            db_failover: false,
            allow_multiple_experiments: false,
        }
    }
}

impl SplitConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: SplitConfig =
            toml::from_str(raw).map_err(|e| SplitError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| SplitError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&raw)
    }

    pub fn validate(&self) -> Result<()> {
        self.robot_regex().map(|_| ())
    }

    pub(crate) fn robot_regex(&self) -> Result<Regex> {
        if self.robot_user_agent_pattern == DEFAULT_ROBOT_PATTERN {
            return Ok(DEFAULT_ROBOT_REGEX.clone());
        }
        Regex::new(&self.robot_user_agent_pattern).map_err(|e| {
            SplitError::Config(format!("invalid robot_user_agent_pattern: {e}"))
        })
    }

    pub fn with_ignored_ip(mut self, ip: impl Into<String>) -> Self {
        self.ignore_ip_addresses.insert(ip.into());
        self
    }

    pub fn with_robot_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.robot_user_agent_pattern = pattern.into();
        self
    }

    pub fn with_db_failover(mut self, enabled: bool) -> Self {
        self.db_failover = enabled;
        self
    }

    pub fn with_multiple_experiments(mut self, allowed: bool) -> Self {
        self.allow_multiple_experiments = allowed;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let c = SplitConfig::default();
        assert!(c.ignore_ip_addresses.is_empty());
        assert!(!c.db_failover);
        assert!(!c.allow_multiple_experiments);
        assert!(c.validate().is_ok());
    }

    #[test]
    fn test_empty_toml_is_default() {
        assert_eq!(SplitConfig::from_toml_str("").unwrap(), SplitConfig::default());
    }

    #[test]
    fn test_partial_toml_overrides_only_given_fields() {
        let c = SplitConfig::from_toml_str("db_failover = true\nignore_ip_addresses = [\"1.2.3.4\"]")
            .unwrap();
        assert!(c.db_failover);
        assert!(c.ignore_ip_addresses.contains("1.2.3.4"));
        assert_eq!(c.robot_user_agent_pattern, DEFAULT_ROBOT_PATTERN);
    }

    #[test]
    fn test_unknown_field_rejected() {
        assert!(matches!(
            SplitConfig::from_toml_str("db_failvoer = true"),
            Err(SplitError::Config(_))
        ));
    }

    #[test]
    fn test_bad_regex_rejected() {
        let err = SplitConfig::from_toml_str("robot_user_agent_pattern = \"(unclosed\"").unwrap_err();
        assert!(err.to_string().contains("robot_user_agent_pattern"));
    }

    #[test]
    fn test_builder_setters() {
        let c = SplitConfig::default()
            .with_ignored_ip("127.0.0.1")
            .with_db_failover(true)
            .with_multiple_experiments(true)
            .with_robot_pattern("bot");
        assert!(c.ignore_ip_addresses.contains("127.0.0.1"));
        assert!(c.db_failover && c.allow_multiple_experiments);
        assert_eq!(c.robot_user_agent_pattern, "bot");
    }

    #[test]
    fn test_missing_file_is_config_error() {
        assert!(matches!(
            SplitConfig::from_path("/definitely/not/here.toml"),
            Err(SplitError::Config(_))
        ));
    }
}
