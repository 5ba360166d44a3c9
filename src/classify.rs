//! Client classification: decides whether a caller is excluded from
//! experiments (robot user agent or ignored IP address), and carries the
//! per-request inputs the engine needs.

use std::collections::{BTreeMap, BTreeSet};

use regex::Regex;

use crate::config::SplitConfig;
use crate::error::Result;

/// What the engine needs to know about the current request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestContext {
    pub user_agent: Option<String>,
    pub remote_addr: Option<String>,
    /// Forced alternatives by experiment name (e.g. from `?link_color=red`).
    pub overrides: BTreeMap<String, String>,
}

impl RequestContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_user_agent(mut self, ua: impl Into<String>) -> Self {
        self.user_agent = Some(ua.into());
        self
    }

    pub fn with_remote_addr(mut self, addr: impl Into<String>) -> Self {
        self.remote_addr = Some(addr.into());
        self
    }

    pub fn with_override(
        mut self,
        experiment: impl Into<String>,
        alternative: impl Into<String>,
    ) -> Self {
        self.overrides.insert(experiment.into(), alternative.into());
        self
    }

    pub fn override_for(&self, experiment: &str) -> Option<&str> {
        self.overrides.get(experiment).map(String::as_str)
    }
}

/// Robot and ignore-list check compiled from [`SplitConfig`].
#[derive(Debug, Clone)]
pub struct ClientClassifier {
    robot: Regex,
    ignored: BTreeSet<String>,
}

impl ClientClassifier {
    pub fn from_config(config: &SplitConfig) -> Result<Self> {
        Ok(Self {
            robot: config.robot_regex()?,
            ignored: config.ignore_ip_addresses.clone(),
        })
    }

    pub fn is_robot(&self, ctx: &RequestContext) -> bool {
        ctx.user_agent
            .as_deref()
            .map(|ua| self.robot.is_match(ua))
            .unwrap_or(false)
    }

    pub fn is_ignored_ip(&self, ctx: &RequestContext) -> bool {
        ctx.remote_addr
            .as_deref()
            .map(|ip| self.ignored.contains(ip))
            .unwrap_or(false)
    }

    pub fn is_excluded(&self, ctx: &RequestContext) -> bool {
        self.is_robot(ctx) || self.is_ignored_ip(ctx)
    }
}
