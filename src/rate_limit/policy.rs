use super::types::{Quota, Tier};
use crate::config::RateLimitingConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Category used when no prefix matches the request path
pub const DEFAULT_CATEGORY: &str = "default";

/// Sensitivity of the default category
pub const DEFAULT_SENSITIVITY: f64 = 1.0;

/// One row of the endpoint sensitivity table
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EndpointRule {
    /// Path prefix, e.g. `/api/auth`
    pub prefix: String,
    /// Category name used in counter keys
    pub category: String,
    /// Multiplier applied to the tier's points
    #[serde(default = "default_sensitivity")]
    pub sensitivity: f64,
}

fn default_sensitivity() -> f64 {
    DEFAULT_SENSITIVITY
}

impl EndpointRule {
    pub fn new(prefix: impl Into<String>, category: impl Into<String>, sensitivity: f64) -> Self {
        Self {
            prefix: prefix.into(),
            category: category.into(),
            sensitivity,
        }
    }
}

/// Resolved endpoint category for a request path
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EndpointCategory<'a> {
    pub name: &'a str,
    pub sensitivity: f64,
}

/// Static prefix table; the most specific matching prefix wins
#[derive(Debug, Clone)]
pub struct EndpointTable {
    /// Sorted by prefix length, longest first
    rules: Vec<EndpointRule>,
}

impl EndpointTable {
    pub fn new(mut rules: Vec<EndpointRule>) -> Self {
        rules.sort_by(|a, b| b.prefix.len().cmp(&a.prefix.len()));
        Self { rules }
    }

    /// Resolve the category for a request path
    pub fn resolve(&self, path: &str) -> EndpointCategory<'_> {
        self.rules
            .iter()
            .find(|rule| path.starts_with(&rule.prefix))
            .map(|rule| EndpointCategory {
                name: &rule.category,
                sensitivity: rule.sensitivity,
            })
            .unwrap_or(EndpointCategory {
                name: DEFAULT_CATEGORY,
                sensitivity: DEFAULT_SENSITIVITY,
            })
    }

    pub fn rules(&self) -> &[EndpointRule] {
        &self.rules
    }
}

impl Default for EndpointTable {
    fn default() -> Self {
        Self::new(vec![
            EndpointRule::new("/api/auth", "auth", 0.5),
            EndpointRule::new("/api/songs", "songs", 1.0),
            EndpointRule::new("/api/comments", "comments", 0.7),
            EndpointRule::new("/api/admin", "admin", 0.3),
            EndpointRule::new("/api/songs/recommendations", "recommendations", 2.0),
        ])
    }
}

/// Quota per tier
#[derive(Debug, Clone)]
pub struct TierPolicy {
    quotas: HashMap<Tier, Quota>,
}

impl TierPolicy {
    /// Default quotas with the given overrides applied
    pub fn with_overrides(overrides: &HashMap<Tier, Quota>) -> Self {
        let mut policy = Self::default();
        policy
            .quotas
            .extend(overrides.iter().map(|(tier, quota)| (*tier, *quota)));
        policy
    }

    pub fn quota(&self, tier: Tier) -> Quota {
        self.quotas
            .get(&tier)
            .copied()
            .unwrap_or_else(|| default_quota(tier))
    }
}

fn default_quota(tier: Tier) -> Quota {
    match tier {
        Tier::Anonymous => Quota::new(30, 60, 300),
        Tier::Free => Quota::new(60, 60, 60),
        Tier::Basic => Quota::new(120, 60, 30),
        Tier::Premium => Quota::new(300, 60, 0),
        Tier::Admin => Quota::new(1000, 60, 0),
    }
}

impl Default for TierPolicy {
    fn default() -> Self {
        Self {
            quotas: Tier::ALL
                .iter()
                .map(|tier| (*tier, default_quota(*tier)))
                .collect(),
        }
    }
}

/// Everything the limiter needs to decide, loaded once at startup
#[derive(Debug, Clone)]
pub struct RateLimitPolicy {
    pub tiers: TierPolicy,
    pub endpoints: EndpointTable,
    pub key_prefix: String,
    pub trusted_proxy_header: String,
}

impl RateLimitPolicy {
    pub fn from_config(config: &RateLimitingConfig) -> Self {
        Self {
            tiers: TierPolicy::with_overrides(&config.tiers),
            endpoints: config
                .endpoints
                .clone()
                .map(EndpointTable::new)
                .unwrap_or_default(),
            key_prefix: config.key_prefix.clone(),
            trusted_proxy_header: config.trusted_proxy_header.to_ascii_lowercase(),
        }
    }
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self::from_config(&RateLimitingConfig::default())
    }
}
