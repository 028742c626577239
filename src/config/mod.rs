use crate::error::{ApiError, Result};
use crate::rate_limit::policy::EndpointRule;
use crate::rate_limit::types::{Quota, Tier};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// Upper bound for any window or block duration (one year)
pub const MAX_DURATION_SECS: u64 = 365 * 24 * 60 * 60;

/// Main edge configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,
    /// Content API that allowed requests are forwarded to
    pub upstream: UpstreamConfig,
    /// Authentication configuration
    #[serde(default)]
    pub auth: Option<AuthConfig>,
    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limiting: RateLimitingConfig,
    /// Prometheus metrics endpoint
    #[serde(default)]
    pub metrics: Option<MetricsConfig>,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server host address
    #[serde(default = "default_host")]
    pub host: String,
    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,
    /// Upstream request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

/// Upstream content API
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    /// Base URL, e.g. `http://localhost:3000`
    pub url: String,
}

/// Global authentication configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// JWT configuration
    pub jwt: Option<JwtConfig>,
}

/// JWT authentication configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwtConfig {
    /// Secret key for HS256 (if using symmetric encryption)
    pub secret: Option<String>,
    /// Public key for RS256 (if using asymmetric encryption)
    pub public_key: Option<String>,
    /// Algorithm to use (HS256 or RS256)
    #[serde(default = "default_jwt_algorithm")]
    pub algorithm: String,
    /// Issuer to validate
    pub issuer: Option<String>,
    /// Audience to validate
    pub audience: Option<String>,
}

/// Rate limiting configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitingConfig {
    /// Enable rate limiting
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Prefix for every counter and block key
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
    /// Header set by the trusted reverse proxy with the client address
    #[serde(default = "default_trusted_proxy_header")]
    pub trusted_proxy_header: String,
    /// Redis configuration for the shared counter store
    #[serde(default)]
    pub redis: Option<RateLimitRedisConfig>,
    /// Per-tier quota overrides; unlisted tiers keep their defaults
    #[serde(default)]
    pub tiers: HashMap<Tier, Quota>,
    /// Endpoint sensitivity table; replaces the default table when set
    #[serde(default)]
    pub endpoints: Option<Vec<EndpointRule>>,
}

/// Redis configuration for rate limiting
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitRedisConfig {
    /// Redis connection URL
    pub url: String,
}

/// Metrics endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Path the Prometheus scrape endpoint is served on
    #[serde(default = "default_metrics_path")]
    pub path: String,
}

fn default_true() -> bool {
    true
}

fn default_jwt_algorithm() -> String {
    "HS256".to_string()
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_timeout() -> u64 {
    30
}

fn default_key_prefix() -> String {
    "ratelimit".to_string()
}

fn default_trusted_proxy_header() -> String {
    "x-forwarded-for".to_string()
}

fn default_metrics_path() -> String {
    "/metrics".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            timeout_secs: default_timeout(),
        }
    }
}

impl Default for RateLimitingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            key_prefix: default_key_prefix(),
            trusted_proxy_header: default_trusted_proxy_header(),
            redis: None,
            tiers: HashMap::new(),
            endpoints: None,
        }
    }
}

impl EdgeConfig {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ApiError::Config(format!("Failed to read config file: {}", e)))?;

        Self::from_yaml(&content)
    }

    /// Parse configuration from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| ApiError::Config(format!("Failed to parse config: {}", e)))
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        let url = &self.upstream.url;
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(ApiError::Config(format!(
                "Upstream URL must start with http:// or https://: {}",
                url
            )));
        }

        if self.server.timeout_secs == 0 {
            return Err(ApiError::Config("Server timeout must be > 0".to_string()));
        }

        let rate_limiting = &self.rate_limiting;

        if rate_limiting.key_prefix.is_empty() {
            return Err(ApiError::Config(
                "Rate limit key prefix cannot be empty".to_string(),
            ));
        }

        if http::HeaderName::from_bytes(rate_limiting.trusted_proxy_header.as_bytes()).is_err() {
            return Err(ApiError::Config(format!(
                "Invalid trusted proxy header: {}",
                rate_limiting.trusted_proxy_header
            )));
        }

        for (tier, quota) in &rate_limiting.tiers {
            if quota.points == 0 {
                return Err(ApiError::Config(format!(
                    "Rate limit points must be > 0 for tier: {}",
                    tier
                )));
            }
            if quota.window_secs == 0 {
                return Err(ApiError::Config(format!(
                    "Rate limit duration must be > 0 for tier: {}",
                    tier
                )));
            }
            if quota.window_secs > MAX_DURATION_SECS || quota.block_secs > MAX_DURATION_SECS {
                return Err(ApiError::Config(format!(
                    "Rate limit durations must be at most {}s for tier: {}",
                    MAX_DURATION_SECS, tier
                )));
            }
        }

        if let Some(endpoints) = &rate_limiting.endpoints {
            for rule in endpoints {
                if !rule.prefix.starts_with('/') {
                    return Err(ApiError::Config(format!(
                        "Endpoint prefix must start with '/': {}",
                        rule.prefix
                    )));
                }
                if rule.category.is_empty() {
                    return Err(ApiError::Config(format!(
                        "Endpoint category cannot be empty for prefix: {}",
                        rule.prefix
                    )));
                }
                if !rule.sensitivity.is_finite() || rule.sensitivity <= 0.0 {
                    return Err(ApiError::Config(format!(
                        "Endpoint sensitivity must be a positive number for prefix: {}",
                        rule.prefix
                    )));
                }
            }
        }

        if let Some(metrics) = &self.metrics {
            if !metrics.path.starts_with('/') {
                return Err(ApiError::Config(format!(
                    "Metrics path must start with '/': {}",
                    metrics.path
                )));
            }
        }

        Ok(())
    }

    /// Create a default configuration for testing
    pub fn default_config(upstream: impl Into<String>) -> Self {
        Self {
            server: ServerConfig::default(),
            upstream: UpstreamConfig {
                url: upstream.into(),
            },
            auth: None,
            rate_limiting: RateLimitingConfig::default(),
            metrics: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_valid_config() {
        let yaml = r#"
server:
  host: "127.0.0.1"
  port: 9090
  timeout_secs: 10

upstream:
  url: "http://localhost:3000"

auth:
  jwt:
    secret: "dev-secret"

rate_limiting:
  key_prefix: "songbook:rl"
  trusted_proxy_header: "x-real-ip"
  redis:
    url: "redis://127.0.0.1:6379"
  tiers:
    FREE:
      points: 100
      duration: 60
      block_duration: 120
    ADMIN:
      points: 5000
      duration: 60
  endpoints:
    - prefix: "/api/auth"
      category: "auth"
      sensitivity: 0.5
"#;

        let config = EdgeConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 9090);
        assert_eq!(config.upstream.url, "http://localhost:3000");
        assert!(config.auth.unwrap().jwt.is_some());

        let rl = config.rate_limiting;
        assert!(rl.enabled);
        assert_eq!(rl.key_prefix, "songbook:rl");
        assert_eq!(rl.trusted_proxy_header, "x-real-ip");
        assert_eq!(rl.redis.unwrap().url, "redis://127.0.0.1:6379");
        assert_eq!(rl.tiers[&Tier::Free], Quota::new(100, 60, 120));
        assert_eq!(rl.tiers[&Tier::Admin], Quota::new(5000, 60, 0));
        assert_eq!(rl.endpoints.unwrap().len(), 1);
    }

    #[test]
    fn test_default_values() {
        let yaml = r#"
upstream:
  url: "http://localhost:3000"
"#;

        let config = EdgeConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.timeout_secs, 30);
        assert!(config.rate_limiting.enabled);
        assert_eq!(config.rate_limiting.key_prefix, "ratelimit");
        assert_eq!(config.rate_limiting.trusted_proxy_header, "x-forwarded-for");
        assert!(config.rate_limiting.tiers.is_empty());
        assert!(config.rate_limiting.endpoints.is_none());
        assert!(config.metrics.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_invalid_upstream() {
        let config = EdgeConfig::default_config("localhost:3000");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_zero_points() {
        let mut config = EdgeConfig::default_config("http://localhost:3000");
        config
            .rate_limiting
            .tiers
            .insert(Tier::Basic, Quota::new(0, 60, 0));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_zero_window() {
        let mut config = EdgeConfig::default_config("http://localhost:3000");
        config
            .rate_limiting
            .tiers
            .insert(Tier::Basic, Quota::new(10, 0, 0));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_duration_upper_bound() {
        let mut config = EdgeConfig::default_config("http://localhost:3000");
        config
            .rate_limiting
            .tiers
            .insert(Tier::Free, Quota::new(10, MAX_DURATION_SECS, MAX_DURATION_SECS));
        assert!(config.validate().is_ok());

        config
            .rate_limiting
            .tiers
            .insert(Tier::Free, Quota::new(10, u64::MAX, 0));
        assert!(config.validate().is_err());

        config
            .rate_limiting
            .tiers
            .insert(Tier::Free, Quota::new(10, 60, MAX_DURATION_SECS + 1));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_endpoint_rules() {
        let mut config = EdgeConfig::default_config("http://localhost:3000");
        config.rate_limiting.endpoints = Some(vec![EndpointRule::new("api/songs", "songs", 1.0)]);
        assert!(config.validate().is_err());

        config.rate_limiting.endpoints = Some(vec![EndpointRule::new("/api/songs", "songs", 0.0)]);
        assert!(config.validate().is_err());

        config.rate_limiting.endpoints =
            Some(vec![EndpointRule::new("/api/songs", "songs", f64::NAN)]);
        assert!(config.validate().is_err());

        config.rate_limiting.endpoints = Some(vec![EndpointRule::new("/api/songs", "songs", 1.5)]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_trusted_proxy_header() {
        let mut config = EdgeConfig::default_config("http://localhost:3000");
        config.rate_limiting.trusted_proxy_header = "bad header".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "upstream:\n  url: \"https://api.example.com\"").unwrap();

        let config = EdgeConfig::from_file(file.path()).unwrap();
        assert_eq!(config.upstream.url, "https://api.example.com");
    }

    #[test]
    fn test_from_missing_file() {
        let result = EdgeConfig::from_file("/nonexistent/songbook-edge.yaml");
        assert!(matches!(result, Err(ApiError::Config(_))));
    }
}
