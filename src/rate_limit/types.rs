use serde::{Deserialize, Serialize};
use std::fmt;

/// Rate limit tier derived from authentication state, role and subscription
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum Tier {
    /// No authenticated principal
    Anonymous,
    /// Authenticated, no paid subscription
    Free,
    /// "Pro" paid subscription
    Basic,
    /// Premium subscription
    Premium,
    /// Administrative role, regardless of subscription
    Admin,
}

impl Tier {
    pub const ALL: [Tier; 5] = [
        Tier::Anonymous,
        Tier::Free,
        Tier::Basic,
        Tier::Premium,
        Tier::Admin,
    ];

    /// Get the tier name for logging and metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Anonymous => "ANONYMOUS",
            Tier::Free => "FREE",
            Tier::Basic => "BASIC",
            Tier::Premium => "PREMIUM",
            Tier::Admin => "ADMIN",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The rate-limited identity of a request
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Subject {
    /// Authenticated user id
    User(String),
    /// Client address, or `unknown`
    Ip(String),
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Subject::User(id) => write!(f, "user:{}", id),
            Subject::Ip(addr) => write!(f, "ip:{}", addr),
        }
    }
}

/// Point budget per window for one tier
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Quota {
    /// Requests allowed per window before endpoint scaling
    pub points: u32,
    /// Window length in seconds
    #[serde(rename = "duration")]
    pub window_secs: u64,
    /// Lockout applied after a violation; 0 disables blocking
    #[serde(rename = "block_duration", default)]
    pub block_secs: u64,
}

impl Quota {
    pub const fn new(points: u32, window_secs: u64, block_secs: u64) -> Self {
        Self {
            points,
            window_secs,
            block_secs,
        }
    }

    /// Scale the budget by an endpoint sensitivity, never below one point
    pub fn adjusted_points(&self, sensitivity: f64) -> u32 {
        let scaled = (self.points as f64 * sensitivity).floor();
        if scaled.is_finite() && scaled >= 1.0 {
            scaled.min(u32::MAX as f64) as u32
        } else {
            1
        }
    }
}

/// Rate limit result
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitResult {
    /// Whether the request is allowed
    pub allowed: bool,
    /// Adjusted limit for this subject and endpoint
    pub limit: u32,
    /// Remaining requests in the current window
    pub remaining: u64,
    /// When the limit resets (seconds from now)
    pub reset_after: u64,
    /// Retry after duration (for 429 responses)
    pub retry_after: Option<u64>,
}

impl RateLimitResult {
    /// Create an allowed result
    pub fn allowed(limit: u32, remaining: u64, reset_after: u64) -> Self {
        Self {
            allowed: true,
            limit,
            remaining,
            reset_after,
            retry_after: None,
        }
    }

    /// Create a denied result
    pub fn denied(limit: u32, remaining: u64, reset_after: u64, retry_after: u64) -> Self {
        Self {
            allowed: false,
            limit,
            remaining,
            reset_after,
            retry_after: Some(retry_after),
        }
    }
}

/// Outcome of a limiter evaluation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Within budget
    Allow(RateLimitResult),
    /// Over budget or currently blocked
    Reject(RateLimitResult),
    /// The limiter could not evaluate; the request proceeds unlimited
    FailOpen,
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        !matches!(self, Decision::Reject(_))
    }

    pub fn result(&self) -> Option<&RateLimitResult> {
        match self {
            Decision::Allow(result) | Decision::Reject(result) => Some(result),
            Decision::FailOpen => None,
        }
    }
}
