pub mod jwt;
pub mod middleware;

use serde::{Deserialize, Serialize};

pub use jwt::JwtValidator;
pub use middleware::auth_middleware;

/// Authenticated caller as seen by the rate limiter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Principal {
    /// External subject id issued by the identity provider
    pub id: String,
    /// Account role, e.g. `USER`, `ADMIN`, `SUPER_ADMIN`
    #[serde(default)]
    pub role: Option<String>,
    /// Subscription type, e.g. `FREE`, `PRO`, `PREMIUM`
    #[serde(default)]
    pub subscription_type: Option<String>,
}

impl Principal {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role: None,
            subscription_type: None,
        }
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self
    }

    pub fn with_subscription(mut self, subscription_type: impl Into<String>) -> Self {
        self.subscription_type = Some(subscription_type.into());
        self
    }
}
