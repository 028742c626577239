//! Who is making the request, and which tier they fall into.

use super::types::{Subject, Tier};
use crate::auth::Principal;
use axum::extract::{ConnectInfo, Request};
use std::net::{IpAddr, SocketAddr};

const ADMIN_ROLES: [&str; 2] = ["ADMIN", "SUPER_ADMIN"];

/// The parts of an inbound request the limiter looks at
#[derive(Debug, Clone, Default)]
pub struct RequestMeta {
    pub principal: Option<Principal>,
    pub path: String,
    /// Raw value of the trusted proxy header
    pub forwarded_for: Option<String>,
    pub remote_addr: Option<IpAddr>,
}

impl RequestMeta {
    /// Collect request metadata
    ///
    /// `trusted_header` names the proxy header carrying the client address.
    pub fn from_request(request: &Request, trusted_header: &str) -> Self {
        Self {
            principal: request.extensions().get::<Principal>().cloned(),
            path: request.uri().path().to_string(),
            forwarded_for: request
                .headers()
                .get(trusted_header)
                .and_then(|v| v.to_str().ok())
                .map(|s| s.to_string()),
            remote_addr: request
                .extensions()
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ci| ci.0.ip()),
        }
    }
}

/// Resolve the rate-limit subject. User identity always wins over the client address.
pub fn resolve_subject(meta: &RequestMeta) -> Subject {
    if let Some(principal) = &meta.principal {
        if !principal.id.is_empty() {
            return Subject::User(principal.id.clone());
        }
    }

    let forwarded = meta
        .forwarded_for
        .as_deref()
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|ip| !ip.is_empty());

    let ip = match (forwarded, meta.remote_addr) {
        (Some(ip), _) => ip.to_string(),
        (None, Some(addr)) => addr.to_string(),
        (None, None) => "unknown".to_string(),
    };

    Subject::Ip(ip)
}

/// Resolve exactly one tier; an administrative role outranks any subscription
pub fn resolve_tier(principal: Option<&Principal>) -> Tier {
    let Some(principal) = principal else {
        return Tier::Anonymous;
    };

    let is_admin = principal
        .role
        .as_deref()
        .map(|role| ADMIN_ROLES.iter().any(|r| role.eq_ignore_ascii_case(r)))
        .unwrap_or(false);
    if is_admin {
        return Tier::Admin;
    }

    match principal
        .subscription_type
        .as_deref()
        .map(str::to_ascii_uppercase)
        .as_deref()
    {
        Some("PREMIUM") => Tier::Premium,
        Some("PRO") | Some("BASIC") => Tier::Basic,
        _ => Tier::Free,
    }
}
