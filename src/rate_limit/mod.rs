//! Tiered, per-endpoint rate limiting
//!
//! Every request is charged against a counter keyed by its subject (user id
//! or client address) and endpoint category. The budget comes from the
//! subject's tier, scaled by the category's sensitivity:
//!
//! ```text
//! adjusted = max(1, floor(points * sensitivity))
//! ```
//!
//! Exceeding the budget rejects the request for the rest of the window and,
//! for tiers with a block duration, places the subject under a separate block
//! marker that may outlast the window. If the counter store is unavailable
//! the limiter fails open.
//!
//! # Example
//!
//! ```rust,no_run
//! use songbook_edge::rate_limit::{MemoryStore, RateLimitPolicy, RateLimiter, RequestMeta};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() {
//!     let limiter = RateLimiter::new(Arc::new(MemoryStore::new()), RateLimitPolicy::default());
//!
//!     let meta = RequestMeta {
//!         path: "/api/songs/42".to_string(),
//!         remote_addr: Some("203.0.113.7".parse().unwrap()),
//!         ..Default::default()
//!     };
//!
//!     let decision = limiter.check(&meta).await;
//!     assert!(decision.is_allowed());
//! }
//! ```

pub mod engine;
pub mod identity;
pub mod lua_scripts;
pub mod middleware;
pub mod policy;
pub mod redis;
pub mod store;
pub mod types;

// Re-export commonly used types
pub use engine::RateLimiter;
pub use identity::{resolve_subject, resolve_tier, RequestMeta};
pub use middleware::{add_rate_limit_headers, rate_limit_middleware};
pub use policy::{EndpointRule, EndpointTable, RateLimitPolicy, TierPolicy};
pub use redis::RedisStore;
pub use store::{MemoryStore, RateLimitStore, StoreError};
pub use types::{Decision, Quota, RateLimitResult, Subject, Tier};
