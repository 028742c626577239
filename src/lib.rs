pub mod auth;
pub mod config;
pub mod error;
pub mod metrics;
pub mod proxy;
pub mod rate_limit;

use crate::auth::middleware::AuthState;
use crate::auth::{auth_middleware, JwtValidator};
use crate::config::EdgeConfig;
use crate::error::{ApiError, Result};
use crate::metrics::{metrics_handler, MetricsService};
use crate::proxy::{proxy_handler, ProxyState};
use crate::rate_limit::{
    rate_limit_middleware, MemoryStore, RateLimitPolicy, RateLimitStore, RateLimiter, RedisStore,
};
use axum::{middleware, routing::get, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

/// How often expired in-memory counters are purged
const MEMORY_PURGE_INTERVAL: Duration = Duration::from_secs(300);

/// Build the edge application around a counter store
///
/// Layers run auth first, then the rate limiter, then the upstream relay.
/// `/health` is answered locally and never rate limited.
pub fn build_app(config: &EdgeConfig, store: Arc<dyn RateLimitStore>) -> Result<Router> {
    let validator = match config.auth.as_ref().and_then(|a| a.jwt.as_ref()) {
        Some(jwt) => Some(JwtValidator::new(jwt)?),
        None => None,
    };
    let auth_state = AuthState::new(validator);

    let proxy_state = ProxyState::new(
        &config.upstream.url,
        Duration::from_secs(config.server.timeout_secs),
    )?;

    let mut upstream = Router::new().fallback(proxy_handler).with_state(proxy_state);

    if config.rate_limiting.enabled {
        let limiter = RateLimiter::new(store, RateLimitPolicy::from_config(&config.rate_limiting));
        upstream = upstream.layer(middleware::from_fn_with_state(
            limiter,
            rate_limit_middleware,
        ));
    } else {
        warn!("Rate limiting is disabled");
    }

    let app = Router::new()
        .route("/health", get(|| async { "OK" }))
        .merge(upstream)
        .layer(middleware::from_fn_with_state(auth_state, auth_middleware))
        .layer(TraceLayer::new_for_http());

    Ok(app)
}

/// Pick the shared counter store; falls back to memory when Redis is unreachable
pub async fn create_store(config: &EdgeConfig) -> Arc<dyn RateLimitStore> {
    if let Some(redis) = &config.rate_limiting.redis {
        match RedisStore::new(&redis.url).await {
            Ok(store) => match store.ping().await {
                Ok(()) => {
                    info!("Redis connection successful, using Redis as rate limit store");
                    return Arc::new(store);
                }
                Err(e) => warn!(
                    "Redis ping failed: {}, falling back to in-memory rate limit store",
                    e
                ),
            },
            Err(e) => warn!(
                "Redis connection failed: {}, falling back to in-memory rate limit store",
                e
            ),
        }
    }

    info!("Using in-memory rate limit store");
    let store = Arc::new(MemoryStore::new());
    let purge = store.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(MEMORY_PURGE_INTERVAL);
        loop {
            interval.tick().await;
            purge.purge_expired();
        }
    });
    store
}

/// Initialize the edge server
pub async fn init_server(config: EdgeConfig) -> Result<()> {
    config.validate()?;

    info!("Starting songbook edge");
    info!(
        "Server listening on {}:{}",
        config.server.host, config.server.port
    );
    info!("Forwarding to upstream {}", config.upstream.url);

    let store = create_store(&config).await;
    let mut app = build_app(&config, store)?;

    if let Some(metrics_config) = &config.metrics {
        let service = MetricsService::new()?;
        app = app.route(
            &metrics_config.path,
            get(metrics_handler).with_state(service),
        );
    }

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(ApiError::Io)?;

    info!("Edge ready to accept connections");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .map_err(|e| ApiError::Internal(format!("Server error: {}", e)))?;

    Ok(())
}

/// Initialize tracing/logging; `LOG_FORMAT=json` selects structured output
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "songbook_edge=debug,tower_http=debug".into());

    if std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json")) {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .compact()
            .init();
    }
}
