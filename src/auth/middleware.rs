use super::JwtValidator;
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;
use tracing::debug;

/// Shared state for the authentication middleware
#[derive(Clone, Default)]
pub struct AuthState {
    validator: Option<Arc<JwtValidator>>,
}

impl AuthState {
    pub fn new(validator: Option<JwtValidator>) -> Self {
        Self {
            validator: validator.map(Arc::new),
        }
    }
}

/// Attach a [`super::Principal`] to the request when it carries a valid bearer token.
///
/// Requests without a token, or with one that fails validation, continue as
/// anonymous. Enforcing authentication is left to the upstream API.
pub async fn auth_middleware(
    State(state): State<AuthState>,
    mut request: Request,
    next: Next,
) -> Response {
    if let Some(validator) = &state.validator {
        if request.headers().contains_key(http::header::AUTHORIZATION) {
            match validator.validate(request.headers()) {
                Ok(principal) => {
                    debug!(user_id = %principal.id, "Bearer token accepted");
                    request.extensions_mut().insert(principal);
                }
                Err(e) => {
                    debug!(error = %e, "Bearer token rejected, treating request as anonymous");
                }
            }
        }
    }

    next.run(request).await
}
