use crate::config::JwtConfig;
use crate::error::{ApiError, Result};
use axum::http::HeaderMap;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

use super::Principal;

/// JWT claims structure
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (external user ID)
    pub sub: String,
    /// Issuer
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
    /// Audience
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aud: Option<String>,
    /// Expiration time (Unix timestamp)
    pub exp: usize,
    /// Issued at (Unix timestamp)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iat: Option<usize>,
    /// Account role custom claim
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    /// Subscription custom claim
    #[serde(
        default,
        rename = "subscriptionType",
        skip_serializing_if = "Option::is_none"
    )]
    pub subscription_type: Option<String>,
}

impl From<Claims> for Principal {
    fn from(claims: Claims) -> Self {
        Self {
            id: claims.sub,
            role: claims.role,
            subscription_type: claims.subscription_type,
        }
    }
}

/// JWT validator
pub struct JwtValidator {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtValidator {
    /// Create a new JWT validator from configuration
    pub fn new(config: &JwtConfig) -> Result<Self> {
        let algorithm = Self::parse_algorithm(&config.algorithm)?;

        let decoding_key = match algorithm {
            Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512 => {
                let secret = config.secret.as_ref().ok_or_else(|| {
                    ApiError::Config(
                        "JWT secret is required for HS256/HS384/HS512 algorithms".to_string(),
                    )
                })?;
                DecodingKey::from_secret(secret.as_bytes())
            }
            Algorithm::RS256 | Algorithm::RS384 | Algorithm::RS512 => {
                let public_key = config.public_key.as_ref().ok_or_else(|| {
                    ApiError::Config(
                        "JWT public key is required for RS256/RS384/RS512 algorithms".to_string(),
                    )
                })?;
                DecodingKey::from_rsa_pem(public_key.as_bytes())
                    .map_err(|e| ApiError::Config(format!("Invalid RSA public key: {}", e)))?
            }
            _ => {
                return Err(ApiError::Config(format!(
                    "Unsupported JWT algorithm: {}",
                    config.algorithm
                )))
            }
        };

        let mut validation = Validation::new(algorithm);

        if let Some(issuer) = &config.issuer {
            validation.set_issuer(&[issuer]);
        }

        if let Some(audience) = &config.audience {
            validation.set_audience(&[audience]);
        }

        validation.validate_exp = true;

        Ok(Self {
            decoding_key,
            validation,
        })
    }

    /// Validate the bearer token from request headers and build the principal
    pub fn validate(&self, headers: &HeaderMap) -> Result<Principal> {
        let token = Self::extract_token(headers)?;

        let token_data = decode::<Claims>(&token, &self.decoding_key, &self.validation)
            .map_err(|e| ApiError::InvalidToken(format!("Token validation failed: {}", e)))?;

        Ok(token_data.claims.into())
    }

    /// Extract JWT token from Authorization header
    fn extract_token(headers: &HeaderMap) -> Result<String> {
        let auth_header = headers
            .get(http::header::AUTHORIZATION)
            .ok_or(ApiError::MissingCredentials)?;

        let auth_str = auth_header
            .to_str()
            .map_err(|_| ApiError::InvalidToken("Invalid authorization header".to_string()))?;

        if let Some(token) = auth_str.strip_prefix("Bearer ") {
            Ok(token.to_string())
        } else if let Some(token) = auth_str.strip_prefix("bearer ") {
            Ok(token.to_string())
        } else {
            Err(ApiError::InvalidToken(
                "Authorization header must start with 'Bearer '".to_string(),
            ))
        }
    }

    /// Parse algorithm string to Algorithm enum
    fn parse_algorithm(algo: &str) -> Result<Algorithm> {
        match algo.to_uppercase().as_str() {
            "HS256" => Ok(Algorithm::HS256),
            "HS384" => Ok(Algorithm::HS384),
            "HS512" => Ok(Algorithm::HS512),
            "RS256" => Ok(Algorithm::RS256),
            "RS384" => Ok(Algorithm::RS384),
            "RS512" => Ok(Algorithm::RS512),
            _ => Err(ApiError::Config(format!("Unsupported algorithm: {}", algo))),
        }
    }
}
