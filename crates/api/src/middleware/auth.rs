//! Operator authentication for the ingress routes.
//!
//! Tokens are HS256 JWTs signed with `JWT_SECRET`; mint one with
//! `prefsync issue-token --operator <name>`. The `OperatorAuth` extractor
//! validates the `Authorization: Bearer <token>` header.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use chrono::{Duration, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};

use prefsync_common::error::AppError;

use crate::state::AppState;

/// JWT claims stored in the token.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    /// Subject: the operator or calling service name
    pub sub: String,
    /// Expiration time (UNIX timestamp)
    pub exp: i64,
    /// Issued at (UNIX timestamp)
    pub iat: i64,
}

/// Authenticated operator extracted from the bearer token.
#[derive(Debug, Clone)]
pub struct OperatorAuth {
    pub operator: String,
    pub claims: Claims,
}

/// Encode a token for an operator.
pub fn encode_jwt(operator: &str, secret: &str, expiry_hours: u64) -> Result<String, AppError> {
    if operator.trim().is_empty() {
        return Err(AppError::Validation("Operator name must not be empty".to_string()));
    }

    let now = Utc::now();
    let exp = i64::try_from(expiry_hours)
        .ok()
        .and_then(Duration::try_hours)
        .and_then(|ttl| now.checked_add_signed(ttl))
        .ok_or_else(|| {
            AppError::Validation(format!("Token expiry of {} hours is out of range", expiry_hours))
        })?;

    let claims = Claims {
        sub: operator.to_string(),
        exp: exp.timestamp(),
        iat: now.timestamp(),
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| AppError::Auth(format!("Failed to encode JWT: {}", e)))
}

/// Decode and validate a token.
pub fn decode_jwt(token: &str, secret: &str) -> Result<Claims, AppError> {
    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|e| AppError::Auth(format!("Invalid token: {}", e)))?;

    Ok(token_data.claims)
}

impl FromRequestParts<AppState> for OperatorAuth {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.strip_prefix("Bearer "))
            .ok_or_else(|| {
                AppError::Auth("Missing or invalid Authorization header. Use 'Bearer <JWT>'".to_string())
            })?;

        let claims = decode_jwt(token, &state.config.jwt_secret)?;
        Ok(OperatorAuth {
            operator: claims.sub.clone(),
            claims,
        })
    }
}
