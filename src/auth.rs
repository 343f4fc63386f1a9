//! Caller authentication and client identification.
//!
//! Two credential kinds reach the API:
//! - external integrations send an opaque API token (`Authorization: Bearer`),
//!   stored as a SHA-256 hex digest in `api_tokens`;
//! - signed-in users send an HS256 JWT whose `sub` is their profile id.
//!
//! Both resolve to a tenant and are cached for `AUTH_CACHE_TTL_SECS`.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::async_trait;
use axum::extract::{ConnectInfo, FromRequestParts};
use axum::http::request::Parts;
use axum::http::{header, HeaderMap};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::errors::AppError;
use crate::handlers::AppState;

/// SHA-256 of the raw token, lowercase hex.
pub fn hash_api_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

/// Claims we read from a user JWT. Other claims are ignored.
#[derive(Debug, Serialize, Deserialize)]
pub struct JwtClaims {
    pub sub: String,
    pub exp: usize,
    #[serde(default)]
    pub iat: Option<usize>,
    #[serde(default)]
    pub email: Option<String>,
}

/// Validates signature and expiry, returning the subject as a user id.
pub fn decode_user_token(token: &str, secret: &str) -> Result<Uuid, AppError> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_aud = false;

    let data = decode::<JwtClaims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )
    .map_err(|e| {
        tracing::debug!("JWT rejected: {}", e);
        AppError::Unauthorized("Invalid or expired token".to_string())
    })?;

    Uuid::parse_str(&data.claims.sub)
        .map_err(|_| AppError::Unauthorized("Invalid token subject".to_string()))
}

fn bearer_token(headers: &HeaderMap) -> Result<&str, AppError> {
    let value = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::Unauthorized("Missing Authorization header".to_string()))?;

    let token = value
        .strip_prefix("Bearer ")
        .or_else(|| value.strip_prefix("bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| AppError::Unauthorized("Expected a Bearer token".to_string()))?;

    Ok(token)
}

/// An external integration identified by its API token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApiTokenAuth {
    pub token_id: Uuid,
    pub tenant_id: Uuid,
}

impl ApiTokenAuth {
    /// Resolves the bearer token in `headers`.
    ///
    /// Exposed separately from the extractor so `POST /leads` can audit
    /// failed attempts.
    pub async fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<Self, AppError> {
        let token = bearer_token(headers)?;
        let hash = hash_api_token(token);

        if let Some(owner) = state.api_token_cache.get(&hash).await {
            return Ok(Self {
                token_id: owner.id,
                tenant_id: owner.tenant_id,
            });
        }

        let owner = state.store.find_api_token(&hash).await?.ok_or_else(|| {
            tracing::warn!("Rejected unknown or inactive API token");
            AppError::Unauthorized("Invalid API token".to_string())
        })?;

        state.api_token_cache.insert(hash, owner.clone()).await;
        Ok(Self {
            token_id: owner.id,
            tenant_id: owner.tenant_id,
        })
    }
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for ApiTokenAuth {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        Self::authenticate(state, &parts.headers).await
    }
}

/// A signed-in user of an active profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserAuth {
    pub user_id: Uuid,
    pub tenant_id: Uuid,
}

impl UserAuth {
    pub async fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<Self, AppError> {
        let token = bearer_token(headers)?;
        let user_id = decode_user_token(token, &state.config.jwt_secret)?;

        let profile = match state.profile_cache.get(&user_id).await {
            Some(profile) => profile,
            None => {
                let profile = state
                    .store
                    .find_profile(user_id)
                    .await?
                    .ok_or_else(|| AppError::Unauthorized("Unknown user".to_string()))?;
                state.profile_cache.insert(user_id, profile.clone()).await;
                profile
            }
        };

        if !profile.is_active {
            return Err(AppError::Unauthorized("User is inactive".to_string()));
        }

        Ok(Self {
            user_id,
            tenant_id: profile.tenant_id,
        })
    }
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for UserAuth {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        Self::authenticate(state, &parts.headers).await
    }
}

/// Best-effort caller address used as the rate-limit identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIp(pub String);

impl ClientIp {
    pub fn resolve(headers: &HeaderMap, peer: Option<SocketAddr>) -> Self {
        let forwarded = headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty());

        let real_ip = headers
            .get("x-real-ip")
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty());

        let ip = forwarded
            .or(real_ip)
            .map(str::to_string)
            .or_else(|| peer.map(|addr| addr.ip().to_string()))
            .unwrap_or_else(|| "unknown".to_string());

        Self(ip)
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for ClientIp
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);
        Ok(Self::resolve(&parts.headers, peer))
    }
}
