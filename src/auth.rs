//! Admin capability tokens.
//!
//! An admin token is an HS256 JWT signed with `SECRET_KEY` and carrying
//! `admin: true`. It is presented either as `Authorization: Bearer <token>`
//! or in the HttpOnly `admin_token` cookie, never in the URL.

use crate::error::AppError;
use crate::server::SharedState;
use anyhow::{Context, Result};
use axum::extract::{Request, State};
use axum::http::{header, HeaderMap};
use axum::middleware::Next;
use axum::response::Response;
use chrono::{Duration, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

pub const ADMIN_COOKIE: &str = "admin_token";

/// Default token lifetime: one year.
pub const DEFAULT_TOKEN_HOURS: i64 = 8760;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminClaims {
    #[serde(default)]
    pub admin: bool,
    pub exp: i64,
    pub iat: i64,
    pub jti: String,
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Admin token required")]
    MissingToken,
    #[error("Admin token expired")]
    Expired,
    #[error("Invalid admin token")]
    Invalid(#[source] jsonwebtoken::errors::Error),
    #[error("Token does not grant admin access")]
    NotAdmin,
}

pub fn issue_admin_token(secret: &str, valid_for: Duration) -> Result<String> {
    let now = Utc::now();
    let claims = AdminClaims {
        admin: true,
        iat: now.timestamp(),
        exp: (now + valid_for).timestamp(),
        jti: uuid::Uuid::new_v4().simple().to_string(),
    };

    let token = encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .context("Failed to sign admin token")?;

    info!(
        "Issued admin token {} valid for {} hours",
        claims.jti,
        valid_for.num_hours()
    );
    Ok(token)
}

pub fn verify_admin_token(secret: &str, token: &str) -> Result<AdminClaims, AuthError> {
    let validation = Validation::new(Algorithm::HS256);

    let claims = decode::<AdminClaims>(token, &DecodingKey::from_secret(secret.as_bytes()), &validation)
        .map(|data| data.claims)
        .map_err(|e| {
            if matches!(e.kind(), ErrorKind::ExpiredSignature) {
                AuthError::Expired
            } else {
                AuthError::Invalid(e)
            }
        })?;

    if !claims.admin {
        return Err(AuthError::NotAdmin);
    }
    Ok(claims)
}

/// Bearer token from the `Authorization` header, else the admin cookie.
pub fn token_from_headers(headers: &HeaderMap) -> Option<String> {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty());
    if let Some(token) = bearer {
        return Some(token.to_string());
    }

    crate::session::read_cookie(headers, ADMIN_COOKIE)
}

/// Rejects requests without a valid admin token: 401 when absent, 403 when
/// expired, malformed or not an admin token.
pub async fn require_admin(
    State(state): State<SharedState>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = token_from_headers(request.headers()).ok_or(AuthError::MissingToken)?;

    match verify_admin_token(&state.config.secret_key, &token) {
        Ok(claims) => {
            tracing::debug!("Admin access granted (jti: {})", claims.jti);
            Ok(next.run(request).await)
        }
        Err(e) => {
            warn!("Rejected admin request to {}: {}", request.uri().path(), e);
            Err(e.into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    const SECRET: &str = "test-secret";

    #[test]
    fn test_issue_and_verify() {
        let token = issue_admin_token(SECRET, Duration::hours(1)).unwrap();
        let claims = verify_admin_token(SECRET, &token).expect("valid");

        assert!(claims.admin);
        assert!(claims.exp > claims.iat);
        assert_eq!(claims.jti.len(), 32);
    }

    #[test]
    fn test_wrong_secret_is_invalid() {
        let token = issue_admin_token(SECRET, Duration::hours(1)).unwrap();
        assert!(matches!(
            verify_admin_token("other", &token),
            Err(AuthError::Invalid(_))
        ));
    }

    #[test]
    fn test_expired_token() {
        let token = issue_admin_token(SECRET, Duration::hours(-2)).unwrap();
        assert!(matches!(
            verify_admin_token(SECRET, &token),
            Err(AuthError::Expired)
        ));
    }

    #[test]
    fn test_non_admin_token() {
        let now = Utc::now().timestamp();
        let claims = AdminClaims {
            admin: false,
            iat: now,
            exp: now + 3600,
            jti: "x".into(),
        };
        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .unwrap();

        assert!(matches!(
            verify_admin_token(SECRET, &token),
            Err(AuthError::NotAdmin)
        ));
    }

    #[test]
    fn test_garbage_token() {
        assert!(matches!(
            verify_admin_token(SECRET, "not-a-jwt"),
            Err(AuthError::Invalid(_))
        ));
    }

    #[test]
    fn test_token_from_headers_prefers_bearer() {
        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, HeaderValue::from_static("admin_token=from-cookie"));
        assert_eq!(token_from_headers(&headers).as_deref(), Some("from-cookie"));

        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_static("Bearer from-header"),
        );
        assert_eq!(token_from_headers(&headers).as_deref(), Some("from-header"));

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert_eq!(token_from_headers(&headers).as_deref(), Some("from-cookie"));
    }
}
