//! Admin bearer-token authentication
//!
//! HS256 JWTs with a `role` claim; admin endpoints require `role == "admin"`.
//! Tokens carry `sub`, `role`, `iat`, `exp`.

use axum::{
    body::Body,
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::{Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::middleware::correlation::correlation_id_from_extensions;
use crate::state::AppState;

pub const ADMIN_ROLE: &str = "admin";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminClaims {
    pub sub: String,
    pub role: String,
    pub iat: i64,
    pub exp: i64,
}

/// Sign an admin token. Used by operator tooling and tests.
pub fn sign_admin_token(
    secret: &str,
    subject: &str,
    ttl_minutes: i64,
) -> Result<String, AppError> {
    let now = Utc::now();
    let claims = AdminClaims {
        sub: subject.to_string(),
        role: ADMIN_ROLE.to_string(),
        iat: now.timestamp(),
        exp: (now + Duration::minutes(ttl_minutes)).timestamp(),
    };

    jsonwebtoken::encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| AppError::Internal(format!("token signing: {e}")))
}

/// Validate a bearer token and enforce the admin role.
pub fn validate_admin_token(secret: &str, token: &str) -> Result<AdminClaims, AppError> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_exp = true;

    let data = jsonwebtoken::decode::<AdminClaims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )
    .map_err(|e| AppError::Unauthorized(format!("invalid token: {e}")))?;

    if data.claims.role != ADMIN_ROLE {
        return Err(AppError::Forbidden(format!(
            "role '{}' may not access admin endpoints",
            data.claims.role
        )));
    }

    Ok(data.claims)
}

/// Middleware guarding `/admin/*` routes.
pub async fn require_admin_middleware(
    State(state): State<AppState>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    let correlation_id = correlation_id_from_extensions(req.extensions());

    let token = req
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|s| s.to_string());

    let Some(token) = token else {
        return AppError::Unauthorized("missing bearer token".to_string())
            .with_correlation(correlation_id)
            .into_response();
    };

    match validate_admin_token(&state.config.jwt_secret, &token) {
        Ok(claims) => {
            req.extensions_mut().insert(claims);
            next.run(req).await
        }
        Err(err) => err.with_correlation(correlation_id).into_response(),
    }
}
