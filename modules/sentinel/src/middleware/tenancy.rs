//! Tenant isolation middleware
//!
//! All non-exempt endpoints require `X-Tenant-Id`. The identifier is
//! validated (length and character set) before any handler runs; handlers
//! receive it via request extensions and must scope every query by it.
//!
//! Exemption is by router construction: health, metrics, and docs routers are
//! assembled without this layer, so there is no path allowlist to drift.

use axum::{
    body::Body,
    extract::Request,
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::error::AppError;
use crate::middleware::correlation::correlation_id_from_extensions;

pub const TENANT_ID_HEADER: &str = "x-tenant-id";

/// Tenant identifier extracted from `X-Tenant-Id`
#[derive(Debug, Clone)]
pub struct TenantId(pub String);

impl TenantId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Validate a tenant identifier: 1..=64 chars from `[A-Za-z0-9_-]`.
pub fn is_valid_tenant_id(s: &str) -> bool {
    !s.is_empty()
        && s.len() <= 64
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

pub async fn require_tenant_middleware(mut req: Request<Body>, next: Next) -> Response {
    let tenant = req
        .headers()
        .get(TENANT_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string());

    match tenant {
        Some(id) if is_valid_tenant_id(&id) => {
            req.extensions_mut().insert(TenantId(id));
            next.run(req).await
        }
        _ => {
            let correlation_id = correlation_id_from_extensions(req.extensions());
            AppError::TenantRequired
                .with_correlation(correlation_id)
                .into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_well_formed_identifiers() {
        assert!(is_valid_tenant_id("demo-3pl"));
        assert!(is_valid_tenant_id("ACME_retail_01"));
        assert!(is_valid_tenant_id("t"));
        assert!(is_valid_tenant_id(&"a".repeat(64)));
    }

    #[test]
    fn rejects_malformed_identifiers() {
        assert!(!is_valid_tenant_id(""));
        assert!(!is_valid_tenant_id(&"a".repeat(65)));
        assert!(!is_valid_tenant_id("tenant with spaces"));
        assert!(!is_valid_tenant_id("tenant/../other"));
        assert!(!is_valid_tenant_id("tenant;drop"));
        assert!(!is_valid_tenant_id("Ünïcode"));
    }
}
