//! Authentication extractor, client-IP resolution, and the blanket rate
//! limit applied in front of every API route.

use std::net::SocketAddr;

use axum::{
    async_trait,
    extract::{ConnectInfo, Request, State},
    http::{header::AUTHORIZATION, request::Parts, HeaderMap},
    middleware::Next,
    response::Response,
};

use crate::auth::Claims;
use crate::error::AppError;
use crate::ratelimit::Bucket;
use crate::services::AppServices;

/// Best-effort client address: the first `X-Forwarded-For` hop when a
/// proxy fills it in, the socket peer address otherwise.
pub fn client_ip(headers: &HeaderMap, addr: SocketAddr) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| addr.ip().to_string())
}

/// Authenticated requester, extracted from the bearer token.
pub struct AuthUser(pub Claims);

#[async_trait]
impl axum::extract::FromRequestParts<AppServices> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppServices,
    ) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .ok_or(AppError::Unauthorized)?;

        let claims = state.signer.verify(token)?;
        Ok(AuthUser(claims))
    }
}

/// Blanket per-IP ceiling in front of every API route.
pub async fn general_rate_limit(
    State(services): State<AppServices>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let ip = client_ip(request.headers(), addr);
    services
        .ratelimiter
        .acquire(Bucket::General, &ip)
        .await?
        .enforce()?;
    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn addr() -> SocketAddr {
        "10.0.0.9:4242".parse().unwrap()
    }

    #[test]
    fn test_client_ip_prefers_forwarded_header() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.7, 10.0.0.1"),
        );
        assert_eq!(client_ip(&headers, addr()), "203.0.113.7");
    }

    #[test]
    fn test_client_ip_falls_back_to_peer() {
        assert_eq!(client_ip(&HeaderMap::new(), addr()), "10.0.0.9");
    }

    #[test]
    fn test_client_ip_ignores_empty_header() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static(""));
        assert_eq!(client_ip(&headers, addr()), "10.0.0.9");
    }
}
