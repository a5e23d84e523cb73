/// Request middleware: client identification and pre-handler rate limiting
use crate::{context::AppContext, error::PortalError, rate_limit::RouteClass};
use axum::{
    extract::{ConnectInfo, Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use std::net::SocketAddr;

/// Extract bearer token from Authorization header
pub fn extract_bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get("authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .map(|s| s.trim().to_string())
}

/// Resolve the client address, honouring X-Forwarded-For only behind a trusted proxy
pub fn client_ip(req: &Request, trust_proxy: bool) -> String {
    if trust_proxy {
        let forwarded = req
            .headers()
            .get("x-forwarded-for")
            .and_then(|h| h.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty());
        if let Some(ip) = forwarded {
            return ip.to_string();
        }
    }

    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Rate limiting middleware
///
/// Every request draws from the global bucket; login, redeem and admin login
/// additionally draw from a per-client fixed window before the handler runs.
pub async fn rate_limit_middleware(
    State(ctx): State<AppContext>,
    req: Request,
    next: Next,
) -> Result<Response, PortalError> {
    let class = RouteClass::classify(req.method(), req.uri().path());
    let ip = client_ip(&req, ctx.config.service.trust_proxy);

    ctx.rate_limiter.check(class, &ip)?;

    Ok(next.run(req).await)
}
