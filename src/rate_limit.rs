use axum::{
    extract::{ConnectInfo, Request},
    http::StatusCode,
    middleware::Next,
    response::Response,
};
use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use std::{net::SocketAddr, num::NonZeroU32, sync::Arc};
use tracing::warn;

pub const REQUESTS_PER_MINUTE: u32 = 60;
pub const TASK_REQUESTS_PER_MINUTE: u32 = 10;

#[derive(Clone)]
pub struct RateLimitConfig {
    pub general_limiter: Arc<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>,
    pub task_limiter: Arc<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>,
}

impl RateLimitConfig {
    pub fn new() -> Self {
        let general_quota = Quota::per_minute(NonZeroU32::new(REQUESTS_PER_MINUTE).unwrap());
        let task_quota = Quota::per_minute(NonZeroU32::new(TASK_REQUESTS_PER_MINUTE).unwrap());
        Self {
            general_limiter: Arc::new(RateLimiter::direct(general_quota)),
            task_limiter: Arc::new(RateLimiter::direct(task_quota)),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Enforces the general request quota for every request, and the
/// stricter task-creation quota for `POST /tasks`. Exceeding either
/// returns `429` before the request reaches auth or the handler.
pub async fn rate_limit_middleware(
    axum::extract::State(config): axum::extract::State<Arc<RateLimitConfig>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let path = request.uri().path().to_string();
    let is_task_creation = path.starts_with("/tasks") && request.method() == "POST";

    if is_task_creation && config.task_limiter.check().is_err() {
        warn!(ip = %addr.ip(), path = %path, "task creation rate limit exceeded");
        return Err(StatusCode::TOO_MANY_REQUESTS);
    }

    if config.general_limiter.check().is_err() {
        warn!(ip = %addr.ip(), path = %path, "general rate limit exceeded");
        return Err(StatusCode::TOO_MANY_REQUESTS);
    }

    Ok(next.run(request).await)
}

pub fn extract_client_ip(request: &Request) -> String {
    if let Some(forwarded_for) = request.headers().get("x-forwarded-for") {
        if let Ok(ip_str) = forwarded_for.to_str() {
            if let Some(first_ip) = ip_str.split(',').next() {
                return first_ip.trim().to_string();
            }
        }
    }

    if let Some(real_ip) = request.headers().get("x-real-ip") {
        if let Ok(ip_str) = real_ip.to_str() {
            return ip_str.to_string();
        }
    }

    "unknown".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_limiters_admit_initial_requests() {
        let config = RateLimitConfig::new();
        assert!(config.general_limiter.check().is_ok());
        assert!(config.task_limiter.check().is_ok());
    }

    #[test]
    fn task_limiter_is_stricter_than_general() {
        let config = RateLimitConfig::new();
        let mut task_admitted = 0;
        for _ in 0..TASK_REQUESTS_PER_MINUTE + 5 {
            if config.task_limiter.check().is_ok() {
                task_admitted += 1;
            }
        }
        assert_eq!(task_admitted, TASK_REQUESTS_PER_MINUTE);
    }

    #[test]
    fn extract_client_ip_prefers_forwarded_for() {
        let request = Request::builder()
            .header("x-forwarded-for", "203.0.113.5, 10.0.0.1")
            .body(axum::body::Body::empty())
            .unwrap();
        assert_eq!(extract_client_ip(&request), "203.0.113.5");
    }
}
