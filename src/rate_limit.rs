/// Rate Limiting System
///
/// Two layers: a process-wide governor bucket that caps total throughput,
/// and fixed-window counters keyed by route class and client IP that gate
/// login, redemption and admin login before any saga step runs.
use crate::{
    clock::Clock,
    config::{RateLimitConfig, WindowLimit},
    error::{PortalError, PortalResult},
};
use dashmap::DashMap;
use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter as GovernorLimiter,
};
use std::{num::NonZeroU32, sync::Arc, time::Duration};

/// Outcome of a fixed-window check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDecision {
    pub allowed: bool,
    pub retry_after_secs: u64,
}

/// Fixed-window rate limiter contract
pub trait RateLimiter: Send + Sync {
    fn check(&self, key: &str, limit: u32, window_secs: u64) -> RateDecision;
}

/// In-process fixed-window counters
pub struct FixedWindowLimiter {
    windows: DashMap<String, (i64, u32)>,
    clock: Arc<dyn Clock>,
}

impl FixedWindowLimiter {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            windows: DashMap::new(),
            clock,
        }
    }

    /// Drop counters belonging to windows that have already closed
    pub fn prune(&self, max_window_secs: u64) {
        let now = self.clock.now().timestamp();
        let horizon = max_window_secs.max(1) as i64;
        self.windows
            .retain(|_, (window_start, _)| now - *window_start < horizon);
    }
}

impl RateLimiter for FixedWindowLimiter {
    fn check(&self, key: &str, limit: u32, window_secs: u64) -> RateDecision {
        let window_secs = window_secs.max(1) as i64;
        let now = self.clock.now().timestamp();
        let window_start = now - now.rem_euclid(window_secs);

        let mut entry = self.windows.entry(key.to_string()).or_insert((window_start, 0));
        if entry.0 != window_start {
            *entry = (window_start, 0);
        }

        if entry.1 >= limit {
            let retry_after = (window_start + window_secs - now).max(1) as u64;
            return RateDecision {
                allowed: false,
                retry_after_secs: retry_after,
            };
        }

        entry.1 += 1;
        RateDecision {
            allowed: true,
            retry_after_secs: 0,
        }
    }
}

/// Route classes with their own windows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteClass {
    Login,
    Redeem,
    AdminLogin,
}

impl RouteClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            RouteClass::Login => "login",
            RouteClass::Redeem => "redeem",
            RouteClass::AdminLogin => "admin_login",
        }
    }

    /// Classify a request path; other routes only see the global bucket
    pub fn classify(method: &axum::http::Method, path: &str) -> Option<Self> {
        if method != axum::http::Method::POST {
            return None;
        }
        match path {
            "/login" => Some(RouteClass::Login),
            "/redeem" => Some(RouteClass::Redeem),
            "/admin/login" => Some(RouteClass::AdminLogin),
            _ => None,
        }
    }
}

/// Pre-saga gate combining the global bucket with per-route windows
#[derive(Clone)]
pub struct RateLimitGate {
    enabled: bool,
    global: Arc<GovernorLimiter<NotKeyed, InMemoryState, DefaultClock>>,
    windows: Arc<dyn RateLimiter>,
    login: WindowLimit,
    redeem: WindowLimit,
    admin_login: WindowLimit,
}

impl RateLimitGate {
    pub fn new(config: &RateLimitConfig, windows: Arc<dyn RateLimiter>) -> Self {
        let rps = NonZeroU32::new(config.global_requests_per_second).unwrap_or(NonZeroU32::MIN);
        let burst = NonZeroU32::new(config.global_burst).unwrap_or(rps);
        let quota = Quota::per_second(rps).allow_burst(burst);

        Self {
            enabled: config.enabled,
            global: Arc::new(GovernorLimiter::direct(quota)),
            windows,
            login: config.login,
            redeem: config.redeem,
            admin_login: config.admin_login,
        }
    }

    fn limit_for(&self, class: RouteClass) -> WindowLimit {
        match class {
            RouteClass::Login => self.login,
            RouteClass::Redeem => self.redeem,
            RouteClass::AdminLogin => self.admin_login,
        }
    }

    /// Check the global bucket and, for gated routes, the client's window
    pub fn check(&self, class: Option<RouteClass>, client_ip: &str) -> PortalResult<()> {
        if !self.enabled {
            return Ok(());
        }

        if self.global.check().is_err() {
            return Err(PortalError::RateLimited {
                retry_after: Duration::from_secs(1),
            });
        }

        if let Some(class) = class {
            let limit = self.limit_for(class);
            let key = format!("{}:{}", class.as_str(), client_ip);
            let decision = self.windows.check(&key, limit.limit, limit.window_secs);

            if !decision.allowed {
                tracing::warn!(route = class.as_str(), client_ip, "rate limit exceeded");
                crate::metrics::RATE_LIMITED_TOTAL
                    .with_label_values(&[class.as_str()])
                    .inc();
                return Err(PortalError::RateLimited {
                    retry_after: Duration::from_secs(decision.retry_after_secs),
                });
            }
        }

        Ok(())
    }
}
