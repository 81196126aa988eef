use std::{
    net::{IpAddr, SocketAddr},
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};

use {
    axum::{
        extract::{ConnectInfo, State},
        http::{HeaderMap, Method, StatusCode},
        middleware::Next,
        response::{IntoResponse, Json, Response},
    },
    dashmap::{DashMap, mapref::entry::Entry},
    tracing::debug,
    wagate_config::ThrottleConfig,
};

use crate::server::AppState;

const CLEANUP_EVERY_REQUESTS: u64 = 512;
const WINDOW: Duration = Duration::from_secs(60);

/// Fixed-window request counter keyed by client IP and route scope.
#[derive(Clone)]
pub struct RequestThrottle {
    limits: ThrottleLimits,
    buckets: Arc<DashMap<ThrottleKey, WindowState>>,
    requests_seen: Arc<AtomicU64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum ThrottleScope {
    Send,
    Upload,
    Api,
}

impl ThrottleScope {
    fn from_request(method: &Method, path: &str) -> Option<Self> {
        let route = ["/sec-server/wa", "/wa"]
            .iter()
            .find_map(|prefix| path.strip_prefix(prefix))
            .filter(|rest| rest.is_empty() || rest.starts_with('/'))?;

        if method == Method::POST {
            match route {
                "/send" | "/send-files" | "/send-file" => return Some(Self::Send),
                "/upload" => return Some(Self::Upload),
                _ => {},
            }
        }
        Some(Self::Api)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct ThrottleKey {
    ip: IpAddr,
    scope: ThrottleScope,
}

#[derive(Debug, Clone, Copy)]
struct WindowState {
    started_at: Instant,
    count: usize,
}

#[derive(Debug, Clone, Copy)]
struct RateLimit {
    max_requests: usize,
    window: Duration,
}

impl RateLimit {
    fn per_minute(max_requests: usize) -> Self {
        Self {
            max_requests,
            window: WINDOW,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct ThrottleLimits {
    send: RateLimit,
    upload: RateLimit,
    api: RateLimit,
}

impl From<&ThrottleConfig> for ThrottleLimits {
    fn from(config: &ThrottleConfig) -> Self {
        Self {
            send: RateLimit::per_minute(config.send_per_minute),
            upload: RateLimit::per_minute(config.upload_per_minute),
            api: RateLimit::per_minute(config.api_per_minute),
        }
    }
}

enum ThrottleDecision {
    Allowed,
    Denied { retry_after: Duration },
}

impl RequestThrottle {
    #[must_use]
    pub fn from_config(config: &ThrottleConfig) -> Self {
        Self::with_limits(ThrottleLimits::from(config))
    }

    fn with_limits(limits: ThrottleLimits) -> Self {
        Self {
            limits,
            buckets: Arc::new(DashMap::new()),
            requests_seen: Arc::new(AtomicU64::new(0)),
        }
    }

    fn limit_for(&self, scope: ThrottleScope) -> RateLimit {
        match scope {
            ThrottleScope::Send => self.limits.send,
            ThrottleScope::Upload => self.limits.upload,
            ThrottleScope::Api => self.limits.api,
        }
    }

    fn check(&self, ip: IpAddr, scope: ThrottleScope) -> ThrottleDecision {
        self.check_at(ip, scope, Instant::now())
    }

    fn check_at(&self, ip: IpAddr, scope: ThrottleScope, now: Instant) -> ThrottleDecision {
        let limit = self.limit_for(scope);
        if limit.max_requests == 0 {
            return ThrottleDecision::Denied {
                retry_after: limit.window.max(Duration::from_secs(1)),
            };
        }

        let key = ThrottleKey { ip, scope };
        let decision = match self.buckets.entry(key) {
            Entry::Occupied(mut occupied) => {
                let state = occupied.get_mut();
                let elapsed = now.duration_since(state.started_at);
                if elapsed >= limit.window {
                    state.started_at = now;
                    state.count = 1;
                    ThrottleDecision::Allowed
                } else if state.count < limit.max_requests {
                    state.count += 1;
                    ThrottleDecision::Allowed
                } else {
                    ThrottleDecision::Denied {
                        retry_after: limit.window.saturating_sub(elapsed),
                    }
                }
            },
            Entry::Vacant(vacant) => {
                vacant.insert(WindowState {
                    started_at: now,
                    count: 1,
                });
                ThrottleDecision::Allowed
            },
        };

        self.cleanup_if_needed(now);
        decision
    }

    fn cleanup_if_needed(&self, now: Instant) {
        let seen = self.requests_seen.fetch_add(1, Ordering::Relaxed) + 1;
        if !seen.is_multiple_of(CLEANUP_EVERY_REQUESTS) {
            return;
        }
        let stale_after = WINDOW.saturating_mul(3);
        self.buckets
            .retain(|_, state| now.duration_since(state.started_at) <= stale_after);
    }
}

pub async fn throttle_gate(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    request: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Response {
    let Some(scope) = ThrottleScope::from_request(request.method(), request.uri().path()) else {
        return next.run(request).await;
    };

    let client_ip = resolve_client_ip(request.headers(), addr, state.gateway.behind_proxy);
    match state.request_throttle.check(client_ip, scope) {
        ThrottleDecision::Allowed => next.run(request).await,
        ThrottleDecision::Denied { retry_after } => {
            debug!(%client_ip, ?scope, "request throttled");
            rate_limited_response(retry_after)
        },
    }
}

fn rate_limited_response(retry_after: Duration) -> Response {
    let retry_after_secs = retry_after.as_secs().max(1);
    let mut response = (
        StatusCode::TOO_MANY_REQUESTS,
        Json(serde_json::json!({
            "ok": false,
            "error": "too many requests",
            "retryAfterSeconds": retry_after_secs,
        })),
    )
        .into_response();

    if let Ok(value) = retry_after_secs.to_string().parse() {
        response
            .headers_mut()
            .insert(axum::http::header::RETRY_AFTER, value);
    }
    response
}

fn resolve_client_ip(headers: &HeaderMap, addr: SocketAddr, behind_proxy: bool) -> IpAddr {
    if behind_proxy && let Some(ip) = extract_forwarded_ip(headers) {
        return ip;
    }
    addr.ip()
}

fn extract_forwarded_ip(headers: &HeaderMap) -> Option<IpAddr> {
    let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());

    if let Some(ip) = header("x-forwarded-for")
        .and_then(|xff| xff.split(',').find_map(|candidate| parse_ip(candidate.trim())))
    {
        return Some(ip);
    }
    header("x-real-ip").and_then(|xri| parse_ip(xri.trim()))
}

fn parse_ip(value: &str) -> Option<IpAddr> {
    if value.is_empty() {
        return None;
    }
    value
        .parse::<IpAddr>()
        .ok()
        .or_else(|| value.parse::<SocketAddr>().ok().map(|addr| addr.ip()))
}
