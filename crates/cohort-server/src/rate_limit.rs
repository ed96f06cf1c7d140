use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{ConnectInfo, State},
    http::{Request, StatusCode},
    middleware::Next,
    response::Response,
};
use tokio::sync::Mutex;
use tracing::warn;

use crate::identity::USER_ID_HEADER;

#[derive(Debug, Clone)]
struct TokenBucket {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn new(capacity: f64) -> Self {
        Self {
            tokens: capacity,
            last_refill: Instant::now(),
        }
    }

    fn try_consume(&mut self, rate: f64, capacity: f64) -> bool {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.last_refill = now;

        self.tokens = (self.tokens + elapsed * rate).min(capacity);

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

/// Who a bucket belongs to: the gateway-asserted user when present,
/// otherwise the peer address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ClientKey {
    User(String),
    Ip(IpAddr),
}

impl std::fmt::Display for ClientKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClientKey::User(id) => write!(f, "user:{id}"),
            ClientKey::Ip(ip) => write!(f, "ip:{ip}"),
        }
    }
}

#[derive(Clone)]
pub struct RateLimiter {
    buckets: Arc<Mutex<HashMap<ClientKey, TokenBucket>>>,
    rate: f64,
    capacity: f64,
}

impl RateLimiter {
    pub fn new(rate: f64, capacity: f64) -> Self {
        Self {
            buckets: Arc::new(Mutex::new(HashMap::new())),
            rate,
            capacity,
        }
    }

    pub async fn check(&self, key: ClientKey) -> bool {
        let mut buckets = self.buckets.lock().await;
        let bucket = buckets
            .entry(key)
            .or_insert_with(|| TokenBucket::new(self.capacity));
        bucket.try_consume(self.rate, self.capacity)
    }

    pub async fn purge_stale(&self, max_idle_secs: f64) {
        let mut buckets = self.buckets.lock().await;
        let now = Instant::now();
        buckets.retain(|_, bucket| {
            now.duration_since(bucket.last_refill).as_secs_f64() < max_idle_secs
        });
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(10.0, 30.0)
    }
}

pub async fn rate_limit_middleware(
    State(limiter): State<RateLimiter>,
    req: Request<axum::body::Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    if let Some(key) = client_key(&req) {
        if !limiter.check(key.clone()).await {
            warn!(client = %key, "Rate limit exceeded");
            return Err(StatusCode::TOO_MANY_REQUESTS);
        }
    }

    Ok(next.run(req).await)
}

fn client_key<B>(req: &Request<B>) -> Option<ClientKey> {
    let user = req
        .headers()
        .get(USER_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty());
    if let Some(user) = user {
        return Some(ClientKey::User(user.to_string()));
    }
    extract_client_ip(req).map(ClientKey::Ip)
}

/// Try ConnectInfo first, then X-Forwarded-For, then X-Real-IP.
fn extract_client_ip<B>(req: &Request<B>) -> Option<IpAddr> {
    if let Some(connect_info) = req.extensions().get::<ConnectInfo<std::net::SocketAddr>>() {
        return Some(connect_info.0.ip());
    }

    if let Some(forwarded) = req.headers().get("x-forwarded-for") {
        if let Ok(value) = forwarded.to_str() {
            if let Some(first) = value.split(',').next() {
                if let Ok(ip) = first.trim().parse::<IpAddr>() {
                    return Some(ip);
                }
            }
        }
    }

    if let Some(real_ip) = req.headers().get("x-real-ip") {
        if let Ok(value) = real_ip.to_str() {
            if let Ok(ip) = value.trim().parse::<IpAddr>() {
                return Some(ip);
            }
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(s: &str) -> ClientKey {
        ClientKey::Ip(s.parse().unwrap())
    }

    #[tokio::test]
    async fn test_rate_limiter_allows_burst() {
        let limiter = RateLimiter::new(10.0, 5.0);

        for _ in 0..5 {
            assert!(limiter.check(ip("127.0.0.1")).await);
        }

        assert!(!limiter.check(ip("127.0.0.1")).await);
    }

    #[tokio::test]
    async fn test_users_and_ips_have_separate_buckets() {
        let limiter = RateLimiter::new(10.0, 1.0);

        assert!(limiter.check(ClientKey::User("alice".into())).await);
        assert!(!limiter.check(ClientKey::User("alice".into())).await);

        assert!(limiter.check(ClientKey::User("bob".into())).await);
        assert!(limiter.check(ip("10.0.0.1")).await);
    }

    #[tokio::test]
    async fn test_purge_stale() {
        let limiter = RateLimiter::new(10.0, 5.0);
        assert!(limiter.check(ip("192.168.1.1")).await);

        limiter.purge_stale(0.0).await;

        let buckets = limiter.buckets.lock().await;
        assert!(buckets.is_empty());
    }

    #[test]
    fn test_client_key_prefers_user_header() {
        let req = Request::builder()
            .header(USER_ID_HEADER, "alice")
            .header("x-real-ip", "10.1.1.1")
            .body(())
            .unwrap();
        assert_eq!(client_key(&req), Some(ClientKey::User("alice".into())));

        let req = Request::builder()
            .header("x-forwarded-for", "10.2.2.2, 10.3.3.3")
            .body(())
            .unwrap();
        assert_eq!(client_key(&req), Some(ip("10.2.2.2")));

        let req = Request::builder().body(()).unwrap();
        assert_eq!(client_key(&req), None);
    }
}
