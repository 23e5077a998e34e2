//! Token-bucket rate limiting for credential-bearing endpoints.
//!
//! Buckets are keyed by client IP and request path, plus the OAuth
//! `client_id` when the query names one. The IP is the socket peer.
//! `X-Forwarded-For` is read only when that peer is a trusted proxy, and then
//! the rightmost hop that is not itself a trusted proxy wins.
//!
//! The bucket map is bounded: when it fills, refilled buckets are pruned and,
//! if that is not enough, the least recently used ones are evicted.
use crate::app::AppState;
use crate::api::error::ApiError;
use axum::extract::{ConnectInfo, Request, State};
use axum::http::header::RETRY_AFTER;
use axum::http::{HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use dashmap::DashMap;
use std::net::{IpAddr, SocketAddr};
use std::time::{Duration, Instant};

const MAX_BUCKETS: usize = 100_000;

#[derive(Debug, Clone, Copy)]
struct Bucket {
    tokens: f64,
    updated: Instant,
}

pub struct RateLimiter {
    per_second: f64,
    burst: f64,
    max_buckets: usize,
    trusted_proxies: Vec<IpAddr>,
    buckets: DashMap<String, Bucket>,
}

impl RateLimiter {
    pub fn new(per_minute: u32, burst: u32, trusted_proxies: Vec<IpAddr>) -> Self {
        Self {
            per_second: f64::from(per_minute.max(1)) / 60.0,
            burst: f64::from(burst.max(1)),
            max_buckets: MAX_BUCKETS,
            trusted_proxies,
            buckets: DashMap::new(),
        }
    }

    pub fn with_max_buckets(mut self, max_buckets: usize) -> Self {
        self.max_buckets = max_buckets.max(1);
        self
    }

    /// Take one token for `key`. `Err` carries the wait until the next token.
    pub fn check(&self, key: &str, now: Instant) -> Result<(), Duration> {
        if !self.buckets.contains_key(key) && self.buckets.len() >= self.max_buckets {
            self.make_room(now);
        }
        let mut bucket = self.buckets.entry(key.to_string()).or_insert(Bucket {
            tokens: self.burst,
            updated: now,
        });
        let elapsed = now.saturating_duration_since(bucket.updated).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.per_second).min(self.burst);
        bucket.updated = now;
        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            Ok(())
        } else {
            let wait = (1.0 - bucket.tokens) / self.per_second;
            Err(Duration::from_secs_f64(wait))
        }
    }

    /// Forget buckets that have refilled completely.
    pub fn prune(&self, now: Instant) {
        let full_after = self.burst / self.per_second;
        self.buckets.retain(|_, bucket| {
            now.saturating_duration_since(bucket.updated).as_secs_f64() < full_after
        });
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Bring the map below capacity, keeping headroom so a flood of new keys
    /// does not trigger a scan on every request.
    fn make_room(&self, now: Instant) {
        self.prune(now);
        let target = self.max_buckets - self.max_buckets / 10 - 1;
        let len = self.buckets.len();
        if len <= target {
            return;
        }
        let mut by_age: Vec<(String, Instant)> = self
            .buckets
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().updated))
            .collect();
        by_age.sort_by_key(|(_, updated)| *updated);
        let evict = len - target;
        for (key, _) in by_age.into_iter().take(evict) {
            self.buckets.remove(&key);
        }
        tracing::debug!(evicted = evict, "rate limiter at capacity; oldest buckets evicted");
    }

    /// Address the bucket is charged to.
    fn client_ip(&self, request: &Request) -> Option<IpAddr> {
        let peer = request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|info| info.0.ip())?;
        if !self.trusted_proxies.contains(&peer) {
            return Some(peer);
        }
        let hops: Vec<&str> = request
            .headers()
            .get_all("x-forwarded-for")
            .iter()
            .filter_map(|value| value.to_str().ok())
            .flat_map(|value| value.split(','))
            .map(str::trim)
            .filter(|hop| !hop.is_empty())
            .collect();
        for hop in hops.into_iter().rev() {
            match hop.parse::<IpAddr>() {
                Ok(ip) if self.trusted_proxies.contains(&ip) => continue,
                Ok(ip) => return Some(ip),
                // A proxy we trust forwarded garbage; charge the proxy.
                Err(_) => return Some(peer),
            }
        }
        Some(peer)
    }

    fn limit_key(&self, request: &Request) -> String {
        let ip = self
            .client_ip(request)
            .map(|ip| ip.to_string())
            .unwrap_or_else(|| "unknown".to_string());
        let client =
            url::form_urlencoded::parse(request.uri().query().unwrap_or_default().as_bytes())
                .find(|(key, _)| key == "client_id")
                .map(|(_, value)| value.into_owned());
        match client {
            Some(client) => format!("{ip}|{}|{client}", request.uri().path()),
            None => format!("{ip}|{}", request.uri().path()),
        }
    }
}

pub async fn rate_limit(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let key = state.rate_limiter.limit_key(&request);
    match state.rate_limiter.check(&key, Instant::now()) {
        Ok(()) => next.run(request).await,
        Err(wait) => {
            metrics::counter!("hellojohn_rate_limited_total").increment(1);
            tracing::debug!(key = %key, "rate limit exceeded");
            let seconds = wait.as_secs_f64().ceil().max(1.0) as u64;
            let mut response =
                ApiError::new(StatusCode::TOO_MANY_REQUESTS, "rate_limited", "too many requests")
                    .into_response();
            if let Ok(value) = HeaderValue::from_str(&seconds.to_string()) {
                response.headers_mut().insert(RETRY_AFTER, value);
            }
            response
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROXY: [u8; 4] = [10, 0, 0, 1];

    fn incoming(uri: &str, peer: Option<[u8; 4]>, forwarded: Option<&str>) -> Request {
        let mut builder = Request::builder().uri(uri);
        if let Some(forwarded) = forwarded {
            builder = builder.header("x-forwarded-for", forwarded);
        }
        let mut request = builder.body(axum::body::Body::empty()).unwrap();
        if let Some(peer) = peer {
            request
                .extensions_mut()
                .insert(ConnectInfo(SocketAddr::from((peer, 40_000))));
        }
        request
    }

    fn limiter(trusted: &[[u8; 4]]) -> RateLimiter {
        RateLimiter::new(60, 1, trusted.iter().map(|ip| IpAddr::from(*ip)).collect())
    }

    #[test]
    fn burst_then_refill() {
        let limiter = RateLimiter::new(60, 2, Vec::new());
        let start = Instant::now();
        assert!(limiter.check("ip", start).is_ok());
        assert!(limiter.check("ip", start).is_ok());
        let wait = limiter.check("ip", start).unwrap_err();
        assert!(wait <= Duration::from_secs(1));
        assert!(limiter.check("ip", start + Duration::from_secs(1)).is_ok());
    }

    #[test]
    fn keys_are_independent() {
        let limiter = limiter(&[]);
        let now = Instant::now();
        assert!(limiter.check("a", now).is_ok());
        assert!(limiter.check("a", now).is_err());
        assert!(limiter.check("b", now).is_ok());
    }

    #[test]
    fn prune_drops_full_buckets() {
        let limiter = limiter(&[]);
        let now = Instant::now();
        limiter.check("a", now).unwrap();
        limiter.prune(now + Duration::from_secs(5));
        assert!(limiter.is_empty());
    }

    #[test]
    fn full_map_evicts_least_recently_used() {
        let limiter = limiter(&[]).with_max_buckets(10);
        let start = Instant::now();
        for n in 0..25u64 {
            let at = start + Duration::from_millis(n * 10);
            limiter.check(&format!("key-{n}"), at).unwrap();
            assert!(limiter.len() <= 10, "map grew to {}", limiter.len());
        }
        assert!(limiter.buckets.contains_key("key-24"));
        assert!(!limiter.buckets.contains_key("key-0"));
    }

    #[test]
    fn forwarded_for_is_ignored_from_untrusted_peers() {
        let limiter = limiter(&[]);
        let first = incoming("/v1/auth/login", Some([203, 0, 113, 7]), Some("198.51.100.1"));
        let second = incoming("/v1/auth/login", Some([203, 0, 113, 7]), Some("198.51.100.2"));
        assert_eq!(limiter.limit_key(&first), "203.0.113.7|/v1/auth/login");
        assert_eq!(limiter.limit_key(&first), limiter.limit_key(&second));
    }

    #[test]
    fn rotating_forwarded_for_shares_one_bucket() {
        let limiter = limiter(&[]);
        let now = Instant::now();
        let mut outcomes = Vec::new();
        for n in 1..=3u8 {
            let forwarded = format!("198.51.100.{n}");
            let request = incoming("/v1/auth/login", Some([203, 0, 113, 7]), Some(&forwarded));
            outcomes.push(limiter.check(&limiter.limit_key(&request), now).is_ok());
        }
        assert_eq!(outcomes, vec![true, false, false]);
    }

    #[test]
    fn trusted_proxy_forwards_the_rightmost_untrusted_hop() {
        let limiter = limiter(&[PROXY, [10, 0, 0, 2]]);
        let request = incoming(
            "/oauth2/token",
            Some(PROXY),
            Some("1.2.3.4, 198.51.100.9, 10.0.0.2"),
        );
        assert_eq!(limiter.limit_key(&request), "198.51.100.9|/oauth2/token");
    }

    #[test]
    fn trusted_proxy_without_header_is_charged_itself() {
        let limiter = limiter(&[PROXY]);
        let request = incoming("/oauth2/token", Some(PROXY), None);
        assert_eq!(limiter.limit_key(&request), "10.0.0.1|/oauth2/token");
        let garbage = incoming("/oauth2/token", Some(PROXY), Some("not-an-ip"));
        assert_eq!(limiter.limit_key(&garbage), "10.0.0.1|/oauth2/token");
    }

    #[test]
    fn client_id_partitions_buckets() {
        let limiter = limiter(&[]);
        let web = incoming("/oauth2/authorize?client_id=web", Some([203, 0, 113, 7]), None);
        let svc = incoming("/oauth2/authorize?client_id=svc", Some([203, 0, 113, 7]), None);
        assert_eq!(limiter.limit_key(&web), "203.0.113.7|/oauth2/authorize|web");
        assert_ne!(limiter.limit_key(&web), limiter.limit_key(&svc));
    }

    #[test]
    fn missing_peer_is_keyed_as_unknown() {
        let limiter = limiter(&[]);
        let request = incoming("/v1/auth/login", None, Some("198.51.100.1"));
        assert_eq!(limiter.limit_key(&request), "unknown|/v1/auth/login");
    }
}
