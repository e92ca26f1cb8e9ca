use crate::config::RateLimit;
use crate::error::AppError;
use axum::{
    extract::{ConnectInfo, Request},
    middleware::Next,
    response::Response,
};
use governor::{clock::DefaultClock, state::keyed::DefaultKeyedStateStore, Quota, RateLimiter};
use std::net::{IpAddr, SocketAddr};
use std::num::NonZeroU32;
use std::sync::Arc;

type KeyedLimiter = RateLimiter<String, DefaultKeyedStateStore<String>, DefaultClock>;

/// Per-client request budget: `max_requests` per `window`, refilled evenly.
pub struct ClientRateLimiter {
    name: &'static str,
    limiter: KeyedLimiter,
    trusted_proxies: Vec<IpAddr>,
}

impl ClientRateLimiter {
    pub fn new(name: &'static str, limit: &RateLimit) -> Self {
        let burst = NonZeroU32::new(limit.max_requests).unwrap_or(NonZeroU32::MIN);
        let quota = Quota::with_period(limit.window / burst.get())
            .unwrap_or_else(|| Quota::per_second(burst))
            .allow_burst(burst);

        Self {
            name,
            limiter: RateLimiter::keyed(quota),
            trusted_proxies: Vec::new(),
        }
    }

    /// Peers allowed to report the client address through `x-forwarded-for`.
    pub fn with_trusted_proxies(mut self, proxies: Vec<IpAddr>) -> Self {
        self.trusted_proxies = proxies;
        self
    }

    pub fn check(&self, client: &str) -> bool {
        self.limiter.check_key(&client.to_string()).is_ok()
    }

    /// Drops state for clients whose budget has fully refilled.
    pub fn retain_recent(&self) {
        self.limiter.retain_recent();
    }

    pub fn tracked_clients(&self) -> usize {
        self.limiter.len()
    }

    /// Keys on the connecting peer. A trusted proxy peer is replaced by the
    /// right-most `x-forwarded-for` hop that is not itself a trusted proxy.
    fn client_key(&self, request: &Request) -> String {
        let Some(peer) = request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip())
        else {
            return "unknown".to_string();
        };

        if !self.trusted_proxies.contains(&peer) {
            return peer.to_string();
        }

        request
            .headers()
            .get("x-forwarded-for")
            .and_then(|h| h.to_str().ok())
            .and_then(|v| {
                v.rsplit(',')
                    .map(str::trim)
                    .map_while(|hop| hop.parse::<IpAddr>().ok())
                    .find(|ip| !self.trusted_proxies.contains(ip))
            })
            .unwrap_or(peer)
            .to_string()
    }
}

pub async fn rate_limit_middleware(
    limiter: Arc<ClientRateLimiter>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let client = limiter.client_key(&request);
    if !limiter.check(&client) {
        tracing::warn!(client = %client, limiter = limiter.name, "Rate limit exceeded");
        return Err(AppError::RateLimitExceeded);
    }
    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::Body,
        http::{Request as HttpRequest, StatusCode},
        middleware::from_fn,
        routing::get,
        Router,
    };
    use std::time::Duration;
    use tower::ServiceExt;

    fn limiter(max: u32) -> Arc<ClientRateLimiter> {
        Arc::new(ClientRateLimiter::new(
            "test",
            &RateLimit {
                max_requests: max,
                window: Duration::from_secs(300),
            },
        ))
    }

    fn app(limiter: Arc<ClientRateLimiter>) -> Router {
        Router::new().route("/", get(|| async { "ok" })).layer(from_fn(move |req, next| {
            let limiter = limiter.clone();
            async move { rate_limit_middleware(limiter, req, next).await }
        }))
    }

    fn from(peer: &str, forwarded: Option<&str>) -> HttpRequest<Body> {
        let mut builder = HttpRequest::builder().uri("/");
        if let Some(forwarded) = forwarded {
            builder = builder.header("x-forwarded-for", forwarded);
        }
        let mut request = builder.body(Body::empty()).unwrap();
        let addr: SocketAddr = format!("{}:40000", peer).parse().unwrap();
        request.extensions_mut().insert(ConnectInfo(addr));
        request
    }

    #[test]
    fn budget_is_per_client() {
        let limiter = limiter(2);
        assert!(limiter.check("10.0.0.1"));
        assert!(limiter.check("10.0.0.1"));
        assert!(!limiter.check("10.0.0.1"));
        assert!(limiter.check("10.0.0.2"));
        assert_eq!(limiter.tracked_clients(), 2);
    }

    #[test]
    fn zero_budget_still_allows_one_request() {
        let limiter = limiter(0);
        assert!(limiter.check("10.0.0.1"));
        assert!(!limiter.check("10.0.0.1"));
    }

    #[tokio::test]
    async fn exhausted_client_gets_429() {
        let app = app(limiter(1));

        let ok = app.clone().oneshot(from("10.0.0.1", None)).await.unwrap();
        assert_eq!(ok.status(), StatusCode::OK);

        let limited = app.clone().oneshot(from("10.0.0.1", None)).await.unwrap();
        assert_eq!(limited.status(), StatusCode::TOO_MANY_REQUESTS);

        let other = app.oneshot(from("10.0.0.9", None)).await.unwrap();
        assert_eq!(other.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn forwarded_header_from_untrusted_peer_is_ignored() {
        let app = app(limiter(1));

        let mut admitted = 0;
        for n in 0..20 {
            let forwarded = format!("10.9.9.{}", n);
            let response = app
                .clone()
                .oneshot(from("203.0.113.7", Some(forwarded.as_str())))
                .await
                .unwrap();
            if response.status() == StatusCode::OK {
                admitted += 1;
            } else {
                assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
            }
        }

        assert_eq!(admitted, 1);
    }

    #[tokio::test]
    async fn trusted_proxy_forwards_the_client_address() {
        let proxy: IpAddr = "10.0.0.5".parse().unwrap();
        let limiter = Arc::new(
            ClientRateLimiter::new(
                "test",
                &RateLimit {
                    max_requests: 1,
                    window: Duration::from_secs(300),
                },
            )
            .with_trusted_proxies(vec![proxy]),
        );
        let app = app(limiter.clone());

        let first = app
            .clone()
            .oneshot(from("10.0.0.5", Some("198.51.100.1")))
            .await
            .unwrap();
        assert_eq!(first.status(), StatusCode::OK);

        let second_client = app
            .clone()
            .oneshot(from("10.0.0.5", Some("198.51.100.2")))
            .await
            .unwrap();
        assert_eq!(second_client.status(), StatusCode::OK);

        // A spoofed left-most hop does not change the key the proxy appended.
        let spoofed = app
            .oneshot(from("10.0.0.5", Some("1.2.3.4, 198.51.100.1")))
            .await
            .unwrap();
        assert_eq!(spoofed.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(limiter.tracked_clients(), 2);
    }
}
