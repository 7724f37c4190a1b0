//! Token-bucket rate limiting.
//!
//! Each key owns a bucket that starts full at `capacity` tokens and refills
//! continuously at `refill_per_sec`. A request takes one token; with less than
//! one token left it is denied and told how long until a token is available.

use axum::{
    body::Body,
    extract::{ConnectInfo, Request},
    response::{IntoResponse, Response},
};
use parking_lot::Mutex;
use std::{
    collections::HashMap,
    fmt,
    future::Future,
    net::SocketAddr,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
    time::{Duration, Instant},
};
use tower::{Layer, Service};
use tracing::warn;

use crate::config::LimitConfig;
use crate::context::RequestContext;
use crate::credential::{client_address, TrustedProxies};
use crate::error::GatewayError;

/// Outcome of a rate limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Allow,
    /// `retry_after_secs` is `None` when the bucket never refills.
    Deny { retry_after_secs: Option<u64> },
}

impl RateDecision {
    #[must_use]
    pub fn is_allowed(&self) -> bool {
        matches!(self, RateDecision::Allow)
    }
}

/// Storage for token buckets.
///
/// `take` must refill, check and deduct atomically with respect to other
/// callers using the same key.
pub trait BucketStore: Send + Sync {
    fn take(&self, key: &str, capacity: u32, refill_per_sec: f64) -> RateDecision;

    /// Drop buckets untouched for longer than `max_idle`. Returns the number removed.
    fn prune_idle(&self, max_idle: Duration) -> usize;

    fn reset(&self);
}

#[derive(Debug, Clone, Copy)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// Process-local [`BucketStore`].
#[derive(Debug, Default)]
pub struct InMemoryBucketStore {
    buckets: Mutex<HashMap<String, Bucket>>,
}

impl InMemoryBucketStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live buckets.
    pub fn len(&self) -> usize {
        self.buckets.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.lock().is_empty()
    }
}

impl BucketStore for InMemoryBucketStore {
    fn take(&self, key: &str, capacity: u32, refill_per_sec: f64) -> RateDecision {
        let now = Instant::now();
        let capacity = f64::from(capacity);
        let mut buckets = self.buckets.lock();

        let bucket = buckets.entry(key.to_string()).or_insert(Bucket {
            tokens: capacity,
            last_refill: now,
        });

        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * refill_per_sec).min(capacity);
        bucket.last_refill = now;

        if bucket.tokens < 1.0 {
            let retry_after_secs = (refill_per_sec > 0.0)
                .then(|| ((1.0 - bucket.tokens) / refill_per_sec).ceil() as u64);
            return RateDecision::Deny { retry_after_secs };
        }

        bucket.tokens -= 1.0;
        RateDecision::Allow
    }

    fn prune_idle(&self, max_idle: Duration) -> usize {
        let now = Instant::now();
        let mut buckets = self.buckets.lock();
        let before = buckets.len();
        buckets.retain(|_, bucket| now.duration_since(bucket.last_refill) <= max_idle);
        before - buckets.len()
    }

    fn reset(&self) {
        self.buckets.lock().clear();
    }
}

/// A scoped token-bucket limiter.
///
/// Keys are `"{identity}:{scope}"`, so limiters with different scopes can
/// share one store without interfering.
#[derive(Clone)]
pub struct RateLimiter {
    capacity: u32,
    refill_per_sec: f64,
    scope: Arc<str>,
    store: Arc<dyn BucketStore>,
}

impl fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimiter")
            .field("capacity", &self.capacity)
            .field("refill_per_sec", &self.refill_per_sec)
            .field("scope", &self.scope)
            .finish_non_exhaustive()
    }
}

impl RateLimiter {
    /// Create a limiter with its own in-memory store.
    #[must_use]
    pub fn new(capacity: u32, refill_per_sec: f64, scope: impl Into<String>) -> Self {
        Self::with_store(
            capacity,
            refill_per_sec,
            scope,
            Arc::new(InMemoryBucketStore::new()),
        )
    }

    #[must_use]
    pub fn with_store(
        capacity: u32,
        refill_per_sec: f64,
        scope: impl Into<String>,
        store: Arc<dyn BucketStore>,
    ) -> Self {
        Self {
            capacity,
            refill_per_sec,
            scope: Arc::from(scope.into()),
            store,
        }
    }

    #[must_use]
    pub fn from_config(config: &LimitConfig, scope: impl Into<String>) -> Self {
        Self::new(config.capacity, config.refill_per_sec, scope)
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    pub fn store(&self) -> &Arc<dyn BucketStore> {
        &self.store
    }

    /// Bucket key for an identity under this limiter's scope.
    pub fn key_for(&self, identity: &str) -> String {
        format!("{identity}:{}", self.scope)
    }

    /// Take one token from the bucket for `key`.
    pub fn check(&self, key: &str) -> RateDecision {
        self.store.take(key, self.capacity, self.refill_per_sec)
    }

    /// Take one token for `identity` under this limiter's scope.
    pub fn check_identity(&self, identity: &str) -> RateDecision {
        self.check(&self.key_for(identity))
    }
}

/// Derives the identity a request is throttled under.
pub type KeyFn = Arc<dyn Fn(&Request<Body>) -> String + Send + Sync>;

/// Authenticated user id when the gateway ran first, else the client address.
///
/// Forwarding headers only count when the socket peer is in `trusted`.
pub fn default_identity(request: &Request<Body>, trusted: &TrustedProxies) -> String {
    if let Some(context) = request.extensions().get::<RequestContext>() {
        return context.user_id.clone();
    }
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    client_address(request.headers(), peer, trusted)
}

/// Layer applying a [`RateLimiter`] to every request.
#[derive(Clone)]
pub struct RateLimitLayer {
    limiter: RateLimiter,
    key_fn: KeyFn,
}

impl RateLimitLayer {
    #[must_use]
    pub fn new(limiter: RateLimiter) -> Self {
        Self {
            limiter,
            key_fn: Arc::new(|request: &Request<Body>| {
                default_identity(request, &TrustedProxies::default())
            }),
        }
    }

    /// Key anonymous requests on the forwarded address when they arrive
    /// through one of `trusted`. Replaces any custom key function.
    #[must_use]
    pub fn with_trusted_proxies(mut self, trusted: TrustedProxies) -> Self {
        self.key_fn = Arc::new(move |request: &Request<Body>| {
            default_identity(request, &trusted)
        });
        self
    }

    /// Throttle under a custom identity instead of user id or address.
    #[must_use]
    pub fn with_key_fn<F>(mut self, key_fn: F) -> Self
    where
        F: Fn(&Request<Body>) -> String + Send + Sync + 'static,
    {
        self.key_fn = Arc::new(key_fn);
        self
    }
}

impl<S> Layer<S> for RateLimitLayer {
    type Service = RateLimitService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RateLimitService {
            inner,
            limiter: self.limiter.clone(),
            key_fn: self.key_fn.clone(),
        }
    }
}

/// Rate limiting service wrapper.
#[derive(Clone)]
pub struct RateLimitService<S> {
    inner: S,
    limiter: RateLimiter,
    key_fn: KeyFn,
}

impl<S> Service<Request<Body>> for RateLimitService<S>
where
    S: Service<Request<Body>, Response = Response> + Clone + Send + 'static,
    S::Future: Send,
{
    type Response = Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request<Body>) -> Self::Future {
        let identity = (self.key_fn)(&request);
        let decision = self.limiter.check_identity(&identity);
        let scope = self.limiter.scope.clone();
        let mut inner = self.inner.clone();

        Box::pin(async move {
            match decision {
                RateDecision::Allow => inner.call(request).await,
                RateDecision::Deny { retry_after_secs } => {
                    warn!(
                        identity = %identity,
                        scope = %scope,
                        path = %request.uri().path(),
                        retry_after_secs = ?retry_after_secs,
                        "Rate limit exceeded"
                    );
                    Ok(GatewayError::RateLimited {
                        retry_after: retry_after_secs,
                    }
                    .into_response())
                }
            }
        })
    }
}
