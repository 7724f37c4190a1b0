//! Authentication gateway.
//!
//! [`AuthGateway::authenticate`] walks a request through, in order:
//!
//! 1. fast block check for addresses under a temporary block
//! 2. test credential shortcut (`test-bypass` feature only)
//! 3. passthrough when an upstream layer already attached an identity
//! 4. missing credential
//! 5. format pre-check (the verifier is never called for these)
//! 6. verification
//! 7. audience and issuer check, when configured
//! 8. role resolution, which never fails
//!
//! Each of 1 and 4 to 7 can end the request with a 401 or 429. Failures are
//! counted per address, and an address that keeps failing is blocked.

use axum::{
    body::Body,
    extract::{ConnectInfo, Request},
    response::{IntoResponse, Response},
};
use std::{
    future::Future,
    net::SocketAddr,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
    time::{Duration, Instant},
};
use tower::{Layer, Service};
use tracing::{debug, info, warn};

use crate::abuse::{remaining_secs, AbuseSnapshot, AbuseStore, FailureKind, InMemoryAbuseStore};
use crate::claims::Claims;
use crate::config::{AuthConfig, ConfigError};
use crate::context::{AuthenticatedUser, RequestContext};
use crate::credential::{
    client_address, extract_credential, query_params, request_origin, CredentialInfo,
    TrustedProxies,
};
use crate::error::GatewayError;
use crate::role::RoleResolver;
use crate::store::UserStore;
#[cfg(feature = "test-bypass")]
use crate::test_identity::TestIdentityProvider;
use crate::verifier::{IdentityVerifier, VerifyError};

/// Everything the gateway needs from a request, detached from its body.
#[derive(Debug, Clone, Default)]
pub struct InboundRequest {
    pub credential: Option<String>,
    pub address: String,
    pub origin: Option<String>,
    /// Path without the query string, which may carry a credential.
    pub path: String,
    /// Identity attached by an upstream layer.
    pub existing_user: Option<AuthenticatedUser>,
}

impl InboundRequest {
    /// Forwarding headers are only read when the socket peer is in `trusted`.
    pub fn from_request<B>(request: &Request<B>, trusted: &TrustedProxies) -> Self {
        let headers = request.headers();
        let peer = request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);

        Self {
            credential: extract_credential(headers, &query_params(request.uri())),
            address: client_address(headers, peer, trusted),
            origin: request_origin(headers),
            path: request.uri().path().to_string(),
            existing_user: request.extensions().get::<AuthenticatedUser>().cloned(),
        }
    }
}

struct GatewayInner {
    config: AuthConfig,
    verifier: Arc<dyn IdentityVerifier>,
    resolver: RoleResolver,
    abuse: Arc<dyn AbuseStore>,
    #[cfg(feature = "test-bypass")]
    test_identities: Option<TestIdentityProvider>,
}

/// Shared, cheaply cloneable authentication gateway.
#[derive(Clone)]
pub struct AuthGateway {
    inner: Arc<GatewayInner>,
}

impl std::fmt::Debug for AuthGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthGateway")
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

/// Builder for [`AuthGateway`].
pub struct AuthGatewayBuilder {
    config: AuthConfig,
    verifier: Arc<dyn IdentityVerifier>,
    store: Arc<dyn UserStore>,
    abuse: Option<Arc<dyn AbuseStore>>,
    #[cfg(feature = "test-bypass")]
    test_identities: Option<TestIdentityProvider>,
}

impl AuthGatewayBuilder {
    /// Use a custom abuse store, e.g. one shared between instances.
    #[must_use]
    pub fn abuse_store(mut self, abuse: Arc<dyn AbuseStore>) -> Self {
        self.abuse = Some(abuse);
        self
    }

    /// Accept `test-token-for-<uid>` credentials without verification.
    #[cfg(feature = "test-bypass")]
    #[must_use]
    pub fn test_identities(mut self, provider: TestIdentityProvider) -> Self {
        self.test_identities = Some(provider);
        self
    }

    pub fn build(self) -> Result<AuthGateway, ConfigError> {
        self.config.validate()?;

        let abuse = self.abuse.unwrap_or_else(|| {
            Arc::new(InMemoryAbuseStore::new(self.config.thresholds.failure_window))
        });

        Ok(AuthGateway {
            inner: Arc::new(GatewayInner {
                resolver: RoleResolver::new(self.store),
                verifier: self.verifier,
                abuse,
                config: self.config,
                #[cfg(feature = "test-bypass")]
                test_identities: self.test_identities,
            }),
        })
    }
}

impl AuthGateway {
    pub fn builder(
        config: AuthConfig,
        verifier: Arc<dyn IdentityVerifier>,
        store: Arc<dyn UserStore>,
    ) -> AuthGatewayBuilder {
        AuthGatewayBuilder {
            config,
            verifier,
            store,
            abuse: None,
            #[cfg(feature = "test-bypass")]
            test_identities: None,
        }
    }

    pub fn config(&self) -> &AuthConfig {
        &self.inner.config
    }

    pub fn abuse(&self) -> &Arc<dyn AbuseStore> {
        &self.inner.abuse
    }

    pub fn snapshot(&self, top_n: usize) -> AbuseSnapshot {
        self.inner.abuse.snapshot(top_n)
    }

    /// Tower layer running this gateway in front of a router.
    pub fn layer(&self) -> AuthLayer {
        AuthLayer::new(self.clone())
    }

    /// Authenticate one request.
    pub async fn authenticate(
        &self,
        request: InboundRequest,
    ) -> Result<RequestContext, GatewayError> {
        let started = Instant::now();
        let outcome = self.decide(&request).await;
        self.log_decision(&request, &outcome, started.elapsed());

        let user = outcome?;
        Ok(RequestContext {
            user_id: user.uid.clone(),
            user,
            address: request.address,
            origin: request.origin,
            path: request.path,
        })
    }

    async fn decide(&self, request: &InboundRequest) -> Result<AuthenticatedUser, GatewayError> {
        let config = &self.inner.config;
        let abuse = &self.inner.abuse;
        let address = request.address.as_str();

        if let Some(remaining) = abuse.blocked_for(address) {
            return Err(GatewayError::Blocked {
                retry_after: remaining_secs(remaining),
            });
        }

        if let Some(user) = self.test_identity(request) {
            return Ok(user);
        }

        if let Some(user) = &request.existing_user {
            return Ok(user.clone());
        }

        let Some(credential) = request.credential.as_deref() else {
            let count = abuse.record_failure(FailureKind::NoToken, Some(address));
            if count > config.thresholds.no_token_block {
                if let Some(blocked) = self.escalate(request, FailureKind::NoToken, count) {
                    return Err(blocked);
                }
            }
            return Err(GatewayError::NoCredential);
        };

        if !self.looks_like_token(credential) {
            let count = abuse.record_failure(FailureKind::InvalidTokenFormat, Some(address));
            if count > config.thresholds.invalid_format_throttle {
                warn!(
                    ip = %address,
                    path = %request.path,
                    count,
                    "Throttling address sending malformed tokens"
                );
                return Err(GatewayError::RateLimited { retry_after: None });
            }
            return Err(GatewayError::MalformedCredential);
        }

        let claims = match self.verify(credential).await {
            Ok(claims) => claims,
            Err(err) => {
                let count = abuse.record_failure(FailureKind::VerifyError, Some(address));
                if count > config.thresholds.verify_error_block {
                    if let Some(blocked) = self.escalate(request, FailureKind::VerifyError, count) {
                        return Err(blocked);
                    }
                }
                warn!(
                    ip = %address,
                    path = %request.path,
                    kind = err.kind(),
                    "Token verification failed"
                );
                return Err(match err {
                    VerifyError::Expired => GatewayError::ExpiredCredential,
                    VerifyError::AudienceMismatch => GatewayError::AudienceMismatch,
                    VerifyError::IssuerMismatch => GatewayError::IssuerMismatch,
                    _ => GatewayError::InvalidCredential,
                });
            }
        };

        if let Some(expected) = &config.expected_audience {
            if claims.audience_mismatch(expected) {
                warn!(
                    uid = %claims.sub,
                    ip = %address,
                    expected = %expected,
                    got = ?claims.aud,
                    "Token audience mismatch"
                );
                return Err(GatewayError::AudienceMismatch);
            }
        }
        if let Some(expected) = &config.expected_issuer {
            if claims.issuer_mismatch(expected) {
                warn!(
                    uid = %claims.sub,
                    ip = %address,
                    expected = %expected,
                    got = ?claims.iss,
                    "Token issuer mismatch"
                );
                return Err(GatewayError::IssuerMismatch);
            }
        }

        Ok(self.inner.resolver.resolve(&claims, credential).await)
    }

    #[cfg(feature = "test-bypass")]
    fn test_identity(&self, request: &InboundRequest) -> Option<AuthenticatedUser> {
        let provider = self.inner.test_identities.as_ref()?;
        provider.identify(request.credential.as_deref()?)
    }

    #[cfg(not(feature = "test-bypass"))]
    fn test_identity(&self, _request: &InboundRequest) -> Option<AuthenticatedUser> {
        None
    }

    /// Block the address unless a concurrent request already did.
    fn escalate(
        &self,
        request: &InboundRequest,
        kind: FailureKind,
        count: u64,
    ) -> Option<GatewayError> {
        let abuse = &self.inner.abuse;
        let duration = self.inner.config.thresholds.block_duration;
        if abuse.is_blocked(&request.address) {
            return None;
        }
        abuse.block(&request.address, duration);
        warn!(
            ip = %request.address,
            path = %request.path,
            kind = %kind,
            count,
            block_secs = duration.as_secs(),
            "Auto-blocking address after repeated auth failures"
        );
        Some(GatewayError::Blocked {
            retry_after: remaining_secs(duration),
        })
    }

    fn looks_like_token(&self, credential: &str) -> bool {
        let config = &self.inner.config;
        credential.len() >= config.min_token_length && credential.starts_with(&config.token_prefix)
    }

    async fn verify(&self, credential: &str) -> Result<Claims, VerifyError> {
        let verification = self.inner.verifier.verify(credential);
        match self.inner.config.verify_timeout {
            Some(limit) => tokio::time::timeout(limit, verification)
                .await
                .unwrap_or_else(|_| Err(VerifyError::Other("verification timed out".to_string()))),
            None => verification.await,
        }
    }

    fn log_decision(
        &self,
        request: &InboundRequest,
        outcome: &Result<AuthenticatedUser, GatewayError>,
        took: Duration,
    ) {
        let config = &self.inner.config;
        let took_ms = u64::try_from(took.as_millis()).unwrap_or(u64::MAX);
        let credential = CredentialInfo::of(request.credential.as_deref());
        let decision = match outcome {
            Ok(_) => "allow",
            Err(err) => err.error_code(),
        };

        match outcome {
            Ok(user) if config.debug_auth => info!(
                decision,
                uid = %user.uid,
                role = %user.role,
                is_admin = user.is_admin,
                source = ?user.source,
                ip = %request.address,
                path = %request.path,
                took_ms,
                credential_len = credential.length,
                credential_prefix = %credential.prefix,
                "Request authenticated"
            ),
            Ok(user) => debug!(
                decision,
                uid = %user.uid,
                ip = %request.address,
                path = %request.path,
                took_ms,
                "Request authenticated"
            ),
            Err(_) => warn!(
                decision,
                ip = %request.address,
                origin = ?request.origin,
                path = %request.path,
                took_ms,
                credential_present = credential.present,
                credential_len = credential.length,
                credential_prefix = %credential.prefix,
                "Request rejected"
            ),
        }

        if took > config.slow_request_threshold {
            warn!(
                decision,
                ip = %request.address,
                path = %request.path,
                took_ms,
                "Slow authentication"
            );
        }
    }
}

/// Whether `path` matches one of `patterns`: exact, or prefix with a
/// trailing `*`.
pub fn is_public_path(patterns: &[String], path: &str) -> bool {
    patterns.iter().any(|pattern| match pattern.strip_suffix('*') {
        Some(prefix) => path.starts_with(prefix),
        None => path == pattern,
    })
}

/// Layer running the gateway before the wrapped service.
#[derive(Debug, Clone)]
pub struct AuthLayer {
    gateway: AuthGateway,
    public_paths: Arc<[String]>,
}

impl AuthLayer {
    pub fn new(gateway: AuthGateway) -> Self {
        Self {
            gateway,
            public_paths: Arc::from(Vec::new()),
        }
    }

    /// Paths served without authentication. See [`is_public_path`].
    #[must_use]
    pub fn with_public_paths(mut self, paths: Vec<String>) -> Self {
        self.public_paths = Arc::from(paths);
        self
    }
}

impl<S> Layer<S> for AuthLayer {
    type Service = AuthService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AuthService {
            inner,
            gateway: self.gateway.clone(),
            public_paths: self.public_paths.clone(),
        }
    }
}

/// Authentication service wrapper.
#[derive(Debug, Clone)]
pub struct AuthService<S> {
    inner: S,
    gateway: AuthGateway,
    public_paths: Arc<[String]>,
}

impl<S> Service<Request<Body>> for AuthService<S>
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

    fn call(&mut self, mut request: Request<Body>) -> Self::Future {
        let mut inner = self.inner.clone();

        if is_public_path(&self.public_paths, request.uri().path()) {
            return Box::pin(async move { inner.call(request).await });
        }

        let gateway = self.gateway.clone();
        let inbound =
            InboundRequest::from_request(&request, &gateway.config().trusted_proxies);

        Box::pin(async move {
            match gateway.authenticate(inbound).await {
                Ok(context) => {
                    request.extensions_mut().insert(context.user.clone());
                    request.extensions_mut().insert(context);
                    inner.call(request).await
                }
                Err(err) => Ok(err.into_response()),
            }
        })
    }
}
