//! Shared fixtures for autopromote-auth integration tests.
//!
//! Mock verifier with a call counter, recording and failing user stores,
//! a router wired the way the gateway binary wires protected routes, and an
//! in-memory log sink.

#![allow(dead_code)]

use async_trait::async_trait;
use autopromote_auth::{
    AdminRecord, AuthConfig, AuthGateway, Claims, IdentityVerifier, InMemoryUserStore,
    RequestContext, RoleUpdate, StoreError, UserRecord, UserStore, VerifyError,
};
use axum::{
    body::Body,
    extract::ConnectInfo,
    http::{Request, StatusCode},
    response::Response,
    routing::get,
    Json, Router,
};
use parking_lot::Mutex;
use serde_json::Value;
use std::io;
use std::net::SocketAddr;
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};
use tracing::subscriber::DefaultGuard;

/// A credential that passes the format pre-check.
pub fn fake_token() -> String {
    format!("eyJhbGciOiJSUzI1NiJ9.{}", "x".repeat(120))
}

/// Verifier returning a fixed outcome and counting calls.
pub struct MockVerifier {
    outcome: Result<Claims, VerifyError>,
    calls: AtomicUsize,
}

impl MockVerifier {
    pub fn accepting(claims: Claims) -> Arc<Self> {
        Arc::new(Self {
            outcome: Ok(claims),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn rejecting(err: VerifyError) -> Arc<Self> {
        Arc::new(Self {
            outcome: Err(err),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl IdentityVerifier for MockVerifier {
    async fn verify(&self, _credential: &str) -> Result<Claims, VerifyError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.outcome.clone()
    }
}

/// In-memory store that counts writes.
#[derive(Default)]
pub struct RecordingStore {
    pub inner: InMemoryUserStore,
    creates: AtomicUsize,
    updates: AtomicUsize,
}

impl RecordingStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn writes(&self) -> usize {
        self.creates.load(Ordering::SeqCst) + self.updates.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl UserStore for RecordingStore {
    async fn get_user(&self, uid: &str) -> Result<Option<UserRecord>, StoreError> {
        self.inner.get_user(uid).await
    }

    async fn get_admin(&self, uid: &str) -> Result<Option<AdminRecord>, StoreError> {
        self.inner.get_admin(uid).await
    }

    async fn create_user(&self, uid: &str, record: &UserRecord) -> Result<(), StoreError> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        self.inner.create_user(uid, record).await
    }

    async fn update_user(&self, uid: &str, update: &RoleUpdate) -> Result<(), StoreError> {
        self.updates.fetch_add(1, Ordering::SeqCst);
        self.inner.update_user(uid, update).await
    }
}

/// Store failing on every call.
#[derive(Default)]
pub struct FailingStore {
    calls: AtomicUsize,
    writes: AtomicUsize,
}

impl FailingStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    fn fail(&self) -> StoreError {
        self.calls.fetch_add(1, Ordering::SeqCst);
        StoreError::Unavailable("connection refused".to_string())
    }
}

#[async_trait]
impl UserStore for FailingStore {
    async fn get_user(&self, _uid: &str) -> Result<Option<UserRecord>, StoreError> {
        Err(self.fail())
    }

    async fn get_admin(&self, _uid: &str) -> Result<Option<AdminRecord>, StoreError> {
        Err(self.fail())
    }

    async fn create_user(&self, _uid: &str, _record: &UserRecord) -> Result<(), StoreError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        Err(self.fail())
    }

    async fn update_user(&self, _uid: &str, _update: &RoleUpdate) -> Result<(), StoreError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        Err(self.fail())
    }
}

pub fn build_gateway(
    config: AuthConfig,
    verifier: Arc<dyn IdentityVerifier>,
    store: Arc<dyn UserStore>,
) -> AuthGateway {
    AuthGateway::builder(config, verifier, store)
        .build()
        .expect("valid gateway config")
}

async fn me(context: RequestContext) -> Json<Value> {
    Json(serde_json::json!({
        "uid": context.user_id,
        "role": context.user.role,
        "isAdmin": context.user.is_admin,
        "source": context.user.source,
    }))
}

/// `/me` behind the gateway layer.
pub fn protected_router(gateway: &AuthGateway) -> Router {
    Router::new()
        .route("/me", get(me))
        .layer(gateway.layer())
}

/// `GET /me` arriving from the socket peer `address`.
pub fn request(address: &str, credential: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().uri("/me");
    if let Some(credential) = credential {
        builder = builder.header("authorization", format!("Bearer {credential}"));
    }
    let mut request = builder.body(Body::empty()).unwrap();
    let peer = SocketAddr::new(address.parse().unwrap(), 40000);
    request.extensions_mut().insert(ConnectInfo(peer));
    request
}

/// Like [`request`], with an `X-Forwarded-For` header naming another client.
pub fn forwarded_request(
    peer: &str,
    forwarded_for: &str,
    credential: Option<&str>,
) -> Request<Body> {
    let mut request = request(peer, credential);
    request
        .headers_mut()
        .insert("x-forwarded-for", forwarded_for.parse().unwrap());
    request
}

/// Log output collected by [`capture_logs`].
#[derive(Clone, Default)]
pub struct LogBuffer(Arc<Mutex<Vec<u8>>>);

impl LogBuffer {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock()).into_owned()
    }
}

impl io::Write for LogBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Route events at `level` and above on the current thread into a buffer
/// until the guard drops.
pub fn capture_logs(level: tracing::Level) -> (LogBuffer, DefaultGuard) {
    let buffer = LogBuffer::default();
    let writer = buffer.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_ansi(false)
        .with_writer(move || writer.clone())
        .finish();
    (buffer, tracing::subscriber::set_default(subscriber))
}

pub async fn json_body(response: Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

pub async fn error_code(response: Response) -> (StatusCode, String) {
    let status = response.status();
    let body = json_body(response).await;
    (status, body["error"].as_str().unwrap_or_default().to_string())
}
