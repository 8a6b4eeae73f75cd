//! Shared test infrastructure: a fake Pi-hole web API and stub collectors.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::net::TcpListener;

use pihole_exporter::api::{ClientCount, DomainCount};
use pihole_exporter::config::{HostConfig, Protocol};
use pihole_exporter::scrape::Collector;
use pihole_exporter::session::SessionClient;
use pihole_exporter::stats::{self, StatsSnapshot};
use pihole_exporter::ExporterError;

// --- Constants ---

pub const PASSWORD: &str = "correct horse";
pub const HTTP_TIMEOUT: Duration = Duration::from_secs(5);

// --- Fake appliance ---

/// Mutable behaviour and request log of a [`FakePihole`].
pub struct FakeState {
    password: Option<String>,
    pub validity: AtomicI64,
    pub auth_calls: AtomicUsize,
    pub data_calls: AtomicUsize,
    /// Data requests that arrived without the current session while one was required.
    pub unauthorized_calls: AtomicUsize,
    pub total_queries: AtomicU64,
    pub empty_top_domains: AtomicBool,
    pub malformed: AtomicBool,
    pub oversized: AtomicBool,
    sid_counter: AtomicUsize,
    current_sid: Mutex<Option<String>>,
    auth_delay: Mutex<Duration>,
    data_delay: Mutex<Duration>,
    fail_path: Mutex<Option<(String, StatusCode)>>,
    events: Mutex<Vec<String>>,
}

impl FakeState {
    fn new(password: Option<&str>) -> Self {
        Self {
            password: password.map(String::from),
            validity: AtomicI64::new(300),
            auth_calls: AtomicUsize::new(0),
            data_calls: AtomicUsize::new(0),
            unauthorized_calls: AtomicUsize::new(0),
            total_queries: AtomicU64::new(120),
            empty_top_domains: AtomicBool::new(false),
            malformed: AtomicBool::new(false),
            oversized: AtomicBool::new(false),
            sid_counter: AtomicUsize::new(0),
            current_sid: Mutex::new(None),
            auth_delay: Mutex::new(Duration::ZERO),
            data_delay: Mutex::new(Duration::ZERO),
            fail_path: Mutex::new(None),
            events: Mutex::new(Vec::new()),
        }
    }

    pub fn set_validity(&self, secs: i64) {
        self.validity.store(secs, Ordering::SeqCst);
    }

    pub fn set_auth_delay(&self, delay: Duration) {
        *self.auth_delay.lock().unwrap() = delay;
    }

    pub fn set_data_delay(&self, delay: Duration) {
        *self.data_delay.lock().unwrap() = delay;
    }

    /// Answer `path` with `status` from now on.
    pub fn fail(&self, path: &str, status: StatusCode) {
        *self.fail_path.lock().unwrap() = Some((path.to_string(), status));
    }

    pub fn auth_calls(&self) -> usize {
        self.auth_calls.load(Ordering::SeqCst)
    }

    pub fn data_calls(&self) -> usize {
        self.data_calls.load(Ordering::SeqCst)
    }

    pub fn unauthorized_calls(&self) -> usize {
        self.unauthorized_calls.load(Ordering::SeqCst)
    }

    /// Request log: `auth` for logins, the path for data requests.
    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    fn log(&self, event: &str) {
        self.events.lock().unwrap().push(event.to_string());
    }
}

/// A fake Pi-hole web API on a random local port.
pub struct FakePihole {
    pub addr: SocketAddr,
    pub state: Arc<FakeState>,
    _shutdown: tokio::sync::oneshot::Sender<()>,
}

impl FakePihole {
    /// Appliance requiring `PASSWORD`.
    pub async fn start() -> Self {
        Self::start_with(Some(PASSWORD)).await
    }

    /// Appliance without authentication.
    pub async fn start_open() -> Self {
        Self::start_with(None).await
    }

    pub async fn start_with(password: Option<&str>) -> Self {
        let state = Arc::new(FakeState::new(password));
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind fake pihole");
        let addr = listener.local_addr().expect("failed to get local addr");

        let app = Router::new()
            .route("/api/auth", post(auth_handler))
            .route("/api/stats/summary", get(data_handler))
            .route("/api/stats/top_domains", get(data_handler))
            .route("/api/stats/top_clients", get(data_handler))
            .route("/api/stats/upstreams", get(data_handler))
            .route("/api/dns/blocking", get(data_handler))
            .with_state(Arc::clone(&state));

        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        tokio::spawn(async move {
            let _ = axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = rx.await;
                })
                .await;
        });

        Self {
            addr,
            state,
            _shutdown: tx,
        }
    }

    /// Host configuration pointing at this appliance.
    pub fn host_config(&self, password: &str) -> HostConfig {
        HostConfig {
            protocol: Protocol::Http,
            hostname: self.addr.ip().to_string(),
            port: self.addr.port(),
            password: password.to_string(),
            skip_tls_verify: false,
        }
    }

    /// Session client using the right password for this appliance.
    pub fn client(&self) -> SessionClient {
        let password = self.state.password.clone().unwrap_or_default();
        SessionClient::new(self.host_config(&password), HTTP_TIMEOUT)
            .expect("failed to build client")
    }
}

async fn auth_handler(State(state): State<Arc<FakeState>>, Json(body): Json<Value>) -> Response {
    state.auth_calls.fetch_add(1, Ordering::SeqCst);
    state.log("auth");

    let delay = *state.auth_delay.lock().unwrap();
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }

    let given = body.get("password").and_then(Value::as_str);
    if given != state.password.as_deref() {
        let invalid = json!({"session": {"valid": false, "totp": false, "sid": null, "validity": -1}});
        return (StatusCode::UNAUTHORIZED, Json(invalid)).into_response();
    }

    let n = state.sid_counter.fetch_add(1, Ordering::SeqCst) + 1;
    let sid = format!("sid-{n}");
    *state.current_sid.lock().unwrap() = Some(sid.clone());

    Json(json!({
        "session": {
            "valid": true,
            "totp": false,
            "sid": sid,
            "validity": state.validity.load(Ordering::SeqCst),
        },
        "took": 0.001
    }))
    .into_response()
}

async fn data_handler(
    State(state): State<Arc<FakeState>>,
    headers: HeaderMap,
    uri: Uri,
) -> Response {
    state.data_calls.fetch_add(1, Ordering::SeqCst);
    let path = uri.path().to_string();
    state.log(&path);

    let delay = *state.data_delay.lock().unwrap();
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }

    if state.password.is_some() {
        let sent = headers.get("X-FTL-SID").and_then(|v| v.to_str().ok());
        let current = state.current_sid.lock().unwrap().clone();
        if sent.is_none() || sent != current.as_deref() {
            state.unauthorized_calls.fetch_add(1, Ordering::SeqCst);
            let body = json!({"error": {"key": "unauthorized", "message": "Unauthorized"}});
            return (StatusCode::UNAUTHORIZED, Json(body)).into_response();
        }
    }

    if let Some((fail_path, status)) = state.fail_path.lock().unwrap().clone() {
        if fail_path == path {
            return (status, "internal error").into_response();
        }
    }
    if state.malformed.load(Ordering::SeqCst) {
        return (StatusCode::OK, "{not json").into_response();
    }
    if state.oversized.load(Ordering::SeqCst) {
        let padding = "x".repeat(2 * 1024 * 1024);
        return Json(json!({ "padding": padding })).into_response();
    }

    let blocked = uri.query().unwrap_or("").contains("blocked=true");
    let empty_top = state.empty_top_domains.load(Ordering::SeqCst);
    let total = state.total_queries.load(Ordering::SeqCst);

    let body = match path.as_str() {
        "/api/stats/summary" => summary_body(total),
        "/api/stats/top_domains" if empty_top => json!({"domains": [], "total_queries": total}),
        "/api/stats/top_domains" if blocked => json!({"domains": [
            {"domain": "ads.example.com", "count": 40},
            {"domain": "tracker.example.net", "count": 12}
        ]}),
        "/api/stats/top_domains" => json!({"domains": [
            {"domain": "example.org", "count": 55}
        ]}),
        "/api/stats/top_clients" if blocked => json!({"clients": [
            {"ip": "10.0.0.5", "name": "laptop.lan", "count": 30},
            {"ip": "10.0.0.9", "name": "", "count": 4}
        ]}),
        "/api/stats/top_clients" => json!({"clients": [
            {"ip": "10.0.0.5", "name": "laptop.lan", "count": 60},
            {"ip": "10.0.0.7", "name": "phone.lan", "count": 20}
        ]}),
        "/api/stats/upstreams" => json!({"upstreams": [
            {"ip": "blocklist", "name": "blocklist", "port": -1, "count": 52,
             "statistics": {"response": 0.0, "variance": 0.0}},
            {"ip": "1.1.1.1", "name": "one.one.one.one", "port": 53, "count": 60,
             "statistics": {"response": 0.015, "variance": 0.002}}
        ], "forwarded_queries": 60, "total_queries": total}),
        "/api/dns/blocking" => json!({"blocking": "enabled", "timer": null}),
        _ => return StatusCode::NOT_FOUND.into_response(),
    };
    Json(body).into_response()
}

fn summary_body(total: u64) -> Value {
    json!({
        "queries": {
            "total": total,
            "blocked": 52,
            "percent_blocked": 43.3,
            "unique_domains": 31,
            "forwarded": 60,
            "cached": 8,
            "types": {"A": 70, "AAAA": 40, "HTTPS": 10},
            "replies": {"NODATA": 5, "NXDOMAIN": 2, "CNAME": 11, "IP": 90}
        },
        "clients": {"active": 3, "total": 7},
        "gravity": {"domains_being_blocked": 123456, "last_update": 1725194639},
        "took": 0.002
    })
}

// --- Collectors ---

/// Real session client reported under a chosen host id.
pub struct NamedClient {
    pub id: String,
    pub client: SessionClient,
}

#[async_trait]
impl Collector for NamedClient {
    fn host_id(&self) -> &str {
        &self.id
    }

    async fn collect(&self) -> Result<StatsSnapshot, ExporterError> {
        stats::collect(&self.client).await
    }

    fn close(&self) {
        self.client.close();
    }
}

/// How a [`StubCollector`] behaves on its next collections.
#[derive(Debug, Clone)]
pub enum Behavior {
    Succeed(StatsSnapshot),
    Fail,
    Slow(Duration, StatsSnapshot),
}

/// In-process collector with scripted behaviour.
pub struct StubCollector {
    id: String,
    behavior: Mutex<Behavior>,
    pub calls: AtomicUsize,
    pub finished: AtomicUsize,
    pub closed: AtomicBool,
}

impl StubCollector {
    pub fn new(id: &str, behavior: Behavior) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            behavior: Mutex::new(behavior),
            calls: AtomicUsize::new(0),
            finished: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        })
    }

    pub fn set(&self, behavior: Behavior) {
        *self.behavior.lock().unwrap() = behavior;
    }
}

#[async_trait]
impl Collector for StubCollector {
    fn host_id(&self) -> &str {
        &self.id
    }

    async fn collect(&self) -> Result<StatsSnapshot, ExporterError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let behavior = self.behavior.lock().unwrap().clone();
        let result = match behavior {
            Behavior::Succeed(snapshot) => Ok(snapshot),
            Behavior::Fail => Err(ExporterError::HttpStatus {
                url: format!("http://{}:80/api/stats/summary", self.id),
                status: 500,
            }
            .at("summary")),
            Behavior::Slow(delay, snapshot) => {
                tokio::time::sleep(delay).await;
                Ok(snapshot)
            }
        };
        self.finished.fetch_add(1, Ordering::SeqCst);
        result
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

// --- Snapshot helpers ---

/// Snapshot whose query total is `total`.
pub fn snapshot_with_total(total: u64) -> StatsSnapshot {
    let mut snapshot = StatsSnapshot::default();
    snapshot.summary.queries.total = total;
    snapshot.top_blocked = vec![DomainCount {
        domain: "ads.example.com".to_string(),
        count: total / 2,
    }];
    snapshot.top_clients = vec![ClientCount {
        ip: "10.0.0.5".to_string(),
        name: None,
        count: total,
    }];
    snapshot.blocking_enabled = true;
    snapshot
}

/// `pihole_dns_queries_today` of `host` in a rendered exposition.
pub fn queries_today(rendered: &str, host: &str) -> Option<f64> {
    pihole_exporter::metrics::sample(rendered, "pihole_dns_queries_today", &[("hostname", host)])
}
