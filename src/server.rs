//! HTTP server exposing metrics and health probes, and its lifecycle.

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::ExporterError;
use crate::metrics::EXPOSITION_CONTENT_TYPE;
use crate::scrape::ScrapeCoordinator;

/// Periodically run scrape cycles until shutdown.
async fn collect_loop(
    coordinator: Arc<ScrapeCoordinator>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut interval = tokio::time::interval(period);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                let report = coordinator.run_cycle().await;
                if report.all_failed() {
                    warn!(errors = ?report.errors(), "every host failed this cycle");
                } else {
                    debug!(hosts = report.outcomes.len(), "collected");
                }
            }
            _ = shutdown.changed() => {
                debug!("collect loop shutting down");
                return;
            }
        }
    }
}

#[derive(Clone)]
struct AppState {
    coordinator: Arc<ScrapeCoordinator>,
    ready: Arc<AtomicBool>,
    on_demand: bool,
}

/// Exporter HTTP server.
pub struct ExporterServer {
    coordinator: Arc<ScrapeCoordinator>,
    collect_interval: Option<Duration>,
    ready: Arc<AtomicBool>,
}

impl ExporterServer {
    /// Create a server. Without `collect_interval` every `/metrics` request runs a
    /// scrape cycle; with it a background loop collects and `/metrics` only renders.
    pub fn new(coordinator: Arc<ScrapeCoordinator>, collect_interval: Option<Duration>) -> Self {
        Self {
            coordinator,
            collect_interval,
            ready: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Whether `/readiness` currently answers 200.
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    /// Routes served by the exporter.
    pub fn router(&self) -> Router {
        let state = AppState {
            coordinator: Arc::clone(&self.coordinator),
            ready: Arc::clone(&self.ready),
            on_demand: self.collect_interval.is_none(),
        };

        Router::new()
            .route("/metrics", get(metrics_handler))
            .route("/readiness", get(readiness_handler))
            .route("/liveness", get(liveness_handler))
            .with_state(state)
    }

    /// Bind `addr` and serve until `shutdown` resolves.
    pub async fn bind_and_run(
        self,
        addr: &str,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> Result<(), ExporterError> {
        let listener = TcpListener::bind(addr).await?;
        info!(addr = %listener.local_addr()?, "HTTP server listening");
        self.run(listener, shutdown).await
    }

    /// Serve on `listener` until `shutdown` resolves, then close every client.
    pub async fn run(
        self,
        listener: TcpListener,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> Result<(), ExporterError> {
        let (stop_tx, stop_rx) = watch::channel(false);

        let loop_handle = self.collect_interval.map(|period| {
            info!(interval = ?period, "collecting on a fixed interval");
            tokio::spawn(collect_loop(Arc::clone(&self.coordinator), period, stop_rx))
        });

        let ready = Arc::clone(&self.ready);
        let graceful = async move {
            shutdown.await;
            info!("shutdown requested");
            ready.store(false, Ordering::SeqCst);
            let _ = stop_tx.send(true);
        };

        let result = axum::serve(listener, self.router())
            .with_graceful_shutdown(graceful)
            .await;

        if let Some(handle) = loop_handle {
            let _ = handle.await;
        }
        self.coordinator.close();
        info!("HTTP server stopped");

        result.map_err(ExporterError::from)
    }
}

async fn metrics_handler(State(state): State<AppState>) -> Response {
    if state.on_demand {
        let report = state.coordinator.run_cycle().await;
        if let Err(err) = report.into_result() {
            return (StatusCode::BAD_REQUEST, err.to_string()).into_response();
        }
    }

    (
        [(header::CONTENT_TYPE, EXPOSITION_CONTENT_TYPE)],
        state.coordinator.registry().render(),
    )
        .into_response()
}

async fn readiness_handler(State(state): State<AppState>) -> StatusCode {
    if state.ready.load(Ordering::SeqCst) {
        StatusCode::OK
    } else {
        StatusCode::NOT_FOUND
    }
}

async fn liveness_handler() -> StatusCode {
    StatusCode::OK
}

/// Wait for Ctrl+C or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
