//! Scrape coordination across all configured hosts.
//!
//! A cycle spawns one task per host, races each against a shared deadline and applies
//! the snapshots that arrive in time. A task that misses the deadline keeps running in
//! the background; its result is logged and dropped.

use async_trait::async_trait;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::error::ExporterError;
use crate::metrics::MetricsRegistry;
use crate::stats::StatsSnapshot;

/// Default per-host deadline within a cycle.
pub const DEFAULT_SCRAPE_TIMEOUT: Duration = Duration::from_secs(10);

/// Source of statistics for one host.
#[async_trait]
pub trait Collector: Send + Sync {
    /// Identifier used in logs and the `hostname` label.
    fn host_id(&self) -> &str;

    /// Collect a full snapshot.
    async fn collect(&self) -> Result<StatsSnapshot, ExporterError>;

    /// Release network resources.
    fn close(&self) {}
}

/// Per-host result classification of one cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrapeStatus {
    /// The host contributed fresh values.
    Success,
    /// Authentication, transport, status or decode failure.
    Error,
    /// The host missed the cycle deadline.
    Timeout,
}

impl ScrapeStatus {
    /// Lowercase name, used as the `outcome` label.
    pub fn as_str(&self) -> &'static str {
        match self {
            ScrapeStatus::Success => "success",
            ScrapeStatus::Error => "error",
            ScrapeStatus::Timeout => "timeout",
        }
    }
}

/// Result of one host in one cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScrapeOutcome {
    /// Host identifier.
    pub host: String,
    /// Classification.
    pub status: ScrapeStatus,
    /// Error message when the host did not succeed.
    pub error: Option<String>,
}

impl ScrapeOutcome {
    fn success(host: String) -> Self {
        Self {
            host,
            status: ScrapeStatus::Success,
            error: None,
        }
    }

    fn failure(host: String, err: &ExporterError) -> Self {
        Self {
            host,
            status: err.outcome(),
            error: Some(err.to_string()),
        }
    }
}

/// Outcomes of every host in one cycle, in configuration order.
#[derive(Debug, Clone, Default)]
pub struct ScrapeReport {
    /// One entry per host.
    pub outcomes: Vec<ScrapeOutcome>,
}

impl ScrapeReport {
    /// True when hosts were scraped and none of them succeeded.
    pub fn all_failed(&self) -> bool {
        !self.outcomes.is_empty()
            && self
                .outcomes
                .iter()
                .all(|o| o.status != ScrapeStatus::Success)
    }

    /// Error messages of the failed hosts.
    pub fn errors(&self) -> Vec<String> {
        self.outcomes
            .iter()
            .filter_map(|o| o.error.clone())
            .collect()
    }

    /// `AllHostsFailed` when no host contributed, the report otherwise.
    pub fn into_result(self) -> Result<Self, ExporterError> {
        if self.all_failed() {
            Err(ExporterError::AllHostsFailed(self.errors()))
        } else {
            Ok(self)
        }
    }
}

type CollectResult = (Result<StatsSnapshot, ExporterError>, Duration);

/// Runs scrape cycles over a fixed set of hosts.
pub struct ScrapeCoordinator {
    collectors: Vec<Arc<dyn Collector>>,
    registry: Arc<MetricsRegistry>,
    timeout: Duration,
}

impl ScrapeCoordinator {
    /// Create a coordinator writing into `registry`.
    pub fn new(
        collectors: Vec<Arc<dyn Collector>>,
        registry: Arc<MetricsRegistry>,
        timeout: Duration,
    ) -> Self {
        Self {
            collectors,
            registry,
            timeout,
        }
    }

    /// Registry this coordinator writes into.
    pub fn registry(&self) -> &Arc<MetricsRegistry> {
        &self.registry
    }

    /// Number of configured hosts.
    pub fn host_count(&self) -> usize {
        self.collectors.len()
    }

    /// Scrape every host concurrently and apply the results that beat the deadline.
    pub async fn run_cycle(&self) -> ScrapeReport {
        let deadline = Instant::now() + self.timeout;

        let units = self.collectors.iter().map(|collector| {
            let host = collector.host_id().to_string();
            let handle = spawn_collect(Arc::clone(collector));
            self.await_unit(host, handle, deadline)
        });

        let outcomes = join_all(units).await;
        let failed = outcomes
            .iter()
            .filter(|o| o.status != ScrapeStatus::Success)
            .count();
        debug!(hosts = outcomes.len(), failed, "scrape cycle finished");

        ScrapeReport { outcomes }
    }

    async fn await_unit(
        &self,
        host: String,
        mut handle: JoinHandle<CollectResult>,
        deadline: Instant,
    ) -> ScrapeOutcome {
        let outcome = match tokio::time::timeout_at(deadline, &mut handle).await {
            Ok(Ok((Ok(snapshot), took))) => {
                self.registry.apply(&host, &snapshot);
                self.registry
                    .record_scrape(&host, ScrapeStatus::Success, Some(took));
                debug!(host = %host, took_ms = took.as_millis() as u64, "scraped");
                return ScrapeOutcome::success(host);
            }
            Ok(Ok((Err(err), _))) => {
                warn!(host = %host, error = %err, "scrape failed");
                ScrapeOutcome::failure(host, &err)
            }
            Ok(Err(join_err)) => {
                error!(host = %host, error = %join_err, "scrape task panicked");
                ScrapeOutcome {
                    host,
                    status: ScrapeStatus::Error,
                    error: Some(format!("scrape task failed: {join_err}")),
                }
            }
            Err(_) => {
                let err = ExporterError::Timeout {
                    host: host.clone(),
                    after: self.timeout,
                };
                warn!(host = %host, timeout = ?self.timeout, "scrape timed out");
                tokio::spawn(log_straggler(host.clone(), handle));
                ScrapeOutcome::failure(host, &err)
            }
        };

        self.registry.record_scrape(&outcome.host, outcome.status, None);
        outcome
    }

    /// Close every host's transport.
    pub fn close(&self) {
        info!(hosts = self.collectors.len(), "closing clients");
        for collector in &self.collectors {
            collector.close();
        }
        info!("all clients closed");
    }
}

fn spawn_collect(collector: Arc<dyn Collector>) -> JoinHandle<CollectResult> {
    tokio::spawn(async move {
        let started = Instant::now();
        let result = collector.collect().await;
        (result, started.elapsed())
    })
}

/// Wait for a unit that missed its deadline and log how it ended.
async fn log_straggler(host: String, handle: JoinHandle<CollectResult>) {
    match handle.await {
        Ok((Ok(_), took)) => info!(
            host = %host,
            took_ms = took.as_millis() as u64,
            "late scrape finished after the deadline, result discarded"
        ),
        Ok((Err(err), _)) => warn!(host = %host, error = %err, "late scrape failed"),
        Err(join_err) => error!(host = %host, error = %join_err, "late scrape task panicked"),
    }
}
