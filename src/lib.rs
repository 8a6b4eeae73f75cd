//! Pi-hole exporter - Prometheus metrics for one or more Pi-hole appliances.
//!
//! The exporter talks to each appliance's JSON web API, turns the statistics into
//! gauges and serves them on `/metrics` together with `/readiness` and `/liveness`
//! probes.
//!
//! ## Architecture
//!
//! ```text
//! GET /metrics
//!     │
//!     ▼
//! ┌────────────────────┐   one task per host, shared deadline
//! │ ScrapeCoordinator  │──────────────┬──────────────┐
//! └─────────┬──────────┘              ▼              ▼
//!           │                 ┌───────────────┐ ┌───────────────┐
//!           │                 │ SessionClient │ │ SessionClient │ ...
//!           │                 │  + stats      │ │  + stats      │
//!           │                 └───────┬───────┘ └───────┬───────┘
//!           ▼                         ▼                 ▼
//! ┌────────────────────┐      StatsSnapshot ──▶ MetricsRegistry::apply
//! │  MetricsRegistry   │◀─────────────────────────────────┘
//! └─────────┬──────────┘
//!           ▼
//!    text exposition (200), or 400 with every host's error
//! ```
//!
//! A host that fails or misses the deadline keeps its previous values; the response
//! is an error only when no host contributed.
//!
//! ## Example Usage
//!
//! ```rust,ignore
//! use pihole_exporter::{ExporterConfig, ExporterServer, MetricsRegistry, ScrapeCoordinator, SessionClient};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ExporterConfig::default();
//!     let collectors = config
//!         .split()?
//!         .into_iter()
//!         .map(|host| SessionClient::new(host, config.timeout).map(|c| Arc::new(c) as _))
//!         .collect::<Result<Vec<_>, _>>()?;
//!
//!     let registry = Arc::new(MetricsRegistry::new());
//!     let coordinator = Arc::new(ScrapeCoordinator::new(collectors, registry, config.scrape_timeout));
//!     ExporterServer::new(coordinator, None)
//!         .bind_and_run(&config.listen_addr(), pihole_exporter::server::shutdown_signal())
//!         .await?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]

pub mod api;
pub mod config;
pub mod error;
pub mod metrics;
pub mod scrape;
pub mod server;
pub mod session;
pub mod stats;
pub mod telemetry;

// Re-export main types
pub use config::{ExporterConfig, HostConfig, Protocol};
pub use error::ExporterError;
pub use metrics::MetricsRegistry;
pub use scrape::{Collector, ScrapeCoordinator, ScrapeOutcome, ScrapeReport, ScrapeStatus};
pub use server::ExporterServer;
pub use session::SessionClient;
pub use stats::StatsSnapshot;
pub use telemetry::TelemetryConfig;
