//! Metrics registry and the mapping from [`StatsSnapshot`] to gauges.
//!
//! The registry is an explicit object holding its own Prometheus recorder. Writes go
//! through `metrics` macros scoped to that recorder, so separate registries (one per
//! test, one per process) never see each other's values.
//!
//! All metrics are prefixed with `pihole_`; every series carries a `hostname` label.

use metrics::{counter, describe_counter, describe_gauge, gauge, with_local_recorder, Unit};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle, PrometheusRecorder};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};

use crate::scrape::ScrapeStatus;
use crate::stats::StatsSnapshot;

/// Content type of [`MetricsRegistry::render`].
pub const EXPOSITION_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

const GAUGES: &[(&str, &str)] = &[
    ("pihole_domains_being_blocked", "This represent the number of domains being blocked"),
    ("pihole_dns_queries_today", "This represent the number of DNS queries made over the current day"),
    ("pihole_ads_blocked_today", "This represent the number of ads blocked over the current day"),
    ("pihole_ads_percentage_today", "This represent the percentage of ads blocked over the current day"),
    ("pihole_unique_domains", "This represent the number of unique domains seen"),
    ("pihole_queries_forwarded", "This represent the number of queries forwarded"),
    ("pihole_queries_cached", "This represent the number of queries cached"),
    ("pihole_clients_ever_seen", "This represent the number of clients ever seen"),
    ("pihole_unique_clients", "This represent the number of unique clients seen"),
    ("pihole_dns_queries_all_types", "This represent the number of DNS queries made for all types"),
    ("pihole_reply", "This represent the number of replies made for all types"),
    ("pihole_top_queries", "This represent the number of top queries made by Pi-hole by domain"),
    ("pihole_top_ads", "This represent the number of top ads made by Pi-hole by domain"),
    ("pihole_top_sources", "This represent the number of top sources requests made by Pi-hole by source host"),
    ("pihole_forward_destinations", "This represent the number of forward destinations requests made by Pi-hole by destination"),
    ("pihole_forward_destinations_responsetime", "This represent the seconds a forward destination took to process a request"),
    ("pihole_forward_destinations_responsevariance", "This represent the variance in response time for forward destinations"),
    ("pihole_querytypes", "This represent the number of queries made by Pi-hole by type"),
    ("pihole_status", "This if Pi-hole is enabled"),
];

/// What empty top-domain lists say about a host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopDomainsSignal {
    /// At least one top-domain list has entries.
    Populated,
    /// Both lists are empty and the host has seen no queries.
    NoQueries,
    /// Both lists are empty although queries were made; usually a missing or
    /// rejected session.
    SuspectAuth,
}

impl TopDomainsSignal {
    /// Classify a snapshot.
    pub fn classify(snapshot: &StatsSnapshot) -> Self {
        if !snapshot.top_blocked.is_empty() || !snapshot.top_permitted.is_empty() {
            TopDomainsSignal::Populated
        } else if snapshot.summary.queries.total == 0 {
            TopDomainsSignal::NoQueries
        } else {
            TopDomainsSignal::SuspectAuth
        }
    }
}

/// Label used for a reply type key of the summary.
pub fn reply_label(key: &str) -> String {
    match key {
        "NODATA" => "no_data".to_string(),
        "NXDOMAIN" => "nx_domain".to_string(),
        other => other.to_ascii_lowercase(),
    }
}

/// Process metrics registry.
pub struct MetricsRegistry {
    recorder: PrometheusRecorder,
    handle: PrometheusHandle,
    /// Last `source_name` written per (host, source).
    source_names: Mutex<HashMap<(String, String), String>>,
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsRegistry {
    /// Create an empty registry with all metrics described.
    pub fn new() -> Self {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        let registry = Self {
            recorder,
            handle,
            source_names: Mutex::new(HashMap::new()),
        };

        registry.record(|| {
            for (name, help) in GAUGES {
                describe_gauge!(*name, *help);
            }
            describe_counter!(
                "pihole_exporter_scrapes_total",
                "Scrapes of each Pi-hole by outcome"
            );
            describe_gauge!(
                "pihole_exporter_scrape_duration_seconds",
                Unit::Seconds,
                "Duration of the last successful scrape of each Pi-hole"
            );
        });
        registry
    }

    /// Render the text exposition of every recorded series.
    pub fn render(&self) -> String {
        self.handle.render()
    }

    fn record<T>(&self, f: impl FnOnce() -> T) -> T {
        with_local_recorder(&self.recorder, f)
    }

    /// Write a snapshot for `host`. Every series is overwritten with the latest value.
    ///
    /// Series are written one by one; a concurrent render can see a host half updated.
    pub fn apply(&self, host: &str, snapshot: &StatsSnapshot) {
        match TopDomainsSignal::classify(snapshot) {
            TopDomainsSignal::SuspectAuth => warn!(
                host,
                total_queries = snapshot.summary.queries.total,
                "top domain lists are empty although queries were made; check the Pi-hole password"
            ),
            TopDomainsSignal::NoQueries => {
                debug!(host, "top domain lists are empty, no queries yet")
            }
            TopDomainsSignal::Populated => {}
        }

        let queries = &snapshot.summary.queries;
        let hostname = host.to_string();
        let renamed = self.renamed_sources(host, snapshot);

        self.record(|| {
            let set = |name: &'static str, value: f64| {
                gauge!(name, "hostname" => hostname.clone()).set(value);
            };
            set(
                "pihole_domains_being_blocked",
                snapshot.summary.gravity.domains_being_blocked as f64,
            );
            set("pihole_dns_queries_today", queries.total as f64);
            set("pihole_ads_blocked_today", queries.blocked as f64);
            set("pihole_ads_percentage_today", queries.percent_blocked);
            set("pihole_unique_domains", queries.unique_domains as f64);
            set("pihole_queries_forwarded", queries.forwarded as f64);
            set("pihole_queries_cached", queries.cached as f64);
            set("pihole_clients_ever_seen", snapshot.summary.clients.total as f64);
            set("pihole_unique_clients", snapshot.summary.clients.active as f64);
            set(
                "pihole_dns_queries_all_types",
                queries.types.values().sum::<u64>() as f64,
            );
            set("pihole_status", if snapshot.blocking_enabled { 1.0 } else { 0.0 });

            for (reply, count) in &queries.replies {
                gauge!("pihole_reply", "hostname" => hostname.clone(), "type" => reply_label(reply))
                    .set(*count as f64);
            }

            for (query_type, count) in &queries.types {
                gauge!("pihole_querytypes", "hostname" => hostname.clone(), "type" => query_type.clone())
                    .set(*count as f64);
            }

            for entry in &snapshot.top_permitted {
                gauge!("pihole_top_queries", "hostname" => hostname.clone(), "domain" => entry.domain.clone())
                    .set(entry.count as f64);
            }

            for entry in &snapshot.top_blocked {
                gauge!("pihole_top_ads", "hostname" => hostname.clone(), "domain" => entry.domain.clone())
                    .set(entry.count as f64);
            }

            for client in &snapshot.top_clients {
                gauge!(
                    "pihole_top_sources",
                    "hostname" => hostname.clone(),
                    "source" => client.ip.clone(),
                    "source_name" => client.name.clone().unwrap_or_default()
                )
                .set(client.count as f64);
            }

            // The series under a client's previous name no longer counts anything.
            for (source, old_name) in renamed {
                debug!(host = %hostname, %source, %old_name, "top source renamed");
                gauge!(
                    "pihole_top_sources",
                    "hostname" => hostname.clone(),
                    "source" => source,
                    "source_name" => old_name
                )
                .set(0.0);
            }

            for upstream in &snapshot.upstreams {
                let destination = upstream
                    .ip
                    .clone()
                    .or_else(|| upstream.name.clone())
                    .unwrap_or_default();
                let destination_name = upstream
                    .name
                    .clone()
                    .unwrap_or_else(|| destination.clone());
                let labels = [
                    ("hostname", hostname.clone()),
                    ("destination", destination),
                    ("destination_name", destination_name),
                ];

                gauge!("pihole_forward_destinations", &labels).set(upstream.count as f64);
                gauge!("pihole_forward_destinations_responsetime", &labels)
                    .set(upstream.statistics.response);
                gauge!("pihole_forward_destinations_responsevariance", &labels)
                    .set(upstream.statistics.variance);
            }
        });
    }

    /// Remember each top client's name and return the (source, previous name) pairs
    /// whose name changed since the last apply.
    fn renamed_sources(&self, host: &str, snapshot: &StatsSnapshot) -> Vec<(String, String)> {
        let mut names = self.source_names.lock();
        snapshot
            .top_clients
            .iter()
            .filter_map(|client| {
                let name = client.name.clone().unwrap_or_default();
                let key = (host.to_string(), client.ip.clone());
                names
                    .insert(key, name.clone())
                    .filter(|previous| *previous != name)
                    .map(|previous| (client.ip.clone(), previous))
            })
            .collect()
    }

    /// Count one scrape of `host`; successful scrapes also record their duration.
    pub fn record_scrape(&self, host: &str, status: ScrapeStatus, took: Option<Duration>) {
        self.record(|| {
            counter!(
                "pihole_exporter_scrapes_total",
                "hostname" => host.to_string(),
                "outcome" => status.as_str()
            )
            .increment(1);

            if let (ScrapeStatus::Success, Some(took)) = (status, took) {
                gauge!("pihole_exporter_scrape_duration_seconds", "hostname" => host.to_string())
                    .set(took.as_secs_f64());
            }
        });
    }
}

/// Value of a series in a rendered exposition, matching labels in any order.
pub fn sample(rendered: &str, name: &str, labels: &[(&str, &str)]) -> Option<f64> {
    rendered.lines().find_map(|line| {
        if line.starts_with('#') {
            return None;
        }
        let (series, value) = line.rsplit_once(' ')?;
        let (series_name, series_labels) = match series.split_once('{') {
            Some((n, rest)) => (n, rest.trim_end_matches('}')),
            None => (series, ""),
        };
        if series_name != name {
            return None;
        }

        let mut found: Vec<(&str, &str)> = series_labels
            .split(',')
            .filter(|pair| !pair.is_empty())
            .filter_map(|pair| {
                let (k, v) = pair.split_once('=')?;
                Some((k, v.trim_matches('"')))
            })
            .collect();
        let mut wanted = labels.to_vec();
        found.sort_unstable();
        wanted.sort_unstable();

        (found == wanted).then(|| value.parse().ok()).flatten()
    })
}
