//! Error types for pihole-exporter.

use std::time::Duration;

use thiserror::Error;

use crate::scrape::ScrapeStatus;

/// Errors that can occur while configuring the exporter or scraping a host.
#[derive(Debug, Error)]
pub enum ExporterError {
    /// Invalid configuration. Fatal at startup.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// The appliance rejected the credential or returned an invalid session.
    #[error("authentication to {host} failed: {reason}")]
    Authentication {
        /// Base URL of the appliance.
        host: String,
        /// What went wrong.
        reason: String,
    },

    /// Network level failure talking to the appliance.
    #[error("request to {url} failed: {source}")]
    Transport {
        /// Requested URL.
        url: String,
        /// Underlying HTTP client error.
        #[source]
        source: reqwest::Error,
    },

    /// The appliance answered with a non-200 status.
    #[error("non-200 status code from {url}: {status}")]
    HttpStatus {
        /// Requested URL.
        url: String,
        /// Status code received.
        status: u16,
    },

    /// The response body could not be read or parsed.
    #[error("failed to decode response from {url}: {reason}")]
    Decode {
        /// Requested URL.
        url: String,
        /// Parse or size failure.
        reason: String,
    },

    /// The host did not finish collecting before the scrape deadline.
    #[error("scrape of {host} timed out after {after:?}")]
    Timeout {
        /// Host identifier.
        host: String,
        /// Deadline that elapsed.
        after: Duration,
    },

    /// A stats request failed; names the endpoint that was being fetched.
    #[error("fetching {endpoint}: {source}")]
    Endpoint {
        /// Logical endpoint name, e.g. "summary".
        endpoint: &'static str,
        /// Wrapped failure.
        #[source]
        source: Box<ExporterError>,
    },

    /// The client was closed during shutdown.
    #[error("client for {0} is closed")]
    Closed(String),

    /// Every configured host failed in one scrape cycle.
    #[error("{}", .0.join("\n"))]
    AllHostsFailed(Vec<String>),

    /// IO error (listener bind, etc.)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ExporterError {
    /// Wrap this error with the endpoint that produced it.
    pub fn at(self, endpoint: &'static str) -> Self {
        ExporterError::Endpoint {
            endpoint,
            source: Box::new(self),
        }
    }

    /// Per-host outcome classification of this error.
    pub fn outcome(&self) -> ScrapeStatus {
        match self {
            ExporterError::Timeout { .. } => ScrapeStatus::Timeout,
            ExporterError::Endpoint { source, .. } => source.outcome(),
            _ => ScrapeStatus::Error,
        }
    }
}
