//! JSON models of the Pi-hole web API.
//!
//! Only the fields the exporter maps are modelled; everything else is ignored.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Request body of `POST /api/auth`.
#[derive(Debug, Clone, Serialize)]
pub struct AuthRequest<'a> {
    /// Web interface or app password.
    pub password: &'a str,
}

/// Response of `POST /api/auth`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AuthResponse {
    /// Session state.
    pub session: SessionInfo,
}

/// Session block of [`AuthResponse`].
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SessionInfo {
    /// Whether the credential was accepted.
    pub valid: bool,
    /// Session identifier. Absent or null when not valid.
    #[serde(default)]
    pub sid: Option<String>,
    /// Seconds the session stays valid.
    #[serde(default)]
    pub validity: i64,
}

/// Response of `GET /api/stats/summary`.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Summary {
    /// Query counters.
    #[serde(default)]
    pub queries: QueryCounters,
    /// Client counters.
    #[serde(default)]
    pub clients: ClientCounters,
    /// Blocklist state.
    #[serde(default)]
    pub gravity: Gravity,
}

/// `queries` block of [`Summary`].
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct QueryCounters {
    /// Total queries today.
    #[serde(default)]
    pub total: u64,
    /// Blocked queries today.
    #[serde(default)]
    pub blocked: u64,
    /// Share of blocked queries, in percent.
    #[serde(default)]
    pub percent_blocked: f64,
    /// Distinct domains queried.
    #[serde(default)]
    pub unique_domains: u64,
    /// Queries forwarded upstream.
    #[serde(default)]
    pub forwarded: u64,
    /// Queries answered from cache.
    #[serde(default)]
    pub cached: u64,
    /// Count per query type (`A`, `AAAA`, ...).
    #[serde(default)]
    pub types: BTreeMap<String, u64>,
    /// Count per reply type (`NODATA`, `NXDOMAIN`, ...).
    #[serde(default)]
    pub replies: BTreeMap<String, u64>,
}

/// `clients` block of [`Summary`].
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ClientCounters {
    /// Clients seen recently.
    #[serde(default)]
    pub active: u64,
    /// Clients ever seen.
    #[serde(default)]
    pub total: u64,
}

/// `gravity` block of [`Summary`].
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Gravity {
    /// Domains on the blocklist.
    #[serde(default)]
    pub domains_being_blocked: u64,
}

/// Response of `GET /api/stats/top_domains`.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct TopDomains {
    /// Domains ordered by count.
    #[serde(default)]
    pub domains: Vec<DomainCount>,
}

/// One entry of [`TopDomains`].
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct DomainCount {
    /// Queried domain.
    pub domain: String,
    /// Number of queries.
    pub count: u64,
}

/// Response of `GET /api/stats/top_clients`.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct TopClients {
    /// Clients ordered by count.
    #[serde(default)]
    pub clients: Vec<ClientCount>,
}

/// One entry of [`TopClients`].
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ClientCount {
    /// Client address; the identity used when merging lists.
    pub ip: String,
    /// Resolved client name, may be empty.
    #[serde(default)]
    pub name: Option<String>,
    /// Number of queries.
    pub count: u64,
}

/// Response of `GET /api/stats/upstreams`.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Upstreams {
    /// Forward destinations, including the `blocklist` and `cache` pseudo entries.
    #[serde(default)]
    pub upstreams: Vec<Upstream>,
}

/// One entry of [`Upstreams`].
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Upstream {
    /// Destination address or pseudo name.
    pub ip: Option<String>,
    /// Resolved destination name.
    #[serde(default)]
    pub name: Option<String>,
    /// Destination port, `-1` for pseudo entries.
    #[serde(default)]
    pub port: i64,
    /// Queries sent to this destination.
    #[serde(default)]
    pub count: u64,
    /// Response time statistics.
    #[serde(default)]
    pub statistics: UpstreamStatistics,
}

/// Response time block of [`Upstream`].
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct UpstreamStatistics {
    /// Mean response time in seconds.
    #[serde(default)]
    pub response: f64,
    /// Response time variance.
    #[serde(default)]
    pub variance: f64,
}

/// Response of `GET /api/dns/blocking`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Blocking {
    /// `enabled`, `disabled`, `failed` or `unknown`.
    pub blocking: String,
}

impl Blocking {
    /// Whether ad blocking is active.
    pub fn is_enabled(&self) -> bool {
        self.blocking.eq_ignore_ascii_case("enabled")
    }
}
