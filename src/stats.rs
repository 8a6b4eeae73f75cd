//! Statistics collection from one appliance.

use async_trait::async_trait;
use std::collections::BTreeMap;
use tracing::debug;

use crate::api::{Blocking, ClientCount, DomainCount, Summary, TopClients, TopDomains, Upstream, Upstreams};
use crate::error::ExporterError;
use crate::scrape::Collector;
use crate::session::SessionClient;

/// How many entries the top lists request.
pub const TOP_COUNT: u32 = 10;

/// Everything one scrape learns about a host. Built fresh per scrape.
#[derive(Debug, Clone, Default)]
pub struct StatsSnapshot {
    /// Summary counters, including reply and query type counts.
    pub summary: Summary,
    /// Most blocked domains.
    pub top_blocked: Vec<DomainCount>,
    /// Most queried permitted domains.
    pub top_permitted: Vec<DomainCount>,
    /// Top clients, merged from the blocked and permitted lists.
    pub top_clients: Vec<ClientCount>,
    /// Forward destinations with response time statistics.
    pub upstreams: Vec<Upstream>,
    /// Whether ad blocking is enabled.
    pub blocking_enabled: bool,
}

fn top_domains_path(blocked: bool) -> String {
    format!("/api/stats/top_domains?blocked={blocked}&count={TOP_COUNT}")
}

fn top_clients_path(blocked: bool) -> String {
    format!("/api/stats/top_clients?blocked={blocked}&count={TOP_COUNT}")
}

/// Fetch a full snapshot. The first failing request aborts the whole collection.
pub async fn collect(client: &SessionClient) -> Result<StatsSnapshot, ExporterError> {
    let summary: Summary = client
        .fetch("/api/stats/summary")
        .await
        .map_err(|e| e.at("summary"))?;

    let top_blocked: TopDomains = client
        .fetch(&top_domains_path(true))
        .await
        .map_err(|e| e.at("top blocked domains"))?;

    let top_permitted: TopDomains = client
        .fetch(&top_domains_path(false))
        .await
        .map_err(|e| e.at("top permitted domains"))?;

    let blocked_clients: TopClients = client
        .fetch(&top_clients_path(true))
        .await
        .map_err(|e| e.at("top blocked clients"))?;

    let permitted_clients: TopClients = client
        .fetch(&top_clients_path(false))
        .await
        .map_err(|e| e.at("top permitted clients"))?;

    let upstreams: Upstreams = client
        .fetch("/api/stats/upstreams")
        .await
        .map_err(|e| e.at("upstreams"))?;

    let blocking: Blocking = client
        .fetch("/api/dns/blocking")
        .await
        .map_err(|e| e.at("blocking status"))?;

    let snapshot = StatsSnapshot {
        summary,
        top_blocked: top_blocked.domains,
        top_permitted: top_permitted.domains,
        top_clients: merge_clients(&blocked_clients.clients, &permitted_clients.clients),
        upstreams: upstreams.upstreams,
        blocking_enabled: blocking.is_enabled(),
    };
    debug!(
        host = %client.base_url(),
        total = snapshot.summary.queries.total,
        blocked = snapshot.summary.queries.blocked,
        clients = snapshot.top_clients.len(),
        "collected statistics"
    );
    Ok(snapshot)
}

/// Merge two client lists by address, summing the counts of shared entries.
///
/// Identity is deduplicated, counts are not: merging a list with itself doubles every
/// count. The result is ordered by descending count, then address, whatever the input
/// order was.
pub fn merge_clients(a: &[ClientCount], b: &[ClientCount]) -> Vec<ClientCount> {
    let mut merged: BTreeMap<&str, ClientCount> = BTreeMap::new();

    for client in a.iter().chain(b) {
        merged
            .entry(client.ip.as_str())
            .and_modify(|existing| {
                existing.count += client.count;
                if existing.name.as_deref().unwrap_or("").is_empty() {
                    existing.name = client.name.clone();
                }
            })
            .or_insert_with(|| client.clone());
    }

    let mut result: Vec<ClientCount> = merged.into_values().collect();
    result.sort_by(|x, y| y.count.cmp(&x.count).then_with(|| x.ip.cmp(&y.ip)));
    result
}

#[async_trait]
impl Collector for SessionClient {
    fn host_id(&self) -> &str {
        &self.host().hostname
    }

    async fn collect(&self) -> Result<StatsSnapshot, ExporterError> {
        collect(self).await
    }

    fn close(&self) {
        SessionClient::close(self);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(ip: &str, name: Option<&str>, count: u64) -> ClientCount {
        ClientCount {
            ip: ip.to_string(),
            name: name.map(String::from),
            count,
        }
    }

    fn counts(list: &[ClientCount]) -> Vec<(&str, u64)> {
        list.iter().map(|c| (c.ip.as_str(), c.count)).collect()
    }

    #[test]
    fn test_merge_sums_shared_clients() {
        let a = vec![client("ip1", None, 3)];
        let b = vec![client("ip1", None, 2), client("ip2", None, 5)];

        let merged = merge_clients(&a, &b);
        assert_eq!(counts(&merged), vec![("ip1", 5), ("ip2", 5)]);
    }

    #[test]
    fn test_merge_with_itself_doubles_counts() {
        let a = vec![client("ip1", None, 3)];
        assert_eq!(counts(&merge_clients(&a, &a)), vec![("ip1", 6)]);
    }

    #[test]
    fn test_merge_is_order_independent() {
        let a = vec![client("10.0.0.2", None, 1), client("10.0.0.1", None, 7)];
        let b = vec![client("10.0.0.3", None, 4), client("10.0.0.2", None, 9)];

        let ab = merge_clients(&a, &b);
        let ba = merge_clients(&b, &a);
        assert_eq!(ab, ba);
        assert_eq!(
            counts(&ab),
            vec![("10.0.0.2", 10), ("10.0.0.1", 7), ("10.0.0.3", 4)]
        );
    }

    #[test]
    fn test_merge_keeps_first_known_name() {
        let a = vec![client("ip1", Some(""), 1)];
        let b = vec![client("ip1", Some("laptop.lan"), 1)];
        let merged = merge_clients(&a, &b);
        assert_eq!(merged[0].name.as_deref(), Some("laptop.lan"));
    }

    #[test]
    fn test_merge_empty_lists() {
        assert!(merge_clients(&[], &[]).is_empty());
    }

    #[test]
    fn test_top_paths() {
        assert_eq!(
            top_domains_path(true),
            "/api/stats/top_domains?blocked=true&count=10"
        );
        assert_eq!(
            top_clients_path(false),
            "/api/stats/top_clients?blocked=false&count=10"
        );
    }
}
