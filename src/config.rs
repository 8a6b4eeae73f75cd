//! Configuration types for pihole-exporter.
//!
//! Sources are layered with the `config` crate: built-in defaults, an optional TOML
//! file, then environment variables (`PIHOLE_HOSTNAME=a,b`, `PORT=9617`, ...). The
//! binary applies command-line flags on top as overrides.
//!
//! Per-host settings are lists. [`ExporterConfig::split`] turns them into one
//! [`HostConfig`] per hostname; each list may be empty (default), hold a single value
//! shared by every host, or hold exactly one value per host.

use ::config::builder::DefaultState;
use ::config::{ConfigBuilder, Environment, File};
use serde::{Deserialize, Deserializer};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use std::collections::BTreeMap;
use tracing::{info, warn};

use crate::error::ExporterError;
use crate::telemetry::TelemetryConfig;

const DEFAULT_PROTOCOL: Protocol = Protocol::Http;
const DEFAULT_PORT: u16 = 80;
const REDACTED: &str = "*****";

/// Keys parsed as comma separated lists when read from the environment.
const LIST_KEYS: [&str; 4] = [
    "pihole_protocol",
    "pihole_hostname",
    "pihole_port",
    "pihole_password",
];

/// Scheme used to reach an appliance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    /// Plain HTTP.
    Http,
    /// HTTP over TLS.
    Https,
}

impl Protocol {
    /// URL scheme.
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Http => "http",
            Protocol::Https => "https",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Protocol {
    type Err = ExporterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "http" => Ok(Protocol::Http),
            "https" => Ok(Protocol::Https),
            other => Err(ExporterError::Config(format!(
                "protocol {other} is invalid. Must be http or https"
            ))),
        }
    }
}

/// Settings for one monitored appliance. Immutable once built.
#[derive(Clone, PartialEq, Eq)]
pub struct HostConfig {
    /// Scheme used to reach the appliance.
    pub protocol: Protocol,
    /// Hostname or IP address.
    pub hostname: String,
    /// TCP port of the web API.
    pub port: u16,
    /// API password. Empty means the appliance requires no authentication.
    pub password: String,
    /// Accept invalid TLS certificates for this host only.
    pub skip_tls_verify: bool,
}

impl HostConfig {
    /// Base URL of the appliance, e.g. `http://pi.hole:80`.
    pub fn base_url(&self) -> String {
        format!("{}://{}:{}", self.protocol, self.hostname, self.port)
    }

    /// Whether requests to this host carry a session.
    pub fn requires_auth(&self) -> bool {
        !self.password.is_empty()
    }
}

// Display and Debug both go through the same field list so the password never leaks.
impl fmt::Display for HostConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "<HostConfig protocol={}, hostname={}, port={}",
            self.protocol, self.hostname, self.port
        )?;
        if self.requires_auth() {
            write!(f, ", password={REDACTED}")?;
        }
        write!(f, ", skip_tls_verify={}>", self.skip_tls_verify)
    }
}

impl fmt::Debug for HostConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// Process-wide configuration as loaded from file, environment and flags.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct ExporterConfig {
    /// Protocol per host (or one shared value).
    pub pihole_protocol: Vec<String>,
    /// Hostnames to monitor; one client is built per entry.
    pub pihole_hostname: Vec<String>,
    /// Port per host (or one shared value).
    pub pihole_port: Vec<u16>,
    /// Password per host (or one shared value).
    pub pihole_password: Vec<String>,
    /// Address the exporter listens on.
    pub bind_addr: String,
    /// Port the exporter listens on.
    pub port: u16,
    /// Per-request timeout of the upstream HTTP clients.
    #[serde(deserialize_with = "de_duration")]
    pub timeout: Duration,
    /// Deadline for one host's collection within a scrape cycle.
    #[serde(deserialize_with = "de_duration")]
    pub scrape_timeout: Duration,
    /// Collect on a fixed interval instead of on every `/metrics` request.
    #[serde(deserialize_with = "de_opt_duration")]
    pub collect_interval: Option<Duration>,
    /// Skip TLS certificate verification for every host.
    pub skip_tls_verification: bool,
    /// Enable debug logging.
    pub debug: bool,
}

impl Default for ExporterConfig {
    fn default() -> Self {
        Self {
            pihole_protocol: vec![DEFAULT_PROTOCOL.to_string()],
            pihole_hostname: vec!["127.0.0.1".to_string()],
            pihole_port: vec![DEFAULT_PORT],
            pihole_password: Vec::new(),
            bind_addr: "0.0.0.0".to_string(),
            port: 9617,
            timeout: Duration::from_secs(5),
            scrape_timeout: Duration::from_secs(10),
            collect_interval: None,
            skip_tls_verification: false,
            debug: false,
        }
    }
}

impl fmt::Debug for ExporterConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let passwords: Vec<&str> = self
            .pihole_password
            .iter()
            .map(|p| if p.is_empty() { "" } else { REDACTED })
            .collect();
        f.debug_struct("ExporterConfig")
            .field("pihole_protocol", &self.pihole_protocol)
            .field("pihole_hostname", &self.pihole_hostname)
            .field("pihole_port", &self.pihole_port)
            .field("pihole_password", &passwords)
            .field("bind_addr", &self.bind_addr)
            .field("port", &self.port)
            .field("timeout", &self.timeout)
            .field("scrape_timeout", &self.scrape_timeout)
            .field("collect_interval", &self.collect_interval)
            .field("skip_tls_verification", &self.skip_tls_verification)
            .field("debug", &self.debug)
            .finish()
    }
}

impl ExporterConfig {
    /// Builder preloaded with the optional config file and the environment.
    ///
    /// Callers may add overrides before handing it to [`ExporterConfig::from_builder`].
    pub fn sources(file: Option<&Path>) -> ConfigBuilder<DefaultState> {
        let mut env = Environment::default()
            .try_parsing(true)
            .list_separator(",");
        for key in LIST_KEYS {
            env = env.with_list_parse_key(key);
        }

        let mut builder = ::config::Config::builder();
        if let Some(path) = file {
            builder = builder.add_source(File::from(path).required(true));
        }
        builder.add_source(env)
    }

    /// Deserialize a builder into a configuration.
    pub fn from_builder(builder: ConfigBuilder<DefaultState>) -> Result<Self, ExporterError> {
        builder
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| ExporterError::Config(e.to_string()))
    }

    /// Logging settings derived from this configuration.
    pub fn telemetry(&self) -> TelemetryConfig {
        TelemetryConfig::from_debug(self.debug)
    }

    /// Address the HTTP server binds to.
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind_addr, self.port)
    }

    /// Build one host configuration per hostname, validating list lengths and protocols.
    pub fn split(&self) -> Result<Vec<HostConfig>, ExporterError> {
        let hosts_count = self.pihole_hostname.len();
        if hosts_count == 0 {
            return Err(ExporterError::Config(
                "at least one Pi-hole hostname is required".to_string(),
            ));
        }

        let mut result = Vec::with_capacity(hosts_count);
        for (i, hostname) in self.pihole_hostname.iter().enumerate() {
            let hostname = hostname.trim();
            if hostname.is_empty() {
                return Err(ExporterError::Config(format!(
                    "hostname #{} is empty",
                    i + 1
                )));
            }

            let port = pick(&self.pihole_port, i, hosts_count, "ports")?
                .copied()
                .unwrap_or(DEFAULT_PORT);

            let protocol = match pick_str(&self.pihole_protocol, i, hosts_count, "protocols")? {
                Some(p) => p.parse()?,
                None => DEFAULT_PROTOCOL,
            };

            let password = pick_str(&self.pihole_password, i, hosts_count, "passwords")?
                .unwrap_or_default()
                .to_string();

            result.push(HostConfig {
                protocol,
                hostname: hostname.to_string(),
                port,
                password,
                skip_tls_verify: self.skip_tls_verification,
            });
        }

        for hostname in shared_hostnames(&result) {
            warn!(
                %hostname,
                "several hosts share this hostname; their series carry the same labels and overwrite each other"
            );
        }

        Ok(result)
    }

    /// Log the effective configuration without secrets.
    pub fn log_summary(&self) {
        info!("------------------------------------");
        info!("-  Pi-hole exporter configuration  -");
        info!("------------------------------------");
        info!(version = env!("CARGO_PKG_VERSION"), "pihole-exporter");
        info!(protocols = ?self.pihole_protocol, "pihole_protocol");
        info!(hostnames = ?self.pihole_hostname, "pihole_hostname");
        info!(ports = ?self.pihole_port, "pihole_port");
        if self.pihole_password.iter().any(|p| !p.trim().is_empty()) {
            info!("Pi-hole authentication method: password");
        }
        info!(bind_addr = %self.bind_addr, port = self.port, "listen");
        info!(
            timeout = ?self.timeout,
            scrape_timeout = ?self.scrape_timeout,
            collect_interval = ?self.collect_interval,
            "timeouts"
        );
        info!(skip_tls_verification = self.skip_tls_verification, debug = self.debug, "flags");
        info!("------------------------------------");
    }
}

/// Hostnames used by more than one host, in sorted order.
pub fn shared_hostnames(hosts: &[HostConfig]) -> Vec<String> {
    let mut seen: BTreeMap<&str, usize> = BTreeMap::new();
    for host in hosts {
        *seen.entry(host.hostname.as_str()).or_default() += 1;
    }
    seen.into_iter()
        .filter(|(_, count)| *count > 1)
        .map(|(hostname, _)| hostname.to_string())
        .collect()
}

/// Select the value for host `idx` from a per-host list.
fn pick<'a, T>(
    values: &'a [T],
    idx: usize,
    hosts_count: usize,
    what: &str,
) -> Result<Option<&'a T>, ExporterError> {
    match values.len() {
        0 => Ok(None),
        1 => Ok(values.first()),
        n if n == hosts_count => Ok(values.get(idx)),
        n => Err(ExporterError::Config(format!(
            "wrong number of {what} ({n} for {hosts_count} hosts). Leave empty to use the default, give one value for all hosts, or one per host"
        ))),
    }
}

/// Like [`pick`], with blank strings treated as absent.
fn pick_str<'a>(
    values: &'a [String],
    idx: usize,
    hosts_count: usize,
    what: &str,
) -> Result<Option<&'a str>, ExporterError> {
    Ok(pick(values, idx, hosts_count, what)?
        .map(|v| v.trim())
        .filter(|v| !v.is_empty()))
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawDuration {
    Seconds(u64),
    Text(String),
}

impl RawDuration {
    fn into_duration<E: serde::de::Error>(self) -> Result<Duration, E> {
        match self {
            RawDuration::Seconds(secs) => Ok(Duration::from_secs(secs)),
            RawDuration::Text(s) => humantime::parse_duration(s.trim()).map_err(E::custom),
        }
    }
}

fn de_duration<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
    RawDuration::deserialize(d)?.into_duration()
}

fn de_opt_duration<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
    match Option::<RawDuration>::deserialize(d)? {
        None => Ok(None),
        Some(RawDuration::Text(s)) if s.trim().is_empty() => Ok(None),
        Some(raw) => raw.into_duration().map(Some),
    }
}
