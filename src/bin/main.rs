//! pihole-exporter binary entry point.

use clap::Parser;
use pihole_exporter::config::HostConfig;
use pihole_exporter::{
    server, telemetry, Collector, ExporterConfig, ExporterServer, MetricsRegistry,
    ScrapeCoordinator, SessionClient,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

/// Prometheus exporter for Pi-hole.
///
/// Every option can also be given as an environment variable (`PIHOLE_HOSTNAME=a,b`).
#[derive(Parser, Debug)]
#[command(name = "pihole-exporter")]
#[command(version, about, long_about = None)]
struct Args {
    /// Optional configuration file (TOML).
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Protocol per host (http or https).
    #[arg(long, value_delimiter = ',')]
    pihole_protocol: Vec<String>,

    /// Hostnames of the Pi-hole appliances.
    #[arg(long, value_delimiter = ',')]
    pihole_hostname: Vec<String>,

    /// Web API port per host.
    #[arg(long, value_delimiter = ',')]
    pihole_port: Vec<u16>,

    /// Password per host.
    #[arg(long, value_delimiter = ',')]
    pihole_password: Vec<String>,

    /// Address to listen on.
    #[arg(long)]
    bind_addr: Option<String>,

    /// Port to listen on.
    #[arg(long)]
    port: Option<u16>,

    /// Per-request timeout of the upstream HTTP clients (e.g. "5s").
    #[arg(long, value_parser = humantime::parse_duration)]
    timeout: Option<Duration>,

    /// Deadline for each host within a scrape cycle (e.g. "10s").
    #[arg(long, value_parser = humantime::parse_duration)]
    scrape_timeout: Option<Duration>,

    /// Collect on this interval instead of on every scrape (e.g. "15s").
    #[arg(long, value_parser = humantime::parse_duration)]
    collect_interval: Option<Duration>,

    /// Skip TLS certificate verification.
    #[arg(long)]
    skip_tls_verification: bool,

    /// Enable debug logging.
    #[arg(long)]
    debug: bool,
}

fn duration_value(d: Duration) -> String {
    humantime::format_duration(d).to_string()
}

fn load_config(args: &Args) -> Result<ExporterConfig, Box<dyn std::error::Error>> {
    let mut builder = ExporterConfig::sources(args.config.as_deref());

    if !args.pihole_protocol.is_empty() {
        builder = builder.set_override("pihole_protocol", args.pihole_protocol.clone())?;
    }
    if !args.pihole_hostname.is_empty() {
        builder = builder.set_override("pihole_hostname", args.pihole_hostname.clone())?;
    }
    if !args.pihole_port.is_empty() {
        let ports: Vec<i64> = args.pihole_port.iter().map(|p| i64::from(*p)).collect();
        builder = builder.set_override("pihole_port", ports)?;
    }
    if !args.pihole_password.is_empty() {
        builder = builder.set_override("pihole_password", args.pihole_password.clone())?;
    }
    builder = builder
        .set_override_option("bind_addr", args.bind_addr.clone())?
        .set_override_option("port", args.port.map(i64::from))?
        .set_override_option("timeout", args.timeout.map(duration_value))?
        .set_override_option("scrape_timeout", args.scrape_timeout.map(duration_value))?
        .set_override_option("collect_interval", args.collect_interval.map(duration_value))?;
    if args.skip_tls_verification {
        builder = builder.set_override("skip_tls_verification", true)?;
    }
    if args.debug {
        builder = builder.set_override("debug", true)?;
    }

    Ok(ExporterConfig::from_builder(builder)?)
}

fn build_collectors(
    hosts: Vec<HostConfig>,
    timeout: Duration,
) -> Result<Vec<Arc<dyn Collector>>, pihole_exporter::ExporterError> {
    hosts
        .into_iter()
        .map(|host| {
            info!(host = %host, "creating client");
            SessionClient::new(host, timeout).map(|c| Arc::new(c) as Arc<dyn Collector>)
        })
        .collect()
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = load_config(&args)?;

    telemetry::init(&config.telemetry()).map_err(|e| e as Box<dyn std::error::Error>)?;
    config.log_summary();

    let hosts = config.split()?;
    let collectors = build_collectors(hosts, config.timeout)?;

    info!(hosts = collectors.len(), "starting pihole-exporter");

    let registry = Arc::new(MetricsRegistry::new());
    let coordinator = Arc::new(ScrapeCoordinator::new(
        collectors,
        registry,
        config.scrape_timeout,
    ));

    let exporter = ExporterServer::new(coordinator, config.collect_interval);
    let result = exporter
        .bind_and_run(&config.listen_addr(), server::shutdown_signal())
        .await;

    if let Err(e) = result {
        error!("HTTP server error: {}", e);
        return Err(e.into());
    }

    info!("pihole-exporter shutdown complete");
    Ok(())
}
