use anyhow::{anyhow, Context, Result};
use clap::Parser;
use mavfleet::{BufferedMessage, Registry, SessionConfig};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::signal;
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[command(name = "mavfleetd", version, about = "Multi-vehicle MAVLink session daemon")]
struct Cli {
    /// TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Extra vehicle as `id=url`, e.g. `copter=udp://:14550`. Repeatable.
    #[arg(long = "vehicle", value_parser = parse_vehicle_arg)]
    vehicles: Vec<VehicleCfg>,

    /// Stream decoded traffic for vehicles given with --vehicle.
    #[arg(long)]
    stream: bool,

    /// Broadcast interval in milliseconds; overrides `[broadcast]`.
    #[arg(long)]
    interval_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Config {
    session: SessionConfig,
    broadcast: BroadcastCfg,
    #[serde(rename = "vehicle")]
    vehicles: Vec<VehicleCfg>,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct BroadcastCfg {
    interval_ms: u64,
}

impl Default for BroadcastCfg {
    fn default() -> Self {
        Self { interval_ms: 100 }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
struct VehicleCfg {
    id: String,
    url: String,
    #[serde(default)]
    stream: bool,
}

/// One line on stdout per drained message.
#[derive(Serialize)]
struct OutboundLine<'a> {
    vehicle: &'a str,
    message: &'a BufferedMessage,
}

fn parse_vehicle_arg(raw: &str) -> Result<VehicleCfg, String> {
    let (id, url) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected id=url, got `{raw}`"))?;
    let (id, url) = (id.trim(), url.trim());
    if id.is_empty() || url.is_empty() {
        return Err(format!("expected id=url, got `{raw}`"));
    }
    Ok(VehicleCfg {
        id: id.to_string(),
        url: url.to_string(),
        stream: false,
    })
}

fn load_config(path: &Path) -> Result<Config> {
    let s = std::fs::read_to_string(path)
        .with_context(|| format!("read config {}", path.display()))?;
    parse_config(&s)
}

fn parse_config(s: &str) -> Result<Config> {
    toml::from_str(s).context("parse config toml")
}

async fn connect_all(registry: &Registry, vehicles: &[VehicleCfg]) {
    for vehicle in vehicles {
        match registry.add_vehicle(&vehicle.id, &vehicle.url).await {
            Ok(()) => {
                if vehicle.stream {
                    if let Err(e) = registry.start_streaming(&vehicle.id) {
                        warn!(vehicle = %vehicle.id, error = %e, "could not start streaming");
                    }
                }
            }
            Err(e) => warn!(
                vehicle = %vehicle.id,
                url = %vehicle.url,
                error = %e,
                "vehicle did not connect"
            ),
        }
    }
}

/// Drains every streaming vehicle and writes one JSON line per message.
fn broadcast_once(registry: &Registry, out: &mut impl Write) -> Result<usize> {
    let mut written = 0;
    for vehicle in registry.list_connected_vehicles() {
        if !registry.is_streaming(&vehicle) {
            continue;
        }
        for message in registry.drain_buffered_messages(&vehicle) {
            let line = serde_json::to_string(&OutboundLine {
                vehicle: &vehicle,
                message: &message,
            })?;
            writeln!(out, "{line}")?;
            written += 1;
        }
    }
    out.flush()?;
    Ok(written)
}

async fn ctrl_c() {
    if let Err(err) = signal::ctrl_c().await {
        warn!(error = %err, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut cfg = match &cli.config {
        Some(path) => load_config(path)?,
        None => Config::default(),
    };
    cfg.vehicles.extend(cli.vehicles.into_iter().map(|mut v| {
        v.stream = cli.stream;
        v
    }));
    if let Some(interval_ms) = cli.interval_ms {
        cfg.broadcast.interval_ms = interval_ms;
    }
    if cfg.vehicles.is_empty() {
        return Err(anyhow!("no vehicles configured; pass --config or --vehicle id=url"));
    }

    let registry = Registry::new(cfg.session.clone());
    connect_all(&registry, &cfg.vehicles).await;
    info!(connected = registry.list_connected_vehicles().len(), "mavfleetd running");

    let mut ticker = tokio::time::interval(Duration::from_millis(cfg.broadcast.interval_ms.max(1)));
    let shutdown = ctrl_c();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = ticker.tick() => {
                let stdout = std::io::stdout();
                broadcast_once(&registry, &mut stdout.lock())?;
            }
        }
    }

    info!("shutting down");
    registry.shutdown();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use mavfleet::AckPolicy;

    #[test]
    fn parses_sample_config() {
        let cfg = parse_config(include_str!("../mavfleetd.toml")).unwrap();
        assert_eq!(cfg.broadcast.interval_ms, 100);
        assert_eq!(cfg.session.ack_policy, AckPolicy::LastWriteWins);
        assert_eq!(cfg.vehicles.len(), 2);
        assert!(cfg.vehicles[0].stream);
        assert!(!cfg.vehicles[1].stream);
    }

    #[test]
    fn empty_config_uses_defaults() {
        let cfg = parse_config("").unwrap();
        assert_eq!(cfg.session, SessionConfig::default());
        assert_eq!(cfg.broadcast.interval_ms, 100);
        assert!(cfg.vehicles.is_empty());
    }

    #[test]
    fn correlated_policy_from_toml() {
        let cfg = parse_config("[session]\nack_policy = \"correlated\"\n").unwrap();
        assert_eq!(cfg.session.ack_policy, AckPolicy::Correlated);
        assert_eq!(cfg.session.ack_timeout_ms, 1_500);
    }

    #[test]
    fn vehicle_arg_splits_on_first_equals() {
        let v = parse_vehicle_arg("sim=tcp://127.0.0.1:5760").unwrap();
        assert_eq!(v.id, "sim");
        assert_eq!(v.url, "tcp://127.0.0.1:5760");
        assert!(parse_vehicle_arg("no-url").is_err());
        assert!(parse_vehicle_arg("=udp://:14550").is_err());
    }

    #[test]
    fn broadcast_with_no_vehicles_writes_nothing() {
        let registry = Registry::new(SessionConfig::default());
        let mut out = Vec::new();
        assert_eq!(broadcast_once(&registry, &mut out).unwrap(), 0);
        assert!(out.is_empty());
    }
}
