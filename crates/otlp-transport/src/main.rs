//! `otlp-send`: POST one encoded OTLP payload to a collector.
//!
//! The transport configuration is loaded the same way the library loads it
//! (defaults, optional TOML file, `OTEL_EXPORTER_OTLP_*`, then
//! `OTLP_TRANSPORT_*`), and command-line flags override the result.
//!
//! ```text
//! otlp-send --endpoint http://localhost:4318/v1/metrics request.pb
//! cat request.json | otlp-send --content-type application/json -H "Authorization=Bearer t"
//! ```

use anyhow::{Context, Result, bail};
use clap::Parser;
use otlp_transport::{Transport, TransportConfig};
use std::io::{Read, Write};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "otlp-send", version, about = "Send one OTLP payload to a collector")]
struct Args {
    /// Payload file; reads stdin when omitted or `-`.
    payload: Option<PathBuf>,

    /// TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Collector URL, e.g. `http://localhost:4318/v1/metrics`.
    #[arg(short, long)]
    endpoint: Option<String>,

    /// Payload content type.
    #[arg(long)]
    content_type: Option<String>,

    /// Extra request header as `key=value`. Repeatable.
    #[arg(short = 'H', long = "header", value_parser = parse_header)]
    headers: Vec<(String, String)>,

    /// Overall request timeout in milliseconds.
    #[arg(long)]
    timeout_ms: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing().context("failed to initialise tracing subscriber")?;

    let args = Args::parse();
    let config = build_config(&args)?;
    tracing::debug!(?config, "Configuration loaded");

    let payload = read_payload(args.payload.as_deref())?;
    let transport = Transport::new(config);

    let result = transport.send(payload, None).await;
    transport.shutdown(None);

    let body = result.context("send failed")?;
    std::io::stdout()
        .write_all(&body)
        .context("failed to write response body")?;

    Ok(())
}

fn build_config(args: &Args) -> Result<TransportConfig> {
    let mut config = match &args.config {
        Some(path) => {
            if !path.exists() {
                bail!("config file {} does not exist", path.display());
            }
            TransportConfig::load_from_path(path)
        }
        None => TransportConfig::load(),
    }
    .context("failed to load configuration")?;

    if let Some(endpoint) = &args.endpoint {
        config.endpoint.clone_from(endpoint);
    }
    if let Some(content_type) = &args.content_type {
        config.content_type.clone_from(content_type);
    }
    if let Some(ms) = args.timeout_ms {
        config.timeout = Duration::from_millis(ms);
    }
    config.headers.extend(args.headers.iter().cloned());

    Ok(config)
}

fn read_payload(path: Option<&std::path::Path>) -> Result<Vec<u8>> {
    match path {
        Some(path) if path.as_os_str() != "-" => std::fs::read(path)
            .with_context(|| format!("failed to read payload from {}", path.display())),
        _ => {
            let mut payload = Vec::new();
            std::io::stdin()
                .read_to_end(&mut payload)
                .context("failed to read payload from stdin")?;
            Ok(payload)
        }
    }
}

fn parse_header(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .filter(|(k, _)| !k.is_empty())
        .ok_or_else(|| format!("expected key=value, got `{raw}`"))
}

fn init_tracing() -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,otlp_transport=debug"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).without_time().with_writer(std::io::stderr))
        .with(filter)
        .try_init()
        .context("failed to initialise tracing registry")?;

    Ok(())
}
