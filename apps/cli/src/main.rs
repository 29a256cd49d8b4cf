mod config;
mod session;

use anyhow::{bail, Context, Result};
use clap::Parser;
use config::Config;
use natmap_igd::{
    DescriptionResolver, GatewayClient, HttpSoapTransport, MappingQuery, MappingRequest,
    PortEndpoint, Protocol, SsdpLocator,
};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Map a port on the local UPnP gateway and keep it until interrupted
#[derive(Debug, Parser)]
#[command(name = "natmap", version, about)]
struct Cli {
    /// Public (external) port
    #[arg(value_name = "PORT", conflicts_with = "port")]
    public: Option<u16>,

    /// Private port or host:port (defaults to the public port on this host)
    #[arg(value_name = "PRIVATE_PORT", conflicts_with = "private_port")]
    private: Option<PortEndpoint>,

    #[arg(short, long)]
    port: Option<u16>,

    #[arg(long)]
    private_port: Option<PortEndpoint>,

    /// tcp or udp
    #[arg(long)]
    protocol: Option<Protocol>,

    #[arg(short, long)]
    description: Option<String>,

    /// Lease in seconds, 0 for indefinite
    #[arg(long)]
    ttl: Option<u32>,

    /// SSDP discovery timeout in milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Seconds between external IP checks
    #[arg(long)]
    recheck_secs: Option<u64>,

    #[arg(long)]
    config: Option<PathBuf>,

    /// Debug logging for everything, not just natmap
    #[arg(short, long)]
    verbose: bool,

    /// Print existing mappings as JSON lines and exit
    #[arg(long, conflicts_with = "ip")]
    list: bool,

    /// Print the external IP and exit
    #[arg(long)]
    ip: bool,
}

impl Cli {
    fn request(&self, config: &Config) -> Result<MappingRequest> {
        let Some(port) = self.public.or(self.port) else {
            bail!("A port is required (see --help)");
        };

        let mut request = MappingRequest::new(port)
            .protocol(self.protocol.unwrap_or(config.protocol))
            .ttl(self.ttl.unwrap_or(config.ttl));

        if let Some(private) = self.private.clone().or_else(|| self.private_port.clone()) {
            request = request.private(private);
        }
        if let Some(description) = self.description.as_ref().or(config.description.as_ref()) {
            request = request.description(description.as_str());
        }

        Ok(request)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let directives = log_directives(cli.verbose, std::env::var("RUST_LOG").ok());
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(directives))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = Config::load_or_default(cli.config.as_deref())?;
    let client = build_client(&cli, &config)?;

    if cli.ip {
        match client.external_ip().await? {
            Some(ip) => println!("{}", ip),
            None => bail!("Gateway did not report an external IP"),
        }
        return Ok(());
    }

    if cli.list {
        for record in client.mappings(&MappingQuery::all()).await? {
            println!("{}", serde_json::to_string(&record)?);
        }
        return Ok(());
    }

    let request = cli.request(&config)?;
    let recheck = Duration::from_secs(cli.recheck_secs.unwrap_or(config.recheck_secs).max(1));

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {}", e);
        }
        tracing::info!("Shutting down");
    };

    session::run_mapping(&client, &request, recheck, shutdown).await?;

    Ok(())
}

/// `--verbose` beats `RUST_LOG`, which beats the built-in default
fn log_directives(verbose: bool, env: Option<String>) -> String {
    if verbose {
        return "debug".to_string();
    }
    env.filter(|directives| !directives.trim().is_empty())
        .unwrap_or_else(|| "info,natmap=debug".to_string())
}

fn build_client(cli: &Cli, config: &Config) -> Result<GatewayClient> {
    let discovery_timeout = Duration::from_millis(cli.timeout_ms.unwrap_or(config.timeout_ms));
    let http_timeout = Duration::from_secs(config.http_timeout_secs);

    let resolver = DescriptionResolver::with_timeout(http_timeout)
        .context("Failed to build HTTP client")?;
    let transport =
        HttpSoapTransport::with_timeout(http_timeout).context("Failed to build HTTP client")?;

    Ok(GatewayClient::with_timeout(discovery_timeout)
        .with_locator(SsdpLocator::new(discovery_timeout).with_resolver(resolver))
        .with_transport(transport))
}
