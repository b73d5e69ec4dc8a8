//! NETCONF TLS probe - checks that a server can be reached and authenticated
//!
//! Loads trust configuration from a TOML file, connects with the client role
//! and reports the peer verification outcome.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use netconf_tls::{ChannelOnlyProtocol, Config, Result, TlsClient};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "netconf-tls-probe")]
#[command(about = "Probe a NETCONF over TLS server with certificate authentication")]
#[command(version)]
struct Cli {
    /// Configuration file
    #[arg(short, long, default_value = "config/netconf-tls.toml")]
    config: PathBuf,

    /// Server host, overrides connection.host
    #[arg(long)]
    host: Option<String>,

    /// Server port, overrides connection.port
    #[arg(short, long)]
    port: Option<u16>,

    /// YANG schema search directory for the session context
    #[arg(long)]
    schema_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    info!("Loading configuration from: {}", cli.config.display());

    let config = match Config::from_file(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    let host = cli.host.unwrap_or_else(|| config.connection.host.clone());
    let port = cli.port.unwrap_or(config.connection.port);

    let protocol = Arc::new(ChannelOnlyProtocol::new(cli.schema_dir));
    let mut client = TlsClient::from_config(&config, protocol)?;

    match client.connect_tls(Some(&host), port, None).await {
        Ok(session) => {
            info!(
                host = session.host().unwrap_or_default(),
                port = session.port(),
                verdict = ?session.peer_verdict(),
                "Secure channel established"
            );
            session.close().await?;
        }
        Err(e) => {
            error!(category = e.category(), "Probe failed: {}", e);
            client.destroy();
            std::process::exit(2);
        }
    }

    client.destroy();
    Ok(())
}
