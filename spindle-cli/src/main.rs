use clap::Parser;
use std::path::PathBuf;

use spindle_client::{Client, ClientConfig, EventLoop};
use tracing::{debug, error};
use tracing_subscriber::EnvFilter;

/// Fetches one path and prints the status and each body chunk as it arrives.
#[derive(Debug, Parser)]
#[command(name = "spindle-get")]
struct Cli {
    /// TOML file with `host` and `port`; flags override its values.
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    host: Option<String>,
    #[arg(long)]
    port: Option<u16>,
    #[arg(long, default_value = "/")]
    path: String,
}

fn main() -> Result<(), String> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = resolve_config(&cli)?;
    debug!(?config, path = %cli.path, "fetching");

    let mut event_loop = EventLoop::new().map_err(|err| err.to_string())?;
    let client = Client::new(&event_loop.handle(), config).map_err(|err| err.to_string())?;
    let path = cli.path;
    event_loop
        .run_with(move |_| {
            client.exception_handler(|err| error!(%err, "request failed"));
            client.get_now(path, |response| {
                println!("Got response {}", response.status_code());
                response.data_handler(|chunk| {
                    println!("Got data {}", String::from_utf8_lossy(&chunk));
                });
            });
        })
        .map_err(|err| err.to_string())
}

fn resolve_config(cli: &Cli) -> Result<ClientConfig, String> {
    let mut config = match &cli.config {
        Some(path) => ClientConfig::load(path).map_err(|err| err.to_string())?,
        None => ClientConfig::default(),
    };
    if let Some(host) = &cli.host {
        config.host = host.clone();
    }
    if let Some(port) = cli.port {
        config.port = port;
    }
    config.validate().map_err(|err| err.to_string())?;
    Ok(config)
}
