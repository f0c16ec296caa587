use std::{error::Error, net::SocketAddr, sync::Arc};

use clap::Parser;
use log::info;
use wsp::{
    backend::MemoryBackend,
    config::{DEFAULT_CATALOG, DEFAULT_PORT, DEFAULT_WORKERS, ServerConfig, Share},
    protocol::SearchServer,
};

#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Listen for new connections at address
    #[arg(short, long, default_value_t = SocketAddr::from(([127, 0, 0, 1], DEFAULT_PORT)))]
    address: SocketAddr,
    /// Catalog clients must name when connecting
    #[arg(short, long, default_value = DEFAULT_CATALOG)]
    catalog: String,
    /// Directory to serve, as NAME=PATH. Repeatable.
    #[arg(short, long = "share", value_name = "NAME=PATH")]
    shares: Vec<Share>,
    /// Share that resolves but has no index. Repeatable.
    #[arg(short, long, value_name = "NAME")]
    unindexed: Vec<String>,
    /// Upper bound on rows returned by one fetch
    #[arg(short, long)]
    max_results: Option<u32>,
    /// Number of connections served at once
    #[arg(short, long, default_value_t = DEFAULT_WORKERS)]
    workers: usize,
}

impl From<Cli> for ServerConfig {
    fn from(cli: Cli) -> Self {
        ServerConfig {
            address: cli.address,
            catalog: cli.catalog,
            shares: cli.shares,
            unindexed: cli.unindexed,
            max_results: cli.max_results,
            workers: cli.workers,
        }
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let config = ServerConfig::from(Cli::parse());
    let backend = MemoryBackend::new(&config.shares)?;
    info!(
        "{} items across {} shares",
        backend.len(),
        config.shares.len()
    );

    let server = SearchServer::new(config, Arc::new(backend))?;
    let shutdown = server.shutdown_handle();
    ctrlc::set_handler(move || shutdown.trigger())?;

    server.listen()?;
    Ok(())
}
