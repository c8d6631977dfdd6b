use std::sync::Arc;

use clap::Parser as _;
use tracing::{info, Level};

use grp::cli::Cli;
use grp::config::Config;
use grp::log;
use grp::server;

#[tokio::main]
async fn main() -> eyre::Result<()> {
    let cli = Cli::parse();

    if cli.version {
        println!("grp {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    log::init_log(Level::INFO)?;

    let _ = rustls::crypto::ring::default_provider().install_default();

    let config = Config::load(cli.config)?;
    info!(port = config.port, "radsec gateway starting");

    server::listen_and_serve(Arc::new(config), None).await
}
