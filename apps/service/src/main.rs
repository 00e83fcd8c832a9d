use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use cryptoon_service::config::Config;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "cryptoon-service", about = "Cryptoon platform service")]
struct Args {
    /// Listen address, overriding CRYPTOON_BIND_ADDR.
    #[arg(long)]
    bind: Option<SocketAddr>,

    /// Ledger directory, overriding CRYPTOON_DATA_DIR.
    #[arg(long)]
    data_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let mut config = Config::from_env()?;
    if let Some(bind) = args.bind {
        config.bind_addr = bind;
    }
    if let Some(data_dir) = args.data_dir {
        config.catalog_path = data_dir.join("db.json");
        config.data_dir = data_dir;
    }

    cryptoon_service::serve(config).await
}
