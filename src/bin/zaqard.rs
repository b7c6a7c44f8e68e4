//! zaqard – the message queueing daemon.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::info;

use zaqar::transport::{http, AppState};
use zaqar::{load_config, logging, Bootstrap, Config};

#[derive(Parser, Debug)]
#[command(name = "zaqard", about = "Multi-tenant message queueing daemon")]
struct Args {
    /// Path to zaqar.toml; defaults are used when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the configured bind address.
    #[arg(short, long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init_logging();
    let args = Args::parse();

    let mut conf = match &args.config {
        Some(path) => {
            info!("loading configuration from {}", path.display());
            load_config(path)?
        }
        None => Config::default(),
    };
    if let Some(bind) = args.bind {
        conf.server.bind_addr = bind;
    }

    let boot = Arc::new(Bootstrap::new(conf).await?);
    http::serve(AppState::new(boot)).await
}
