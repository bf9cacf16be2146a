use anyhow::Result;
use clap::Parser;
use log::{info, warn};
use std::net::SocketAddr;
use std::path::PathBuf;

use stonegpt::config::DEFAULT_MAX_LENGTH;
use stonegpt::server::{router, AppState, AssetPaths};
use stonegpt::Device;

const DEFAULT_PUBLIC_DIR: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/public");

/// Serve sampled GPT-2 continuations over HTTP.
#[derive(Parser, Debug)]
#[command(name = "stonegpt", version, about)]
struct Cli {
    /// Address to listen on
    #[arg(long, default_value = "0.0.0.0:8000")]
    bind: SocketAddr,

    /// Directory holding best_model.safetensors and tokenizer.json
    #[arg(long, default_value = DEFAULT_PUBLIC_DIR)]
    public_dir: PathBuf,

    /// Compute device
    #[arg(long, default_value = "cpu")]
    device: String,

    /// Upper bound on prompt + generated tokens
    #[arg(long, default_value_t = DEFAULT_MAX_LENGTH)]
    max_length: usize,

    /// Fix the sampling seed for reproducible output
    #[arg(long)]
    seed: Option<u64>,

    /// Verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level)).init();

    let device: Device = cli.device.parse()?;
    let state = AppState {
        max_length: cli.max_length,
        seed: cli.seed,
        device,
        ..AppState::new(AssetPaths::from_public_dir(&cli.public_dir))
    };
    if !state.assets.weights.exists() {
        warn!(
            "Weight file {} does not exist yet; requests will fail until it does",
            state.assets.weights.display()
        );
    }

    let listener = tokio::net::TcpListener::bind(cli.bind).await?;
    info!(
        "Serving {} on {} (assets in {})",
        stonegpt::server::GENERATE_ROUTE,
        listener.local_addr()?,
        cli.public_dir.display()
    );

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
    }
}
