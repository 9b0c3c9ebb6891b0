//! blockwatch — missed-blocks monitor for proof-of-stake validators.
//!
//! Usage:
//! ```bash
//! blockwatch --config ./config.toml
//! ```
//!
//! One process watches one chain: it subscribes to new blocks on every
//! configured RPC endpoint, keeps a sliding window of signatures per
//! validator, and notifies Telegram/Discord subscribers when a validator's
//! signing behavior or consensus status changes.

mod app;

use std::env;
use std::process;
use std::sync::Arc;

use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use blockwatch_core::config::Config;
use blockwatch_core::manager::StateManager;
use blockwatch_metrics::Metrics;
use blockwatch_reporters::{DiscordReporter, Reporter, TelegramReporter};
use blockwatch_rpc::{RpcClient, WsClientConfig, WsManager};
use blockwatch_storage::Database;

use app::App;

/// Bound of the unified new-block channel drained by the app loop.
const BLOCK_CHANNEL_CAPACITY: usize = 512;

#[tokio::main]
async fn main() {
    let args: Vec<String> = env::args().collect();

    let config_path = match args.get(1).map(String::as_str) {
        Some("--config") => match args.get(2) {
            Some(path) => path.clone(),
            None => {
                eprintln!("--config requires a path");
                print_usage();
                process::exit(1);
            }
        },
        Some("version") | Some("--version") | Some("-V") => {
            println!("blockwatch {}", env!("CARGO_PKG_VERSION"));
            return;
        }
        Some("help") | Some("--help") | Some("-h") | None => {
            print_usage();
            return;
        }
        Some(other) => {
            eprintln!("Unknown argument: {other}");
            print_usage();
            process::exit(1);
        }
    };

    if let Err(e) = run(&config_path).await {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn print_usage() {
    println!("blockwatch {}", env!("CARGO_PKG_VERSION"));
    println!("Missed-blocks monitor for proof-of-stake validators\n");
    println!("USAGE:");
    println!("    blockwatch --config <path>\n");
    println!("FLAGS:");
    println!("    --config <path>  Path to the TOML config file  [required]");
    println!("    --version        Print version");
    println!("    --help           Print this help");
}

async fn run(config_path: &str) -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load(config_path)?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.log.level.clone())),
        )
        .init();

    info!(chain = %config.chain.name, "starting blockwatch");

    let metrics = Arc::new(Metrics::new()?);

    let database = Arc::new(Database::open(&config.database.path).await?);
    let manager = Arc::new(StateManager::new(
        database,
        config.chain.blocks_window,
        config.chain.store_blocks,
    ));
    manager.init().await?;
    info!(
        blocks = manager.blocks_count(),
        "restored state from database"
    );

    let rpc = Arc::new(RpcClient::new(
        config.chain.name.clone(),
        config.chain.rpc_endpoints.clone(),
        Arc::clone(&metrics),
    )?);

    let telegram = Arc::new(TelegramReporter::new(
        config.telegram.clone(),
        config.chain.name.clone(),
        Arc::clone(&manager),
        config.explorer.clone(),
        Arc::clone(&metrics),
    )?);
    let discord = Arc::new(DiscordReporter::new(
        config.discord.clone(),
        Arc::clone(&manager),
        config.explorer.clone(),
    )?);
    let reporters: Vec<Arc<dyn Reporter>> = vec![Arc::clone(&telegram) as Arc<dyn Reporter>, discord];

    for reporter in &reporters {
        if let Err(e) = reporter.init().await {
            warn!(reporter = reporter.name(), error = %e, "reporter init failed");
        }
    }

    // Construction order matters: state first, reporters with a reference
    // to it, app loop last, holding both.
    let (stop_tx, stop_rx) = watch::channel(false);

    let (ws_manager, block_rx) = WsManager::new(BLOCK_CHANNEL_CAPACITY);
    ws_manager.listen(
        &config.chain.rpc_endpoints,
        WsClientConfig::default(),
        stop_rx.clone(),
    );

    let _command_loop = telegram.spawn_command_loop(stop_rx.clone());

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("received interrupt, shutting down");
            let _ = stop_tx.send(true);
        }
    });

    let app = App::new(config, manager, rpc, reporters, metrics);
    app.run(block_rx, stop_rx).await;

    Ok(())
}
