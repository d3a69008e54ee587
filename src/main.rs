//! Delta-sync gateway server
//!
//! Loads configuration, builds the application state and serves until a
//! shutdown signal arrives, at which point every live gateway session
//! gets one last best-effort flush.

use anyhow::Result;
use clap::{Arg, Command};
use lakegate::api;
use lakegate::core::{AppState, Config};
use tokio::signal;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let matches = Command::new("lakegate")
        .version(lakegate::VERSION)
        .about("Multi-tenant delta-sync gateway")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path"),
        )
        .get_matches();

    lakegate::init();

    let config_path = matches.get_one::<String>("config").map(|s| s.as_str());
    let config = Config::load(config_path)?;

    let state = AppState::from_config(config)?;
    state.spawn_background();
    info!("AppState created successfully");

    let server_state = state.clone();
    let server_handle = tokio::spawn(async move {
        api::start_server(server_state)
            .await
            .expect("HTTP server failed")
    });

    tokio::select! {
        _ = signal::ctrl_c() => {
            warn!("Received shutdown signal");
        }
        _ = server_handle => {
            warn!("Server terminated unexpectedly");
        }
    }

    // Drain what we can before exit; buffered usage events are dropped.
    state.registry.flush_all().await;

    info!("Shutdown complete");
    Ok(())
}
