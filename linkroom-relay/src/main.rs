//! linkroom relay server: persists chat messages and fans them out to
//! connected room members over WebSocket.
//!
//! # Usage
//!
//! ```bash
//! # Run on default address 0.0.0.0:9000 with in-memory storage
//! cargo run --bin linkroom-relay
//!
//! # Keep history across restarts
//! cargo run --bin linkroom-relay -- --bind 127.0.0.1:8080 --data-file messages.log
//!
//! # Or via environment variable
//! LINKROOM_ADDR=127.0.0.1:8080 cargo run --bin linkroom-relay
//! ```

use std::sync::Arc;

use clap::Parser;
use linkroom_relay::config::{RelayCliArgs, RelayConfig};
use linkroom_relay::http;
use linkroom_relay::state::RelayState;

#[tokio::main]
async fn main() {
    let cli = RelayCliArgs::parse();

    // Load config from CLI args + config file + env vars + defaults.
    let config = match RelayConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            std::process::exit(1);
        }
    };

    // Initialize tracing with the resolved log level.
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    tracing::info!(
        addr = %config.bind_addr,
        users = config.users.len(),
        self_chat = ?config.self_chat,
        "starting linkroom relay"
    );

    let state = match RelayState::from_config(&config).await {
        Ok(state) => Arc::new(state),
        Err(e) => {
            tracing::error!(error = %e, "failed to open message store");
            std::process::exit(1);
        }
    };

    match http::start_server_with_state(&config.bind_addr, state).await {
        Ok((bound_addr, handle)) => {
            tracing::info!(addr = %bound_addr, "relay server listening");
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "relay server task failed");
            }
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to start relay server");
            std::process::exit(1);
        }
    }
}
