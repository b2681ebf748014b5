// src/main.rs
// QRWC bridge entry point: loads config, wires the Bridge, serves MCP
// tool calls over stdio.

use qrwc_bridge::{Bridge, BridgeServer};
use rmcp::{transport::stdio, ServiceExt};
use std::process::ExitCode;
use tracing::{error, info};

const EXIT_CLEAN: u8 = 0;
const EXIT_STARTUP_FAILURE: u8 = 1;
const EXIT_RUNTIME_FAILURE: u8 = 2;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // rustls 0.23 requires an explicit process-level crypto provider before
    // any TLS config is built; install it once, here, before Bridge::new
    // touches the connection manager's TLS setup.
    if rustls::crypto::ring::default_provider().install_default().is_err() {
        error!("failed to install rustls crypto provider");
        return ExitCode::from(EXIT_STARTUP_FAILURE);
    }

    let config = match qrwc_config::load_config(None) {
        Ok(config) => config,
        Err(e) => {
            error!("failed to load configuration: {e}");
            return ExitCode::from(EXIT_STARTUP_FAILURE);
        }
    };

    info!(host = %config.core.host, port = config.core.port, "starting qrwc-bridge");

    let bridge = Bridge::new(config);
    bridge.start();

    std::panic::set_hook(Box::new(|info| {
        error!("panic: {info}");
    }));

    let server = BridgeServer::new(bridge);
    let service = match server.serve(stdio()).await {
        Ok(service) => service,
        Err(e) => {
            error!("failed to start MCP stdio transport: {e}");
            return ExitCode::from(EXIT_STARTUP_FAILURE);
        }
    };

    match service.waiting().await {
        Ok(_) => {
            info!("qrwc-bridge shut down cleanly");
            ExitCode::from(EXIT_CLEAN)
        }
        Err(e) => {
            error!("qrwc-bridge stopped on an unrecoverable error: {e}");
            ExitCode::from(EXIT_RUNTIME_FAILURE)
        }
    }
}
