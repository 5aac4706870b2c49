//! Gateway entrypoint.
//!
//! Loads configuration (file + environment overrides), initializes
//! logging and serves until interrupted.
//!
//! Exit codes: 0 normal shutdown, 1 invalid configuration, 2 bind or
//! TLS failure, 3 store unreachable at startup.

use std::path::PathBuf;

use gatehouse::config::{load_config, load_from_env};
use gatehouse::observability::init_logging;
use gatehouse::{GatewayServer, Shutdown};

#[tokio::main]
async fn main() {
    std::process::exit(run().await);
}

async fn run() -> i32 {
    let config_path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("GATEHOUSE_CONFIG").ok())
        .map(PathBuf::from);

    let config = match &config_path {
        Some(path) => load_config(path),
        None => load_from_env(),
    };
    let config = match config {
        Ok(config) => config,
        Err(e) => {
            eprintln!("gatehouse: configuration error: {}", e);
            return 1;
        }
    };

    init_logging(&config.log);
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %config_path
            .as_deref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "<env>".to_string()),
        routes = config.routes.len(),
        "Gatehouse starting"
    );

    let server = match GatewayServer::build(config).await {
        Ok(server) => server,
        Err(e) => {
            tracing::error!(error = %e, "Startup failed");
            return e.exit_code();
        }
    };

    let shutdown = Shutdown::new();
    shutdown.listen_for_signals();

    if let Err(e) = server.run(&shutdown).await {
        tracing::error!(error = %e, "Server failed");
        return e.exit_code();
    }

    tracing::info!("Shutdown complete");
    0
}
