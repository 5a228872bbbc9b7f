//! llm-gateway server binary.

use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;
use tracing::info;

use llm_gateway::config::{Cli, Config};
use llm_gateway::server::gateway_api::{build_router, AppState, Services};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI arguments.
    let cli = Cli::parse();

    // Initialize tracing/logging.
    let filter = if cli.verbose {
        "llm_gateway=debug,tower_http=debug"
    } else {
        "llm_gateway=info,tower_http=info"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| filter.into());

    if cli.json_logs {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }

    info!("llm-gateway v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration.
    let mut config = Config::load(&cli.config)?;
    if let Some(listen) = cli.listen {
        config.server.listen = listen;
    }
    let config = Arc::new(config);

    info!(
        server_url = %config.backend.server_url,
        translate_model = %config.backend.translate_model,
        generate_model = %config.backend.generate_model,
        stream_model = %config.backend.stream_model,
        framing = ?config.server.framing,
        "Configuration loaded"
    );

    // One pooled backend client for the whole process.
    let services = Services::ollama(&config.backend)?;

    // Build application state.
    let state = Arc::new(AppState::new(config.clone(), services)?);

    // Build the HTTP router.
    let app = build_router(state);

    // Start the server.
    let listen_addr = config.server.listen.clone();
    info!(addr = %listen_addr, prefix = %config.server.api_prefix, "Starting server");

    let listener = TcpListener::bind(&listen_addr).await?;
    info!("Listening on {listen_addr}");

    axum::serve(listener, app).await?;

    Ok(())
}
