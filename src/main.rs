use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;
use tracing::{info, warn};

use oss_gateway::config::{Cli, Config};
use oss_gateway::pdf::PopplerExtractor;
use oss_gateway::server::routes::{build_router, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI arguments.
    let cli = Cli::parse();

    // Initialize tracing/logging.
    let filter = if cli.verbose {
        "oss_gateway=debug,tower_http=debug"
    } else {
        "oss_gateway=info,tower_http=info"
    };

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| filter.into());
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true);
    if cli.json_logs {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    info!("oss-gateway v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration.
    let config = Arc::new(Config::load(cli.env_file.as_deref())?);

    info!(
        backend = config.backend.base_url,
        default_model = config.default_model,
        auth_header = config.api_key_header,
        request_timeout_secs = config.backend.request_timeout_secs,
        "Configuration loaded"
    );

    if config.api_key.is_none() {
        warn!("APP_API_KEY is not set; every request will fail with 500 until it is");
    }

    let pdf = PopplerExtractor::default();
    if !pdf.is_available().await {
        warn!("pdftotext not found; PDF endpoints will reject uploads");
    }

    // Build application state.
    let state = Arc::new(AppState::new(config.clone(), Arc::new(pdf))?);

    // Build the HTTP router.
    let app = build_router(state);

    // Start the server.
    let listen_addr = cli.listen;
    let listener = TcpListener::bind(&listen_addr).await?;
    info!("Listening on {listen_addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl-C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
