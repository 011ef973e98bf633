use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use promptreel_api::config::ServerConfig;
use promptreel_api::router::build_app_router;
use promptreel_api::state::AppState;
use promptreel_luma::api::LumaApi;

const DEFAULT_LOG_FILTER: &str = "promptreel_api=debug,promptreel_pipeline=debug,tower_http=debug";

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = ServerConfig::from_env();
    tracing::info!(
        host = %config.host,
        port = config.port,
        output_dir = %config.output_dir.display(),
        luma_api_url = %config.luma_api_url,
        poll_interval_ms = config.poll_interval_ms,
        poll_max_attempts = config.poll_max_attempts,
        "Loaded server configuration",
    );
    if config.luma_api_key.is_none() {
        tracing::warn!("LUMA_API_KEY is not set; generation requests will be rejected");
    }

    tokio::fs::create_dir_all(&config.output_dir)
        .await
        .expect("Failed to create output directory");

    let luma = LumaApi::new(config.luma_api_url.clone(), config.luma_api_key.clone());
    let state = AppState::new(config.clone(), Arc::new(luma));
    let app = build_app_router(state.clone(), &config);

    let addr = SocketAddr::new(
        config.host.parse().expect("Invalid HOST address"),
        config.port,
    );
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");
    tracing::info!(%addr, "Listening");

    let cancel = state.shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let signal = wait_for_signal().await;
            tracing::info!(signal, "Shutting down");
            // Open batch streams end once their poller sees this.
            cancel.cancel();
        })
        .await
        .expect("Server error");

    let grace = Duration::from_secs(config.shutdown_timeout_secs);
    match tokio::time::timeout(grace, state.compose.shutdown()).await {
        Ok(()) => tracing::info!("Shutdown complete"),
        Err(_) => tracing::warn!(
            timeout_secs = config.shutdown_timeout_secs,
            "Compose tasks still running at shutdown timeout",
        ),
    }
}

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Resolves on SIGINT, or SIGTERM on Unix, with the signal's name.
async fn wait_for_signal() -> &'static str {
    let interrupt = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        let mut stream =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("Failed to install SIGTERM handler");
        stream.recv().await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = interrupt => "SIGINT",
        () = terminate => "SIGTERM",
    }
}
