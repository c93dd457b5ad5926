//! Sorting-line controller
//!
//! Main entry point.

use sortline_controller::{
    actuator::SYSFS_GPIO_ROOT,
    panel_buttons::{spawn_button_watchers, ButtonLine, PanelCommand},
    state::{AppConfig, AppState},
    web_api,
};
use std::path::PathBuf;
use std::time::Duration;
use tokio::signal;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sortline_controller=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting sorting-line controller v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = AppConfig::default();
    tracing::info!(
        video_source = %config.video_source,
        buckets = config.bucket_count,
        ledger_path = %config.ledger_path.display(),
        relay_gpio = ?config.relay_gpio,
        "Configuration loaded"
    );

    let state = AppState::build(config.clone()).await?;
    tracing::info!(actuator = %state.actuators.describe(), "Services initialized");

    // Panel buttons
    let mut lines = Vec::new();
    if let Some(pin) = config.start_button_gpio {
        lines.push(ButtonLine {
            pin,
            command: PanelCommand::Start,
        });
    }
    if let Some(pin) = config.stop_button_gpio {
        lines.push(ButtonLine {
            pin,
            command: PanelCommand::Stop,
        });
    }
    let button_tasks = if lines.is_empty() {
        Vec::new()
    } else {
        spawn_button_watchers(
            state.panel.clone(),
            PathBuf::from(SYSFS_GPIO_ROOT),
            lines,
            Duration::from_millis(config.button_debounce_ms),
        )
        .await?
    };

    let mut app = web_api::create_router(state.clone());
    if let Some(static_dir) = &config.static_dir {
        let serve_dir = ServeDir::new(static_dir)
            .not_found_service(ServeFile::new(static_dir.join("index.html")));
        app = app.fallback_service(serve_dir);
        tracing::info!(static_dir = %static_dir.display(), "Static file serving enabled");
    }
    let app = app
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .layer(TraceLayer::new_for_http());

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(addr = %addr, "Listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    for task in button_tasks {
        task.abort();
    }
    // Session tasks are dropped with the runtime, so stop the line here
    if let Err(e) = state.actuators.force_stop().await {
        tracing::error!(error = %e, "Failed to stop relay on shutdown");
    }
    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
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
    tracing::info!("Shutdown signal received");
}
