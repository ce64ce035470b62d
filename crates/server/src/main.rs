mod bootstrap;
mod chat;
mod health;

use std::future::IntoFuture;
use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use axum::Router;
use leadline_core::config::{AppConfig, LoadOptions};
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tracing::{info, warn};

use crate::chat::AppState;

fn init_logging(config: &AppConfig) {
    use leadline_core::config::LogFormat::*;
    use tracing::Level;

    let log_level = config.logging.level.parse::<Level>().unwrap_or(Level::INFO);

    match config.logging.format {
        Compact => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).compact().init();
        }
        Pretty => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).pretty().init();
        }
        Json => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).json().init();
        }
    }
}

fn app(state: AppState, static_dir: Option<&Path>) -> Router {
    let router = chat::router(state.clone()).merge(health::router(state));
    let router = match static_dir {
        Some(dir) => router.fallback_service(ServeDir::new(dir)),
        None => router,
    };
    router.layer(CorsLayer::permissive())
}

#[tokio::main]
async fn main() -> Result<()> {
    run().await
}

pub async fn run() -> Result<()> {
    // Logging needs the loaded config, so it starts before bootstrap
    let config = AppConfig::load(LoadOptions::default())?;
    init_logging(&config);

    let application = bootstrap::bootstrap_with_config(config)?;
    let server = &application.config.server;
    let address = format!("{}:{}", server.bind_address, server.port);
    let listener = tokio::net::TcpListener::bind(&address).await?;

    info!(
        event_name = "system.server.started",
        correlation_id = "bootstrap",
        bind_address = %address,
        static_dir = ?server.static_dir,
        "leadline-server listening"
    );

    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
    let serve = axum::serve(listener, app(application.state.clone(), server.static_dir.as_deref()))
        .with_graceful_shutdown(async move {
            let _ = stop_rx.await;
        })
        .into_future();
    tokio::pin!(serve);

    tokio::select! {
        result = &mut serve => return result.map_err(Into::into),
        signal = tokio::signal::ctrl_c() => signal?,
    }

    info!(
        event_name = "system.server.stopping",
        correlation_id = "shutdown",
        drain_secs = server.graceful_shutdown_secs,
        "leadline-server draining in-flight requests"
    );
    let _ = stop_tx.send(());

    match tokio::time::timeout(Duration::from_secs(server.graceful_shutdown_secs), serve).await {
        Ok(result) => result?,
        Err(_) => warn!(
            event_name = "system.server.drain_timeout",
            correlation_id = "shutdown",
            "in-flight requests did not finish before the drain deadline"
        ),
    }

    info!(event_name = "system.server.stopped", correlation_id = "shutdown", "leadline-server stopped");
    Ok(())
}
