mod bootstrap;
mod health;
mod routes;

use std::time::Duration;

use anyhow::Result;
use ordersync_core::config::{AppConfig, LoadOptions};
use tokio_util::sync::CancellationToken;

fn init_logging(config: &AppConfig) {
    use ordersync_core::config::LogFormat::*;
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

#[tokio::main]
async fn main() -> Result<()> {
    run().await
}

pub async fn run() -> Result<()> {
    // Logging must be up before bootstrap emits its first event.
    let config = AppConfig::load(LoadOptions::default())?;
    init_logging(&config);

    let mut app = bootstrap::bootstrap_with_config(config).await?;

    let api_state = routes::ApiState::new(
        app.services.clone(),
        app.config.crm.webhook_secret.clone(),
        app.shutdown.clone(),
    );
    let router = health::router(app.db_pool.clone(), app.scheduler.task_names())
        .merge(routes::router(api_state));

    let address = format!("{}:{}", app.config.server.bind_address, app.config.server.port);
    let listener = tokio::net::TcpListener::bind(&address).await?;
    tracing::info!(event_name = "system.server.listening", bind_address = %address, "http listener bound");

    let shutdown = app.shutdown.clone();
    let server = tokio::spawn(async move {
        let serve = axum::serve(listener, router)
            .with_graceful_shutdown(async move { shutdown.cancelled().await });
        if let Err(error) = serve.await {
            tracing::error!(
                event_name = "system.server.error",
                error = %error,
                "http server terminated unexpectedly"
            );
        }
    });

    app.scheduler.start();
    tracing::info!(
        event_name = "system.server.started",
        tasks = ?app.scheduler.task_names(),
        "ordersync-server started"
    );

    wait_for_shutdown(&app.shutdown).await?;
    tracing::info!(event_name = "system.server.stopping", "ordersync-server stopping");

    app.shutdown.cancel();
    app.scheduler.stop().await;

    let grace = Duration::from_secs(app.config.server.graceful_shutdown_secs);
    if tokio::time::timeout(grace, server).await.is_err() {
        tracing::warn!(
            event_name = "system.server.shutdown_timeout",
            grace_secs = grace.as_secs(),
            "http server did not drain within the grace period"
        );
    }
    app.db_pool.close().await;

    tracing::info!(event_name = "system.server.stopped", "ordersync-server stopped");
    Ok(())
}

async fn wait_for_shutdown(shutdown: &CancellationToken) -> Result<()> {
    tokio::select! {
        result = tokio::signal::ctrl_c() => result?,
        _ = shutdown.cancelled() => {}
    }
    Ok(())
}
