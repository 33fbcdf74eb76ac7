mod config;
mod http;

use clap::Parser;
use config::Config;
use milestones_core::Milestones;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let config = Config::parse();
    config.validate()?;

    info!("Starting milestones server v{}", env!("CARGO_PKG_VERSION"));
    info!("HTTP: {}", config.http_addr);
    info!("Data: {:?}", config.data_dir);

    info!("Opening database...");
    let milestones = Arc::new(Milestones::open(config.db_path())?);
    let stats = milestones.stats()?;
    info!(
        "Database loaded: {} milestones ({} active), {} course links, {} content links, {} user links",
        stats.milestone_count,
        stats.active_milestone_count,
        stats.course_link_count,
        stats.content_link_count,
        stats.user_link_count
    );

    let app_state = http::AppState {
        milestones,
        start_time: std::time::Instant::now(),
    };
    let app = http::create_router(app_state).layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(config.http_addr).await?;
    info!("Milestones server ready on {}", config.http_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received, terminating...");
        })
        .await?;

    Ok(())
}
