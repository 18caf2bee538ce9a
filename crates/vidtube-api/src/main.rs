//! VidTube API Server
//!
//! Credential and session server for the VidTube backend.
//!
//! Author: hephaex@gmail.com

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use vidtube_api::{create_router, state::AppState};
use vidtube_core::AppConfig;

#[derive(Parser)]
#[command(name = "vidtube-api")]
#[command(about = "VidTube credential and session server")]
#[command(version)]
struct Args {
    /// TOML configuration file; environment variables override its values
    #[arg(short, long, env = "VIDTUBE_CONFIG")]
    config: Option<PathBuf>,
}

fn load_config(args: &Args) -> anyhow::Result<AppConfig> {
    let config = match &args.config {
        Some(path) => AppConfig::from_file(path)?.with_env_override()?,
        None => AppConfig::from_env()?,
    };
    Ok(config)
}

fn init_tracing(config: &AppConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!(
            "vidtube_api={level},vidtube_core={level},tower_http=info,audit=info",
            level = config.logging.level
        )
        .into()
    });

    if config.logging.json_format {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

/// Periodically drop reset tokens that expired without being used
fn spawn_reset_sweeper(state: Arc<AppState>) {
    let period = Duration::from_secs(state.config.auth.reset_sweep_interval_secs);
    if period.is_zero() {
        tracing::info!("Reset token sweeper disabled");
        return;
    }

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        // First tick completes immediately
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if let Err(e) = state.sessions.purge_expired_reset_tokens().await {
                tracing::warn!(error = %e, "Reset token sweep failed");
            }
        }
    });
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = load_config(&args)?;

    init_tracing(&config);

    if config.auth.uses_dev_secrets() {
        tracing::warn!(
            "Using built-in development token secrets; set ACCESS_TOKEN_SECRET and REFRESH_TOKEN_SECRET"
        );
    }
    if !config.auth.secure_cookies {
        tracing::warn!("Session cookies are issued without the Secure attribute");
    }

    let addr = format!("{}:{}", config.server.host, config.server.port);

    // Create application state
    let state = Arc::new(AppState::from_config(config).await?);

    spawn_reset_sweeper(state.clone());

    // Create router
    let app = create_router(state);

    // Start server
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("VidTube API Server starting on http://{}", addr);
    tracing::info!("OpenAPI spec at http://{}/api-docs/openapi.json", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
