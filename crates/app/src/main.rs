//! `genqueue` -- generation job daemon.
//!
//! Mirrors the backend's generation history, follows the push channel and
//! keeps the job list reconciled until interrupted. Configuration is read
//! from the environment (see [`AppConfig::from_env`]); a `.env` file in the
//! working directory is honoured.

use genqueue_app::config::AppConfig;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "genqueue=info,genqueue_app=info,genqueue_client=info,genqueue_engine=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::from_env().unwrap_or_else(|e| {
        tracing::error!(error = %e, "Invalid configuration");
        std::process::exit(1);
    });

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => tracing::info!("Interrupt received"),
            Err(e) => tracing::error!(error = %e, "Failed to listen for interrupt"),
        }
        shutdown.cancel();
    });

    genqueue_app::run(config, cancel).await
}
