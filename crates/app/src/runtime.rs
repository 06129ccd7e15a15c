//! Wiring: REST client, push channel, event bus and engine.

use std::sync::Arc;

use genqueue_client::api::HttpGenerationsApi;
use genqueue_client::connection::StreamEndpoint;
use genqueue_client::stream::EventStreamClient;
use genqueue_core::output::AssetUrls;
use genqueue_core::snapshot::PersistedState;
use genqueue_engine::{Engine, EngineConfig, EngineState, EngineView};
use genqueue_events::{EventBus, PlatformEvent};
use tokio::sync::{broadcast, mpsc, watch};
use tokio_util::sync::CancellationToken;

use crate::config::AppConfig;
use crate::persist;

/// Buffer between the push-channel reader and the engine.
const MESSAGE_BUFFER: usize = 256;

/// Run the daemon until `cancel` fires, then save state.
pub async fn run(config: AppConfig, cancel: CancellationToken) -> anyhow::Result<()> {
    let saved = match persist::load_state(&config.state_path).await {
        Ok(saved) => saved,
        Err(e) => {
            tracing::warn!(error = %e, path = %config.state_path.display(), "Ignoring unreadable state file");
            PersistedState::default()
        }
    };
    if let Some(workflow_id) = saved.active_workflow_id {
        tracing::info!(workflow_id, "Restored state; waiting for the editor to activate the workflow");
    }

    let state = EngineState::from_persisted(AssetUrls::new(config.api_url.clone()), config.page_size, saved);
    let api = Arc::new(HttpGenerationsApi::new(config.api_url.clone()));
    let bus = Arc::new(EventBus::default());

    let (message_tx, message_rx) = mpsc::channel(MESSAGE_BUFFER);
    let stream = EventStreamClient::new(
        StreamEndpoint::new(config.ws_url.clone()),
        config.reconnect.clone(),
        message_tx,
    );

    let engine_config = EngineConfig {
        page_size: config.page_size,
        history_poll_interval: Some(config.history_poll),
        ..Default::default()
    };
    let (handle, engine_task) = Engine::new(state, api, Arc::clone(&bus), engine_config)
        .with_stream(message_rx, stream.watch_state())
        .spawn(cancel.clone());

    stream.connect(&cancel);

    tracing::info!(
        api_url = %config.api_url,
        ws_url = %config.ws_url,
        page_size = config.page_size,
        "genqueue running",
    );

    let notifications = tokio::spawn(log_notifications(bus.subscribe(), cancel.clone()));
    let views = tokio::spawn(log_views(handle.subscribe(), cancel.clone()));

    cancel.cancelled().await;
    tracing::info!("Shutting down");

    let saved = engine_task.await?;
    persist::save_state(&config.state_path, &saved).await?;

    let _ = notifications.await;
    let _ = views.await;
    drop(handle);
    Ok(())
}

/// Log bus notifications; the stand-in for desktop notifications and
/// asset-cache invalidation.
async fn log_notifications(mut events: broadcast::Receiver<PlatformEvent>, cancel: CancellationToken) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            event = events.recv() => match event {
                Ok(event) => tracing::info!(
                    event_type = %event.event_type,
                    job_id = ?event.job_id,
                    execution_id = ?event.execution_id,
                    "Job notification",
                ),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Notification log lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }
}

async fn log_views(mut views: watch::Receiver<EngineView>, cancel: CancellationToken) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            changed = views.changed() => {
                if changed.is_err() {
                    break;
                }
                let view = views.borrow_and_update().clone();
                let in_flight = view.jobs.iter().filter(|j| j.status().is_in_flight()).count();
                tracing::debug!(
                    jobs = view.jobs.len(),
                    in_flight,
                    queue_remaining = view.queue_remaining,
                    selected = ?view.selected_job_id,
                    connection = ?view.connection,
                    "Engine view updated",
                );
            }
        }
    }
}
