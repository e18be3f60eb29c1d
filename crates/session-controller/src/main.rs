//! Session Monitor
//!
//! Headless room observer. Joins a room as a media-less peer, polls the room
//! snapshot and logs roster and active speaker changes.
//!
//! # Startup Flow
//!
//! 1. Load configuration from environment
//! 2. Initialize tracing (plain or JSON)
//! 3. Initialize Prometheus metrics exporter when `SC_METRICS_BIND_ADDRESS` is set
//! 4. Join the room (`join-as-new-peer`)
//! 5. Poll until Ctrl-C or a failed fetch
//! 6. Signal `leave`

#![warn(clippy::pedantic)]

use std::sync::Arc;

use common::config::ObservabilityConfig;
use session_controller::actors::{spawn_sync_loop, PollEvent};
use session_controller::config::Config;
use session_controller::monitor::RoomMonitor;
use session_controller::observability::init_metrics_recorder;
use session_controller::signaling::{HttpSignalingGate, Signaling};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::from_env().map_err(|e| {
        eprintln!("Failed to load configuration: {e}");
        e
    })?;

    init_tracing(&config.observability);

    info!(
        signaling_url = %config.signaling_url,
        peer_id = %config.peer_id,
        poll_interval_ms = config.poll_interval.as_millis(),
        "Starting Session Monitor"
    );

    if let Some(bind_address) = &config.observability.metrics_bind_address {
        init_metrics_recorder(bind_address).map_err(|e| {
            error!(error = %e, "Failed to install Prometheus metrics exporter");
            e
        })?;
        info!(bind_address = %bind_address, "Prometheus metrics exporter listening");
    }

    let gate = HttpSignalingGate::new(
        config.signaling_url.clone(),
        config.peer_id.clone(),
        config.http_timeout,
    )?;
    let signaling = Signaling::new(Arc::new(gate));

    signaling.join_as_new_peer().await.map_err(|e| {
        error!(error = %e, "Failed to join room");
        e
    })?;
    info!(peer_id = %config.peer_id, "Joined room");

    let root_token = CancellationToken::new();
    let (poll_task, mut events) = spawn_sync_loop(
        signaling.clone(),
        config.poll_interval,
        0,
        root_token.child_token(),
    );

    let mut monitor = RoomMonitor::new();
    loop {
        tokio::select! {
            result = signal::ctrl_c() => {
                if let Err(e) = result {
                    warn!(error = %e, "Failed to listen for Ctrl-C");
                }
                info!("Shutdown requested");
                break;
            }

            event = events.recv() => match event {
                Some(PollEvent::Snapshot { sync, .. }) => {
                    monitor.observe(sync);
                }
                Some(PollEvent::Failed { error, .. }) => {
                    error!(error = %error, "Room polling failed, exiting");
                    break;
                }
                None => break,
            }
        }
    }

    root_token.cancel();
    if let Err(e) = poll_task.await {
        warn!(error = %e, "Poll task ended abnormally");
    }

    if let Err(e) = signaling.leave().await {
        warn!(error = %e, "leave signaling failed");
    }

    info!(
        observations = monitor.observations(),
        "Session Monitor stopped"
    );
    Ok(())
}

/// `RUST_LOG` wins over `SC_LOG_LEVEL`.
fn init_tracing(config: &ObservabilityConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.as_str()));

    let (json, plain) = if config.json_logs {
        (Some(tracing_subscriber::fmt::layer().json()), None)
    } else {
        (None, Some(tracing_subscriber::fmt::layer()))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(json)
        .with(plain)
        .init();
}
