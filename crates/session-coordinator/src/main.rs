//! Session Coordinator
//!
//! Stateful WebSocket signaling server for multi-party real-time media
//! rooms.
//!
//! # Servers
//!
//! The Session Coordinator runs two servers:
//! - WebSocket server for client signaling (default: 0.0.0.0:3000)
//! - HTTP server for health endpoints and metrics (default: 0.0.0.0:8081)
//!
//! # Startup Flow
//!
//! 1. Load configuration from environment
//! 2. Initialize Prometheus metrics recorder
//! 3. Launch the engine worker pool
//! 4. Initialize the actor system (`CoordinatorActorHandle`)
//! 5. Start the Redis sync layer (when `REDIS_URL` is set)
//! 6. Start health HTTP server (liveness, readiness, metrics)
//! 7. Start the signaling server
//! 8. Wait for a shutdown signal or a worker failure
//!
//! Worker failure is fatal by design: the process exits nonzero and the
//! supervisor restarts it with a fresh pool.

#![warn(clippy::pedantic)]
#![allow(clippy::too_many_lines)] // main.rs orchestrates startup, naturally longer

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context};
use axum::Router;
use metrics_exporter_prometheus::PrometheusBuilder;
use session_coordinator::actors::CoordinatorActorHandle;
use session_coordinator::config::Config;
use session_coordinator::observability::{health_router, HealthState};
use session_coordinator::recording::RecordingController;
use session_coordinator::scalesync::{RoomEvent, ScaleSync, ROOM_EVENT_BUFFER};
use session_coordinator::server::signaling_router;
use session_coordinator::workers::WorkerPool;
use tokio::signal;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Time allowed for room actors to drain at shutdown.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "session_coordinator=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Session Coordinator");

    // Load configuration
    let config = Config::from_env().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!(
        instance_id = %config.instance_id,
        signaling_bind_address = %config.signaling_bind_address,
        health_bind_address = %config.health_bind_address,
        num_workers = config.num_workers,
        rtc_min_port = config.rtc_min_port,
        rtc_max_port = config.rtc_max_port,
        scalesync = config.redis_url.is_some(),
        "Configuration loaded successfully"
    );

    // Initialize Prometheus metrics recorder before any metrics are
    // recorded
    let prometheus_handle = PrometheusBuilder::new().install_recorder().map_err(|e| {
        error!(error = %e, "Failed to install Prometheus metrics recorder");
        anyhow!("Failed to install Prometheus metrics recorder: {e}")
    })?;

    // Initialize health state
    let health_state = Arc::new(HealthState::new());

    // Launch the engine worker pool (fatal if it cannot start)
    info!("Launching engine workers...");
    let worker_pool = Arc::new(
        WorkerPool::launch(config.num_workers, &config.engine_settings()).map_err(|e| {
            error!(error = %e, "Failed to launch worker pool");
            e
        })?,
    );
    info!(workers = worker_pool.len(), "Engine workers launched");

    // Initialize actor system
    info!("Initializing actor system...");
    let recording = RecordingController::new(
        config.ffmpeg_path.clone(),
        config.recording_dir.clone(),
    );

    let (events_tx, events_rx) = mpsc::channel::<RoomEvent>(ROOM_EVENT_BUFFER);
    let coordinator = Arc::new(CoordinatorActorHandle::new(
        config.instance_id.clone(),
        Arc::clone(&worker_pool),
        recording,
        config.redis_url.as_ref().map(|_| events_tx),
    ));
    info!("Actor system initialized");

    // Shutdown token as child of the coordinator's token, so actor
    // shutdown also tears down the servers
    let shutdown_token = coordinator.child_token();

    // Start the Redis sync layer when configured
    if let Some(redis_url) = &config.redis_url {
        info!("Connecting to Redis for cross-instance sync...");
        match ScaleSync::spawn(
            redis_url,
            config.room_events_channel.clone(),
            config.instance_id.clone(),
            events_rx,
            shutdown_token.child_token(),
        )
        .await
        {
            Ok(_sync) => info!("Cross-instance sync started"),
            Err(e) => {
                // The sync layer is advisory; run standalone rather than
                // refusing to start
                warn!(error = %e, "Cross-instance sync unavailable, running standalone");
            }
        }
    }

    // Start health HTTP server (liveness, readiness, metrics)
    let health_addr: SocketAddr = config.health_bind_address.parse().map_err(|e| {
        error!(error = %e, addr = %config.health_bind_address, "Invalid health bind address");
        anyhow!("Invalid health bind address: {e}")
    })?;

    let metrics_router = Router::new().route(
        "/metrics",
        axum::routing::get(move || {
            let handle = prometheus_handle.clone();
            async move { handle.render() }
        }),
    );
    let health_app = health_router(Arc::clone(&health_state)).merge(metrics_router);

    // Bind before spawning to fail fast on bind errors
    let health_listener = tokio::net::TcpListener::bind(health_addr)
        .await
        .with_context(|| format!("Failed to bind health server to {health_addr}"))?;

    let health_shutdown_token = shutdown_token.child_token();
    tokio::spawn(async move {
        info!(addr = %health_addr, "Health server starting");
        let server = axum::serve(health_listener, health_app).with_graceful_shutdown(async move {
            health_shutdown_token.cancelled().await;
            info!("Health server shutting down");
        });
        if let Err(e) = server.await {
            error!(error = %e, "Health server failed");
        }
    });
    info!(addr = %health_addr, "Health server started");

    // Start the signaling server
    let signaling_addr: SocketAddr = config.signaling_bind_address.parse().map_err(|e| {
        error!(error = %e, addr = %config.signaling_bind_address, "Invalid signaling bind address");
        anyhow!("Invalid signaling bind address: {e}")
    })?;

    let signaling_app = signaling_router(Arc::clone(&coordinator));
    let signaling_listener = tokio::net::TcpListener::bind(signaling_addr)
        .await
        .with_context(|| format!("Failed to bind signaling server to {signaling_addr}"))?;

    let signaling_shutdown_token = shutdown_token.child_token();
    tokio::spawn(async move {
        info!(addr = %signaling_addr, "Signaling server starting");
        let server = axum::serve(signaling_listener, signaling_app).with_graceful_shutdown(
            async move {
                signaling_shutdown_token.cancelled().await;
                info!("Signaling server shutting down");
            },
        );
        if let Err(e) = server.await {
            error!(error = %e, "Signaling server failed");
        }
    });
    info!(addr = %signaling_addr, "Signaling server started");

    health_state.set_ready();
    info!("Session Coordinator running - press Ctrl+C to shutdown");

    // Run until a shutdown signal arrives or a worker dies. Worker death
    // is unrecoverable: exit nonzero and let the supervisor restart us.
    tokio::select! {
        () = shutdown_signal() => {
            info!("Shutdown signal received, initiating graceful shutdown...");
        }
        worker_id = worker_pool.watch_failure() => {
            error!(
                worker_id = %worker_id,
                "Engine worker died, exiting for supervisor restart"
            );
            health_state.set_not_ready();
            std::process::exit(1);
        }
    }

    // Mark as not ready immediately so traffic stops arriving
    health_state.set_not_ready();

    // Drain rooms, then cancel the servers via the token hierarchy
    if let Err(e) = coordinator.shutdown(SHUTDOWN_TIMEOUT).await {
        warn!(error = %e, "Actor system shutdown error");
    }

    info!("Session Coordinator shutdown complete");
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
///
/// # Panics
///
/// Panics if signal handlers cannot be installed. This is acceptable because
/// without signal handlers, we cannot gracefully shut down the service.
async fn shutdown_signal() {
    let ctrl_c = async {
        #[expect(
            clippy::expect_used,
            reason = "Signal handler installation is critical - panic is appropriate if it fails"
        )]
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        #[expect(
            clippy::expect_used,
            reason = "Signal handler installation is critical - panic is appropriate if it fails"
        )]
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
