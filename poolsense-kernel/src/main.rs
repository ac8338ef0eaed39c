/**
 * POOLSENSE KERNEL - Point d'entrée du daemon
 *
 * ROLE: wires config → API client → refresh coordinator → publishers
 * (health, in-process subscribers, MQTT) → sensor registry → HTTP view,
 * then drives the coordinator on the configured scan interval until Ctrl-C.
 */

use anyhow::Context;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use poolsense_kernel::config::load_config;
use poolsense_kernel::coordinator::{CacheSnapshot, RefreshCoordinator};
use poolsense_kernel::health::HealthTracker;
use poolsense_kernel::http::{build_router, AppState};
use poolsense_kernel::mqtt;
use poolsense_kernel::publisher::{FanoutPublisher, SnapshotSubscribers};
use poolsense_kernel::scheduler::{IntervalScheduler, Scheduler};
use poolsense_kernel::sensors::SensorRegistry;
use poolsense_kernel::PoolApiClient;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("poolsense_kernel=info")),
        )
        .init();

    let config = load_config().await.map_err(|e| {
        error!(code = e.code(), "invalid configuration: {}", e);
        e
    })?;
    let entry = config.sensor_entry();
    info!(entry_id = %entry.entry_id, coin = %entry.coin, "starting poolsense kernel");

    let client = PoolApiClient::with_reqwest(
        config.pool.base_url.as_str(),
        config.pool.api_key.as_str(),
        config.request_timeout(),
    )
    .context("failed to build HTTP client")?;

    let health = HealthTracker::new();
    let subscribers = SnapshotSubscribers::new();
    spawn_snapshot_logger(subscribers.subscribe());

    let mut fanout = FanoutPublisher::default();
    fanout.push(Arc::new(health.clone()));
    fanout.push(Arc::new(subscribers.clone()));

    let mqtt_publisher = match &config.mqtt {
        Some(mqtt_conf) => {
            let (publisher, event_loop) = mqtt::connect(mqtt_conf, entry.clone(), health.clone());
            let publisher = Arc::new(publisher);
            if let Err(e) = publisher.announce().await {
                warn!("MQTT discovery not published: {}", e);
            }
            fanout.push(publisher.clone());
            Some((publisher, event_loop))
        }
        None => {
            info!("no mqtt section, MQTT surface disabled");
            None
        }
    };

    let coordinator = Arc::new(RefreshCoordinator::new(
        Arc::new(client),
        Arc::new(fanout),
        config.coordinator_settings(),
    ));
    let registry = Arc::new(SensorRegistry::new(coordinator.clone(), entry));

    let job = IntervalScheduler.schedule(config.scan_interval(), coordinator.clone());

    match &config.http {
        Some(http_conf) => {
            let app = build_router(AppState {
                coordinator: coordinator.clone(),
                registry,
                health: health.clone(),
                api_key: http_conf.api_key.clone(),
            });
            let addr: SocketAddr = http_conf
                .bind
                .parse()
                .with_context(|| format!("invalid http.bind address {}", http_conf.bind))?;
            let listener = TcpListener::bind(addr)
                .await
                .with_context(|| format!("failed to bind {addr}"))?;
            info!(%addr, "HTTP view listening");
            axum::serve(listener, app)
                .with_graceful_shutdown(shutdown_signal())
                .await
                .context("HTTP server failed")?;
        }
        None => {
            info!(sensors = registry.sensors().len(), "no http section, HTTP view disabled");
            shutdown_signal().await;
        }
    }

    job.cancel();
    if let Some((publisher, event_loop)) = mqtt_publisher {
        if let Err(e) = publisher.mark_offline().await {
            warn!("failed to publish offline availability: {}", e);
        }
        // give the event loop a moment to flush the queued offline message
        tokio::time::sleep(Duration::from_millis(250)).await;
        event_loop.abort();
    }
    info!("poolsense kernel stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("failed to listen for Ctrl-C: {}", e);
    }
}

fn spawn_snapshot_logger(mut rx: watch::Receiver<Arc<CacheSnapshot>>) {
    tokio::spawn(async move {
        while rx.changed().await.is_ok() {
            let snapshot = rx.borrow_and_update().clone();
            match &snapshot.data {
                Some(data) if snapshot.last_update_success => debug!(
                    today_reward = %data.record.today_reward,
                    all_time_reward = %data.record.all_time_reward,
                    workers = data.details.workers.len(),
                    "new snapshot"
                ),
                _ => debug!(error = ?snapshot.last_error, "snapshot marked failing"),
            }
        }
    });
}
