/**
 * API REST POOLSENSE - Vue HTTP lecture seule (+ refresh manuel)
 *
 * ROLE:
 * Exposes the cached snapshot, the sensor states and the kernel health.
 * Every GET reads the coordinator's cache; only POST /refresh triggers a
 * cycle (queued behind any running one).
 *
 * ROUTES:
 * - GET  /health            liveness, always open
 * - GET  /system/health     counters, cycle phase, MQTT status
 * - GET  /sensors           all sensor states
 * - GET  /sensors/{key}     one sensor
 * - GET  /snapshot          full cached data + cycle outcome
 * - POST /refresh           run a cycle now
 *
 * SECURITY:
 * When `http.api_key` is configured, every route except /health requires a
 * matching x-api-key header.
 */

use axum::extract::{Path, Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::warn;

use crate::coordinator::{CacheSnapshot, RefreshCoordinator};
use crate::health::{HealthTracker, KernelHealth};
use crate::normalize::PoolData;
use crate::sensors::{SensorRegistry, SensorState};

#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<RefreshCoordinator>,
    pub registry: Arc<SensorRegistry>,
    pub health: HealthTracker,
    pub api_key: Option<String>,
}

#[derive(Serialize)]
struct SnapshotView {
    last_update_success: bool,
    last_attempt: Option<String>,
    last_success: Option<String>,
    last_error: Option<String>,
    data: Option<Arc<PoolData>>,
}

fn rfc3339(t: Option<OffsetDateTime>) -> Option<String> {
    t.and_then(|t| t.format(&Rfc3339).ok())
}

fn to_view(snapshot: &CacheSnapshot) -> SnapshotView {
    SnapshotView {
        last_update_success: snapshot.last_update_success,
        last_attempt: rfc3339(snapshot.last_attempt),
        last_success: rfc3339(snapshot.last_success),
        last_error: snapshot.last_error.clone(),
        data: snapshot.data.clone(),
    }
}

async fn require_api_key(
    State(app): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let Some(expected) = app.api_key.as_deref().filter(|k| !k.is_empty()) else {
        return Ok(next.run(req).await);
    };
    if req.uri().path() == "/health" {
        return Ok(next.run(req).await);
    }

    let ok = req
        .headers()
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .map(|v| v == expected)
        .unwrap_or(false);

    if !ok {
        warn!(path = %req.uri().path(), "rejected request without valid x-api-key");
        return Err(StatusCode::UNAUTHORIZED);
    }
    Ok(next.run(req).await)
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/system/health", get(get_system_health))
        .route("/sensors", get(get_sensors))
        .route("/sensors/{key}", get(get_sensor))
        .route("/snapshot", get(get_snapshot))
        .route("/refresh", post(post_refresh))
        .layer(middleware::from_fn_with_state(state.clone(), require_api_key))
        .with_state(state)
}

async fn get_system_health(State(app): State<AppState>) -> Json<KernelHealth> {
    Json(app.health.get_health(app.coordinator.phase()))
}

async fn get_sensors(State(app): State<AppState>) -> Json<Vec<SensorState>> {
    Json(app.registry.states())
}

async fn get_sensor(
    State(app): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<SensorState>, StatusCode> {
    app.registry
        .get(&key)
        .map(|sensor| Json(sensor.state()))
        .ok_or(StatusCode::NOT_FOUND)
}

async fn get_snapshot(State(app): State<AppState>) -> Json<SnapshotView> {
    Json(to_view(&app.coordinator.snapshot()))
}

async fn post_refresh(State(app): State<AppState>) -> Response {
    match app.coordinator.refresh().await {
        Ok(_) => Json(to_view(&app.coordinator.snapshot())).into_response(),
        Err(failed) => (
            StatusCode::BAD_GATEWAY,
            Json(json!({
                "error": failed.message,
                "auth_failed": failed.auth_failed,
            })),
        )
            .into_response(),
    }
}
