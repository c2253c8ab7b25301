use crate::app::{App, EnergySummary};
use crate::device::{DeviceConfig, DeviceRequest};
use crate::error::{MonitorError, Result};
use crate::store::RangeQuery;
use crate::telemetry::Reading;
use axum::{
    extract::{rejection::JsonRejection, Query, Request, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use serde_derive::Serialize;
use serde_json::{json, Value};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::Level;

#[derive(Debug, Serialize)]
pub struct ConfigureResponse {
    pub success: bool,
    pub device: DeviceConfig,
}

#[derive(Debug, Serialize)]
pub struct ToggleResponse {
    pub success: bool,
    pub power_on: bool,
}

pub fn create_router(app: App) -> Router {
    Router::new()
        .route("/health", get(health))
        .route(
            "/api/device",
            get(get_device).post(configure_device).delete(remove_device),
        )
        .route("/api/status", get(status))
        .route("/api/toggle", post(toggle))
        .route("/api/data", get(data))
        .route("/api/energy", get(energy))
        .with_state(app)
        .layer(CorsLayer::permissive())
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &Request| {
                tracing::span!(
                    Level::INFO,
                    "http_request",
                    method = %request.method(),
                    uri = %request.uri(),
                )
            }),
        )
}

pub async fn health() -> (StatusCode, Json<Value>) {
    (StatusCode::OK, Json(json!({ "status": "ok" })))
}

pub async fn get_device(State(app): State<App>) -> Result<Json<DeviceConfig>> {
    app.supervisor
        .config()
        .map(Json)
        .ok_or(MonitorError::NotConfigured)
}

pub async fn configure_device(
    State(app): State<App>,
    payload: std::result::Result<Json<DeviceRequest>, JsonRejection>,
) -> Result<Json<ConfigureResponse>> {
    let Json(request) = payload?;
    let device = app.supervisor.configure(request).await?;
    Ok(Json(ConfigureResponse {
        success: true,
        device,
    }))
}

pub async fn remove_device(State(app): State<App>) -> Result<Json<Value>> {
    app.supervisor.deconfigure().await?;
    Ok(Json(json!({ "success": true })))
}

/// Latest reading with the live connectivity flag.
pub async fn status(State(app): State<App>) -> Json<Reading> {
    let mut reading = app.supervisor.latest();
    reading.connected = app.supervisor.connectivity().is_connected();
    Json(reading)
}

pub async fn toggle(State(app): State<App>) -> Result<Json<ToggleResponse>> {
    let power_on = app.supervisor.toggle().await?;
    Ok(Json(ToggleResponse {
        success: true,
        power_on,
    }))
}

pub async fn data(State(app): State<App>, Query(query): Query<RangeQuery>) -> Json<Vec<Reading>> {
    Json(app.history(&query))
}

pub async fn energy(
    State(app): State<App>,
    Query(query): Query<RangeQuery>,
) -> Json<EnergySummary> {
    Json(app.energy(&query))
}
