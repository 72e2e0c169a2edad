//! AgriPal telemetry bridge server library logic.
//!
//! Wires the telemetry store, the live fanout hub and the broker status into
//! one axum router serving the REST query API, the WebSocket live channel
//! and its SSE mirror.

pub mod api;
pub mod api_sse;
pub mod api_ws;
pub mod config;
pub mod hub;
pub mod ingest;
pub mod shutdown;

use agripal_broker::LinkStatus;
use agripal_store::TelemetryStore;
use axum::{routing::get, Extension, Router};
use hub::DistributionHub;
use std::sync::Arc;
use tokio_util::task::TaskTracker;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Application state shared across all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// Latest readings and bounded history per sensor.
    pub store: TelemetryStore,
    /// Live fanout; publishes into `store`.
    pub hub: DistributionHub,
    /// Broker connection state, reported by `/health`.
    pub broker: LinkStatus,
    /// Live sessions, awaited on shutdown.
    pub sessions: TaskTracker,
}

impl AppState {
    pub fn new(hub: DistributionHub, broker: LinkStatus) -> Self {
        Self {
            store: hub.store().clone(),
            hub,
            broker,
            sessions: TaskTracker::new(),
        }
    }
}

/// Builds the application router with all routes.
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(api::health_handler))
        .route("/api/sensors", get(api::list_sensors_handler))
        .route(
            "/api/sensors/{farmId}/{deviceId}",
            get(api::get_sensor_handler),
        )
        .route(
            "/api/sensors/{farmId}/{deviceId}/latest",
            get(api::get_sensor_latest_handler),
        )
        .route(
            "/api/sensors/{farmId}/{deviceId}/history",
            get(api::get_sensor_history_handler),
        )
        .route("/events/sensors", get(api_sse::sensor_stream_handler))
        .route("/ws", get(api_ws::ws_handler))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(Extension(Arc::new(state)))
}
