//! REST handlers for the telemetry query API.

use crate::AppState;
use agripal_types::{SensorKey, SensorReading};
use axum::{
    extract::{Extension, Json, Path, Query},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

/// Entries returned by the history route when `limit` is absent or unusable.
pub const DEFAULT_HISTORY_LIMIT: usize = 100;

const SENSOR_NOT_FOUND: &str = "Sensor not found";

/// Response body for `GET /health`.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    /// `"connected"` or `"disconnected"`.
    pub mqtt: String,
    /// Distinct sensors tracked.
    pub sensors: usize,
    /// Live clients currently subscribed.
    pub subscribers: usize,
    pub timestamp: DateTime<Utc>,
}

/// Response body for `GET /api/sensors`.
#[derive(Debug, Serialize, Deserialize)]
pub struct SensorListResponse {
    pub success: bool,
    pub count: usize,
    pub data: Vec<SensorReading>,
    pub timestamp: DateTime<Utc>,
}

/// Response body for `GET /api/sensors/{farmId}/{deviceId}`.
#[derive(Debug, Serialize, Deserialize)]
pub struct SensorResponse {
    pub success: bool,
    pub latest: SensorReading,
    pub history: Vec<SensorReading>,
    #[serde(rename = "historyCount")]
    pub history_count: usize,
}

/// Response body for `GET /api/sensors/{farmId}/{deviceId}/latest`.
#[derive(Debug, Serialize, Deserialize)]
pub struct LatestResponse {
    pub success: bool,
    pub data: SensorReading,
}

/// Response body for `GET /api/sensors/{farmId}/{deviceId}/history`.
#[derive(Debug, Serialize, Deserialize)]
pub struct HistoryResponse {
    pub success: bool,
    /// Entries retained for the sensor, regardless of `limit`.
    pub count: usize,
    /// Same as `count`.
    pub total: usize,
    /// Entries in `data`.
    pub returned: usize,
    pub data: Vec<SensorReading>,
}

/// Query string for the history route.
///
/// `limit` is kept as text so a malformed value falls back to the default
/// instead of rejecting the request.
#[derive(Debug, Default, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<String>,
}

/// API error type mapping to HTTP status codes.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("not found: {0}")]
    NotFound(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
        };

        let body = Json(serde_json::json!({
            "success": false,
            "error": message
        }));

        (status, body).into_response()
    }
}

fn not_found(key: &SensorKey) -> ApiError {
    tracing::debug!(sensor = %key, "sensor not found");
    ApiError::NotFound(SENSOR_NOT_FOUND.to_string())
}

/// Parses the `limit` query value. Zero, negative and non-numeric values
/// mean the default.
pub fn parse_limit(raw: Option<&str>) -> usize {
    raw.and_then(|v| v.trim().parse::<usize>().ok())
        .filter(|n| *n > 0)
        .unwrap_or(DEFAULT_HISTORY_LIMIT)
}

/// Handler for `GET /health`.
pub async fn health_handler(Extension(state): Extension<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        mqtt: state.broker.label().to_string(),
        sensors: state.store.count(),
        subscribers: state.hub.subscriber_count(),
        timestamp: Utc::now(),
    })
}

/// Handler for `GET /api/sensors`.
pub async fn list_sensors_handler(
    Extension(state): Extension<Arc<AppState>>,
) -> Json<SensorListResponse> {
    let data = state.store.list_latest();
    Json(SensorListResponse {
        success: true,
        count: data.len(),
        data,
        timestamp: Utc::now(),
    })
}

/// Handler for `GET /api/sensors/{farmId}/{deviceId}`.
pub async fn get_sensor_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path((farm_id, device_id)): Path<(String, String)>,
) -> Result<Json<SensorResponse>, ApiError> {
    let key = SensorKey::new(farm_id, device_id);
    let snapshot = state.store.sensor(&key).ok_or_else(|| not_found(&key))?;

    Ok(Json(SensorResponse {
        success: true,
        history_count: snapshot.history.len(),
        latest: snapshot.latest,
        history: snapshot.history,
    }))
}

/// Handler for `GET /api/sensors/{farmId}/{deviceId}/latest`.
pub async fn get_sensor_latest_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path((farm_id, device_id)): Path<(String, String)>,
) -> Result<Json<LatestResponse>, ApiError> {
    let key = SensorKey::new(farm_id, device_id);
    let data = state.store.latest(&key).ok_or_else(|| not_found(&key))?;
    Ok(Json(LatestResponse {
        success: true,
        data,
    }))
}

/// Handler for `GET /api/sensors/{farmId}/{deviceId}/history`.
///
/// Unknown sensors return an empty page rather than 404.
pub async fn get_sensor_history_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path((farm_id, device_id)): Path<(String, String)>,
    Query(query): Query<HistoryQuery>,
) -> Json<HistoryResponse> {
    let key = SensorKey::new(farm_id, device_id);
    let limit = parse_limit(query.limit.as_deref());
    let (data, total) = state.store.history_page(&key, limit);

    Json(HistoryResponse {
        success: true,
        count: total,
        total,
        returned: data.len(),
        data,
    })
}
