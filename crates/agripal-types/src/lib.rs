//! Shared telemetry types for the AgriPal bridge.
//!
//! Every crate in the workspace speaks in these types: the broker link decodes
//! device payloads into [`DeviceSample`]s, the store stamps them into
//! [`SensorReading`]s, and the live channel pushes [`LiveEvent`]s to clients.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;

/// JSON field carrying the server-assigned ingestion timestamp.
pub const RECEIVED_AT_FIELD: &str = "receivedAt";

/// Composite identifier naming one telemetry source.
///
/// Ordered by farm, then device, so snapshots come out in a stable order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SensorKey {
    /// Farm the device belongs to.
    pub farm_id: String,
    /// Device identifier, unique within the farm.
    pub device_id: String,
}

impl SensorKey {
    pub fn new(farm_id: impl Into<String>, device_id: impl Into<String>) -> Self {
        Self {
            farm_id: farm_id.into(),
            device_id: device_id.into(),
        }
    }

    /// Whether `id` is this key's combined `"{farm}_{device}"` form.
    pub fn matches_id(&self, id: &str) -> bool {
        let farm = self.farm_id.len();
        id.len() == farm + 1 + self.device_id.len()
            && id.starts_with(&self.farm_id)
            && id.as_bytes()[farm] == b'_'
            && id.ends_with(&self.device_id)
    }
}

impl std::fmt::Display for SensorKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}_{}", self.farm_id, self.device_id)
    }
}

/// A decoded device payload that has not been ingested yet.
///
/// Metrics are an open set: anything besides the two identifiers is kept
/// verbatim, in the order the device sent it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceSample {
    pub farm_id: String,
    pub device_id: String,
    /// Named metric values (`soil_moisture`, `temperature`, ...).
    #[serde(flatten)]
    pub metrics: Map<String, Value>,
}

impl DeviceSample {
    pub fn new(farm_id: impl Into<String>, device_id: impl Into<String>) -> Self {
        Self {
            farm_id: farm_id.into(),
            device_id: device_id.into(),
            metrics: Map::new(),
        }
    }

    /// Adds or replaces a metric.
    pub fn with_metric(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metrics.insert(name.into(), value.into());
        self
    }

    /// The key this sample is stored under.
    pub fn key(&self) -> SensorKey {
        SensorKey::new(self.farm_id.clone(), self.device_id.clone())
    }

    /// Looks up a metric by name.
    pub fn metric(&self, name: &str) -> Option<&Value> {
        self.metrics.get(name)
    }
}

/// One stored telemetry sample: the device payload plus its ingestion time.
///
/// Serialises flat, e.g.
/// `{"farm_id":"F1","device_id":"D1","soil_moisture":42,"receivedAt":"..."}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorReading {
    #[serde(flatten)]
    pub sample: DeviceSample,
    /// Server-assigned ingestion timestamp.
    #[serde(rename = "receivedAt")]
    pub received_at: DateTime<Utc>,
}

impl SensorReading {
    pub fn key(&self) -> SensorKey {
        self.sample.key()
    }

    pub fn metric(&self, name: &str) -> Option<&Value> {
        self.sample.metric(name)
    }
}

/// Events pushed to live subscribers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum LiveEvent {
    /// Snapshot of every sensor's latest reading, sent once on connect.
    InitialData { data: Vec<SensorReading> },
    /// A single reading. `topic` is set for live broker traffic and absent
    /// for on-demand replies.
    SensorData {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        topic: Option<String>,
        data: Arc<SensorReading>,
    },
    /// A client frame could not be handled.
    Error { message: String },
}

impl LiveEvent {
    /// The event name used on the wire (also the SSE event field).
    pub fn name(&self) -> &'static str {
        match self {
            Self::InitialData { .. } => "initial-data",
            Self::SensorData { .. } => "sensor-data",
            Self::Error { .. } => "error",
        }
    }
}

/// How a client names a sensor: by its two parts or by the combined id.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum SensorRef {
    Key { farm_id: String, device_id: String },
    /// `"{farm}_{device}"`, as printed by [`SensorKey`]'s `Display`.
    Id {
        #[serde(alias = "sensorId")]
        sensor_id: String,
    },
}

/// Frames a live client may send.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientRequest {
    /// Ask for the current latest reading of one sensor.
    RequestSensor(SensorRef),
}
