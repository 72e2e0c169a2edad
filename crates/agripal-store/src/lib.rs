//! In-memory telemetry store for the AgriPal bridge.
//!
//! Holds, per [`SensorKey`](agripal_types::SensorKey), the latest reading and a
//! bounded newest-first history. This is the only shared mutable state of the
//! service; it lives as long as the process and is never persisted.
//!
//! # Usage
//!
//! ```rust
//! use agripal_store::TelemetryStore;
//! use agripal_types::{DeviceSample, SensorKey};
//!
//! let store = TelemetryStore::new();
//! store.put(DeviceSample::new("F1", "D1").with_metric("soil_moisture", 42));
//!
//! let latest = store.latest(&SensorKey::new("F1", "D1")).unwrap();
//! assert_eq!(latest.metric("soil_moisture"), Some(&serde_json::json!(42)));
//! ```

mod store;

pub use store::{SensorSnapshot, TelemetryStore, DEFAULT_HISTORY_CAPACITY};

#[cfg(test)]
mod tests;
