//! Latest index and bounded history, behind a single reader/writer lock.
//!
//! Each key owns one newest-first deque; the latest reading is its front.
//! Keeping both views in one structure under one lock means a reader can
//! never see the latest reading and the history disagree.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use agripal_types::{DeviceSample, SensorKey, SensorReading};
use chrono::{DateTime, Utc};

/// Number of readings retained per sensor unless configured otherwise.
pub const DEFAULT_HISTORY_CAPACITY: usize = 100;

/// Newest-first readings per sensor.
type SensorMap = BTreeMap<SensorKey, VecDeque<SensorReading>>;

/// Latest reading and full retained history of one sensor, read atomically.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorSnapshot {
    pub latest: SensorReading,
    /// Newest first; `history[0] == latest`.
    pub history: Vec<SensorReading>,
}

/// Shared handle to the telemetry store.
///
/// Cloning is cheap and every clone sees the same data. Locks are
/// `std::sync` locks held only for in-memory map operations, never across
/// an `.await`.
#[derive(Debug, Clone)]
pub struct TelemetryStore {
    sensors: Arc<RwLock<SensorMap>>,
    capacity: usize,
}

impl Default for TelemetryStore {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_HISTORY_CAPACITY)
    }
}

impl TelemetryStore {
    /// Creates an empty store retaining [`DEFAULT_HISTORY_CAPACITY`] readings per sensor.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty store retaining `capacity` readings per sensor.
    ///
    /// A capacity of zero is raised to one: the latest reading is always kept.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            sensors: Arc::new(RwLock::new(BTreeMap::new())),
            capacity: capacity.max(1),
        }
    }

    /// Maximum number of readings retained per sensor.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Ingests a sample, stamping it with the current time.
    ///
    /// Returns the stored reading.
    pub fn put(&self, sample: DeviceSample) -> SensorReading {
        self.put_at(sample, Utc::now())
    }

    /// Ingests a sample with an explicit ingestion time.
    ///
    /// The stored timestamp is never earlier than the key's previous newest
    /// reading, so history stays ordered even if the clock steps backwards.
    pub fn put_at(&self, sample: DeviceSample, at: DateTime<Utc>) -> SensorReading {
        let key = sample.key();
        let mut sensors = self.write();
        let history = sensors.entry(key).or_default();

        let received_at = match history.front() {
            Some(newest) if newest.received_at > at => newest.received_at,
            _ => at,
        };
        let reading = SensorReading {
            sample,
            received_at,
        };

        history.push_front(reading.clone());
        if history.len() > self.capacity {
            history.truncate(self.capacity);
        }

        tracing::trace!(
            farm_id = %reading.sample.farm_id,
            device_id = %reading.sample.device_id,
            retained = history.len(),
            "stored reading"
        );
        reading
    }

    /// Current latest reading for `key`, if it has ever reported.
    pub fn latest(&self, key: &SensorKey) -> Option<SensorReading> {
        self.read().get(key).and_then(|h| h.front().cloned())
    }

    /// Up to `limit` readings for `key`, newest first.
    ///
    /// Unknown keys yield an empty vector.
    pub fn history(&self, key: &SensorKey, limit: usize) -> Vec<SensorReading> {
        self.read()
            .get(key)
            .map(|h| h.iter().take(limit).cloned().collect())
            .unwrap_or_default()
    }

    /// Up to `limit` readings for `key` plus the number retained, read together.
    pub fn history_page(&self, key: &SensorKey, limit: usize) -> (Vec<SensorReading>, usize) {
        let sensors = self.read();
        match sensors.get(key) {
            Some(h) => (h.iter().take(limit).cloned().collect(), h.len()),
            None => (Vec::new(), 0),
        }
    }

    /// Number of readings currently retained for `key`.
    pub fn history_len(&self, key: &SensorKey) -> usize {
        self.read().get(key).map_or(0, VecDeque::len)
    }

    /// Latest reading and full history for `key`, taken under one lock.
    pub fn sensor(&self, key: &SensorKey) -> Option<SensorSnapshot> {
        let sensors = self.read();
        let history = sensors.get(key)?;
        let latest = history.front()?.clone();
        Some(SensorSnapshot {
            latest,
            history: history.iter().cloned().collect(),
        })
    }

    /// Point-in-time snapshot of every sensor's latest reading, ordered by key.
    pub fn list_latest(&self) -> Vec<SensorReading> {
        self.read()
            .values()
            .filter_map(|h| h.front().cloned())
            .collect()
    }

    /// Finds the tracked sensor whose combined `"{farm}_{device}"` id is `sensor_id`.
    ///
    /// When underscores make the id ambiguous, the first match in key order wins.
    pub fn resolve_id(&self, sensor_id: &str) -> Option<SensorKey> {
        self.read().keys().find(|k| k.matches_id(sensor_id)).cloned()
    }

    /// Number of distinct sensors tracked.
    pub fn count(&self) -> usize {
        self.read().len()
    }

    // A panic while holding the lock cannot leave a half-applied put: every
    // mutation happens after the reading is fully built. Recover the guard.
    fn read(&self) -> RwLockReadGuard<'_, SensorMap> {
        self.sensors.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, SensorMap> {
        self.sensors.write().unwrap_or_else(PoisonError::into_inner)
    }
}
