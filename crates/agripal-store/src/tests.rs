//! Unit tests for the telemetry store.

use std::sync::Arc;
use std::thread;

use agripal_types::{DeviceSample, SensorKey};
use chrono::{Duration, TimeZone, Utc};
use serde_json::json;

use crate::store::{TelemetryStore, DEFAULT_HISTORY_CAPACITY};

fn sample(farm: &str, device: &str, seq: i64) -> DeviceSample {
    DeviceSample::new(farm, device).with_metric("seq", seq)
}

fn seq_of(reading: &agripal_types::SensorReading) -> i64 {
    reading
        .metric("seq")
        .and_then(|v| v.as_i64())
        .expect("reading should carry a seq metric")
}

// ── put / latest ─────────────────────────────────────────────────────

#[test]
fn put_then_latest_round_trips_metrics() {
    let store = TelemetryStore::new();
    store.put(DeviceSample::new("F1", "D1").with_metric("soil_moisture", 42));

    let latest = store
        .latest(&SensorKey::new("F1", "D1"))
        .expect("sensor should exist");

    assert_eq!(latest.metric("soil_moisture"), Some(&json!(42)));
    let stamped = serde_json::to_value(&latest).unwrap();
    assert!(!stamped["receivedAt"].as_str().unwrap_or_default().is_empty());
}

#[test]
fn latest_of_unknown_key_is_none() {
    let store = TelemetryStore::new();
    store.put(sample("F1", "D1", 1));
    assert!(store.latest(&SensorKey::new("F9", "D9")).is_none());
}

#[test]
fn put_overwrites_latest_for_same_key_only() {
    let store = TelemetryStore::new();
    store.put(sample("F1", "D1", 1));
    store.put(sample("F1", "D2", 10));
    store.put(sample("F1", "D1", 2));

    assert_eq!(seq_of(&store.latest(&SensorKey::new("F1", "D1")).unwrap()), 2);
    assert_eq!(seq_of(&store.latest(&SensorKey::new("F1", "D2")).unwrap()), 10);
    assert_eq!(store.count(), 2);
}

#[test]
fn put_returns_the_stored_reading() {
    let store = TelemetryStore::new();
    let stored = store.put(sample("F1", "D1", 7));
    assert_eq!(store.latest(&stored.key()), Some(stored));
}

// ── history ──────────────────────────────────────────────────────────

#[test]
fn history_is_newest_first() {
    let store = TelemetryStore::new();
    for seq in 1..=5 {
        store.put(sample("F1", "D1", seq));
    }

    let seqs: Vec<i64> = store
        .history(&SensorKey::new("F1", "D1"), 100)
        .iter()
        .map(seq_of)
        .collect();
    assert_eq!(seqs, vec![5, 4, 3, 2, 1]);
}

#[test]
fn history_of_unknown_key_is_empty() {
    let store = TelemetryStore::new();
    assert!(store.history(&SensorKey::new("F9", "D9"), 100).is_empty());
    assert_eq!(store.history_len(&SensorKey::new("F9", "D9")), 0);
}

#[test]
fn storing_101_readings_evicts_exactly_the_first() {
    let store = TelemetryStore::new();
    let key = SensorKey::new("F1", "D1");
    for seq in 1..=101 {
        store.put(sample("F1", "D1", seq));
    }

    let history = store.history(&key, usize::MAX);
    assert_eq!(history.len(), DEFAULT_HISTORY_CAPACITY);
    assert_eq!(seq_of(&history[0]), 101);
    assert_eq!(seq_of(history.last().unwrap()), 2);
    assert!(history.iter().all(|r| seq_of(r) != 1));
}

#[test]
fn history_limit_returns_most_recent_entries() {
    let store = TelemetryStore::new();
    let key = SensorKey::new("F1", "D1");
    for seq in 1..=100 {
        store.put(sample("F1", "D1", seq));
    }

    let seqs: Vec<i64> = store.history(&key, 5).iter().map(seq_of).collect();
    assert_eq!(seqs, vec![100, 99, 98, 97, 96]);
    assert_eq!(store.history_len(&key), 100);
}

#[test]
fn history_page_reports_retained_total() {
    let store = TelemetryStore::new();
    let key = SensorKey::new("F1", "D1");
    for seq in 1..=12 {
        store.put(sample("F1", "D1", seq));
    }

    let (page, total) = store.history_page(&key, 3);
    assert_eq!(page.iter().map(seq_of).collect::<Vec<_>>(), vec![12, 11, 10]);
    assert_eq!(total, 12);

    let (page, total) = store.history_page(&SensorKey::new("F9", "D9"), 3);
    assert!(page.is_empty());
    assert_eq!(total, 0);
}

#[test]
fn resolve_id_finds_tracked_sensor() {
    let store = TelemetryStore::new();
    store.put(sample("F1", "D1", 1));
    store.put(sample("F1", "D10", 1));

    assert_eq!(store.resolve_id("F1_D1"), Some(SensorKey::new("F1", "D1")));
    assert_eq!(store.resolve_id("F1_D10"), Some(SensorKey::new("F1", "D10")));
    assert_eq!(store.resolve_id("F1_D2"), None);
    assert_eq!(store.resolve_id("F1"), None);
}

#[test]
fn resolve_id_prefers_first_key_when_ambiguous() {
    let store = TelemetryStore::new();
    store.put(sample("a_b", "c", 1));
    store.put(sample("a", "b_c", 1));

    assert_eq!(store.resolve_id("a_b_c"), Some(SensorKey::new("a", "b_c")));
}

#[test]
fn custom_capacity_is_respected() {
    let store = TelemetryStore::with_capacity(3);
    for seq in 1..=10 {
        store.put(sample("F1", "D1", seq));
    }
    assert_eq!(store.history_len(&SensorKey::new("F1", "D1")), 3);
    assert_eq!(store.capacity(), 3);
}

#[test]
fn zero_capacity_still_keeps_latest() {
    let store = TelemetryStore::with_capacity(0);
    store.put(sample("F1", "D1", 1));
    store.put(sample("F1", "D1", 2));

    assert_eq!(store.capacity(), 1);
    assert_eq!(seq_of(&store.latest(&SensorKey::new("F1", "D1")).unwrap()), 2);
    assert_eq!(store.history_len(&SensorKey::new("F1", "D1")), 1);
}

// ── invariants ───────────────────────────────────────────────────────

#[test]
fn latest_equals_history_front() {
    let store = TelemetryStore::new();
    for seq in 0..30 {
        store.put(sample("F1", &format!("D{}", seq % 3), seq));
    }

    for reading in store.list_latest() {
        let key = reading.key();
        let history = store.history(&key, 1);
        assert_eq!(history.first(), Some(&reading));
        let snapshot = store.sensor(&key).expect("sensor should exist");
        assert_eq!(snapshot.latest, snapshot.history[0]);
    }
}

#[test]
fn timestamps_never_go_backwards_within_a_key() {
    let store = TelemetryStore::new();
    let base = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();

    store.put_at(sample("F1", "D1", 1), base);
    // Wall clock stepped back an hour.
    store.put_at(sample("F1", "D1", 2), base - Duration::hours(1));
    store.put_at(sample("F1", "D1", 3), base + Duration::seconds(5));

    let history = store.history(&SensorKey::new("F1", "D1"), 100);
    assert_eq!(history[1].received_at, base);
    for pair in history.windows(2) {
        assert!(pair[0].received_at >= pair[1].received_at);
    }
}

// ── snapshots / count ────────────────────────────────────────────────

#[test]
fn list_latest_has_one_entry_per_key_in_key_order() {
    let store = TelemetryStore::new();
    store.put(sample("farm2", "a", 1));
    store.put(sample("farm1", "b", 2));
    store.put(sample("farm1", "a", 3));
    store.put(sample("farm1", "a", 4));

    let keys: Vec<String> = store
        .list_latest()
        .iter()
        .map(|r| r.key().to_string())
        .collect();
    assert_eq!(keys, vec!["farm1_a", "farm1_b", "farm2_a"]);
    assert_eq!(store.count(), 3);
}

#[test]
fn empty_store_has_nothing() {
    let store = TelemetryStore::new();
    assert_eq!(store.count(), 0);
    assert!(store.list_latest().is_empty());
    assert!(store.sensor(&SensorKey::new("F1", "D1")).is_none());
}

#[test]
fn clones_share_state() {
    let store = TelemetryStore::new();
    let other = store.clone();
    other.put(sample("F1", "D1", 1));
    assert_eq!(store.count(), 1);
}

// ── concurrency ──────────────────────────────────────────────────────

#[test]
fn concurrent_readers_never_see_torn_state() {
    let store = Arc::new(TelemetryStore::with_capacity(10));
    let key = SensorKey::new("F1", "D1");
    store.put(sample("F1", "D1", 0));

    let writer = {
        let store = store.clone();
        thread::spawn(move || {
            for seq in 1..=2_000 {
                store.put(sample("F1", "D1", seq));
            }
        })
    };

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let store = store.clone();
            let key = key.clone();
            thread::spawn(move || {
                for _ in 0..2_000 {
                    let snapshot = store.sensor(&key).expect("sensor should exist");
                    assert_eq!(snapshot.latest, snapshot.history[0]);
                    assert!(snapshot.history.len() <= 10);
                    let seqs: Vec<i64> = snapshot.history.iter().map(seq_of).collect();
                    assert!(seqs.windows(2).all(|w| w[0] == w[1] + 1));
                }
            })
        })
        .collect();

    writer.join().expect("writer should not panic");
    for reader in readers {
        reader.join().expect("reader should not panic");
    }
    assert_eq!(seq_of(&store.latest(&key).unwrap()), 2_000);
}
