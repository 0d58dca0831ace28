//! # Aggregation Engine
//!
//! Stateful session engine that merges the batch snapshot with the live feed.
//!
//! ## Architecture
//!
//! The engine manages:
//! - Initial markers (the batch snapshot, fixed once loaded)
//! - Live markers (one per device, replaced in place on every update)
//! - Per-device aggregates (point count, cumulative distance)
//! - Cluster and style configuration
//!
//! The engine itself is synchronous. Concurrent access goes through
//! [`SharedEngine`]: live writes are serialized by one ingest worker, and
//! views are built under the read lock into owned values, so a reader always
//! sees a consistent snapshot.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

use log::{debug, info, warn};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::aggregates::{AggregateSummary, DeviceAggregateStore};
use crate::clustering::{Cluster, ClusterConfig, ClusterIndex};
use crate::config::EngineConfig;
use crate::error::Result;
use crate::feed::{decode_message, FeedMessage};
use crate::styles::StyleConfig;
use crate::summary::SummaryRecord;
use crate::{DeviceId, LocationPoint, LocationRecord, Marker};

// ============================================================================
// Core Types
// ============================================================================

/// Outcome of loading a set of records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchReport {
    pub accepted: u32,
    pub dropped: u32,
}

/// What the rendering layer draws.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineView {
    pub clusters: Vec<Cluster>,
    #[serde(rename = "deviceAggregates")]
    pub device_aggregates: BTreeMap<DeviceId, AggregateSummary>,
}

/// Engine statistics for monitoring.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineStats {
    pub device_count: u32,
    pub initial_marker_count: u32,
    pub live_marker_count: u32,
    pub batch_dropped: u32,
    pub live_accepted: u64,
    pub live_rejected: u64,
}

// ============================================================================
// Aggregation Engine
// ============================================================================

/// The main stateful aggregation engine.
pub struct AggregationEngine {
    // Marker sets
    initial_markers: Vec<Marker>,
    live_markers: BTreeMap<DeviceId, Marker>,

    aggregates: DeviceAggregateStore,

    // Configuration
    cluster_index: ClusterIndex,
    styles: StyleConfig,

    // Ingestion counters
    batch_dropped: u32,
    live_accepted: u64,
    live_rejected: u64,
}

impl AggregationEngine {
    /// Create a new engine with default configuration.
    pub fn new() -> Self {
        Self {
            initial_markers: Vec::new(),
            live_markers: BTreeMap::new(),
            aggregates: DeviceAggregateStore::new(),
            cluster_index: ClusterIndex::default(),
            styles: StyleConfig::default(),
            batch_dropped: 0,
            live_accepted: 0,
            live_rejected: 0,
        }
    }

    /// Create a new engine with custom configuration.
    pub fn with_config(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            cluster_index: ClusterIndex::new(config.cluster),
            styles: config.styles,
            ..Self::new()
        })
    }

    /// Wrap the engine for sharing between the feed worker and readers.
    pub fn into_shared(self) -> SharedEngine {
        Arc::new(RwLock::new(self))
    }

    // ========================================================================
    // Batch Ingestion
    // ========================================================================

    /// Load the historical snapshot.
    ///
    /// Malformed records are dropped one by one; the load itself never fails.
    /// Valid points become the initial marker set, ordered by device id then
    /// timestamp (stable for equal keys), and each device's point count is
    /// seeded with its tally in this batch. Loading again replaces the
    /// initial marker set.
    ///
    /// Timestamps that both parse as numbers (epoch seconds) compare
    /// numerically; numeric timestamps sort before text ones, and text
    /// timestamps compare lexically.
    pub fn load_batch(&mut self, records: &[LocationRecord]) -> BatchReport {
        let mut points: Vec<LocationPoint> = Vec::with_capacity(records.len());
        let mut dropped = 0u32;

        for record in records {
            match record.to_point() {
                Ok(point) => points.push(point),
                Err(e) => {
                    dropped += 1;
                    debug!("[AggregationEngine] Dropping batch record: {}", e);
                }
            }
        }

        points.sort_by(|a, b| {
            a.device_id
                .cmp(&b.device_id)
                .then_with(|| timestamp_order(&a.timestamp, &b.timestamp))
        });

        let mut tallies: HashMap<&str, u64> = HashMap::new();
        for point in &points {
            *tallies.entry(point.device_id.as_str()).or_insert(0) += 1;
        }
        for (device_id, count) in tallies {
            self.aggregates.seed_count(device_id, count);
        }

        let accepted = points.len() as u32;
        self.initial_markers = points
            .into_iter()
            .enumerate()
            .map(|(i, p)| Marker::initial(p, i))
            .collect();
        self.batch_dropped += dropped;

        if dropped > 0 {
            warn!(
                "[AggregationEngine] Batch load dropped {} malformed records",
                dropped
            );
        }
        info!(
            "[AggregationEngine] Loaded batch: {} points, {} devices",
            accepted,
            self.aggregates.len()
        );

        BatchReport { accepted, dropped }
    }

    /// Seed a device's cumulative distance from a precomputed summary.
    pub fn load_summary(&mut self, device_id: &str, total_distance_m: f64) {
        self.aggregates.seed_distance(device_id, total_distance_m);
    }

    /// Seed distances from summary records.
    pub fn load_summaries(&mut self, summaries: &[SummaryRecord]) {
        for summary in summaries {
            self.load_summary(&summary.device_id, summary.total_distance_m);
        }
    }

    // ========================================================================
    // Live Ingestion
    // ========================================================================

    /// Ingest one live update.
    ///
    /// A record that fails validation leaves the engine untouched and comes
    /// back as a non-fatal [`FleetError::InvalidLocation`](crate::FleetError).
    pub fn ingest_live(&mut self, record: &LocationRecord) -> Result<()> {
        match record.to_point() {
            Ok(point) => {
                self.ingest_live_point(point);
                Ok(())
            }
            Err(e) => {
                self.live_rejected += 1;
                warn!("[AggregationEngine] Rejected live update: {}", e);
                Err(e)
            }
        }
    }

    /// Ingest an already-validated live point.
    pub fn ingest_live_point(&mut self, point: LocationPoint) {
        self.aggregates.record_live_observation(&point);
        self.live_markers
            .insert(point.device_id.clone(), Marker::live(point));
        self.live_accepted += 1;
    }

    /// Ingest a batch of live updates (e.g. drained from a channel).
    ///
    /// Per-device order is preserved; devices are folded independently.
    pub fn ingest_live_batch(&mut self, records: &[LocationRecord]) -> BatchReport {
        let mut points = Vec::with_capacity(records.len());
        let mut dropped = 0u32;
        for record in records {
            match record.to_point() {
                Ok(point) => points.push(point),
                Err(e) => {
                    dropped += 1;
                    warn!("[AggregationEngine] Rejected live update: {}", e);
                }
            }
        }

        self.aggregates.record_live_batch(&points);
        let accepted = points.len() as u32;
        for point in points {
            self.live_markers
                .insert(point.device_id.clone(), Marker::live(point));
        }

        self.live_accepted += accepted as u64;
        self.live_rejected += dropped as u64;
        BatchReport { accepted, dropped }
    }

    /// Decode and ingest a raw feed message.
    ///
    /// Returns `Ok(true)` when a location update was applied and `Ok(false)`
    /// for message kinds the engine does not consume.
    pub fn ingest_live_message(&mut self, text: &str) -> Result<bool> {
        match decode_message(text) {
            Ok(FeedMessage::LocationUpdate(record)) => self.ingest_live(&record).map(|_| true),
            Ok(FeedMessage::Other) => Ok(false),
            Err(e) => {
                self.live_rejected += 1;
                warn!("[AggregationEngine] Undecodable feed message: {}", e);
                Err(e)
            }
        }
    }

    // ========================================================================
    // Views
    // ========================================================================

    /// All markers in clustering order: the batch snapshot first, then live
    /// markers by device id.
    pub fn markers(&self) -> Vec<Marker> {
        self.initial_markers
            .iter()
            .chain(self.live_markers.values())
            .cloned()
            .collect()
    }

    pub fn initial_markers(&self) -> &[Marker] {
        &self.initial_markers
    }

    pub fn live_marker(&self, device_id: &str) -> Option<&Marker> {
        self.live_markers.get(device_id)
    }

    pub fn live_marker_count(&self) -> usize {
        self.live_markers.len()
    }

    pub fn aggregates(&self) -> &DeviceAggregateStore {
        &self.aggregates
    }

    /// Current clusters and aggregates. Clusters are recomputed on every call.
    pub fn current_view(&self) -> EngineView {
        let markers = self.markers();
        EngineView {
            clusters: self.cluster_index.recompute(&markers, &self.styles),
            device_aggregates: self.aggregates.snapshot(),
        }
    }

    /// Current view as JSON string.
    pub fn current_view_json(&self) -> String {
        serde_json::to_string(&self.current_view()).unwrap_or_else(|_| "{}".to_string())
    }

    // ========================================================================
    // Configuration
    // ========================================================================

    /// Replace the clustering config. An invalid config is rejected and
    /// the current one stays in effect.
    pub fn set_cluster_config(&mut self, config: ClusterConfig) -> Result<()> {
        self.cluster_index.set_config(config)
    }

    pub fn cluster_config(&self) -> &ClusterConfig {
        self.cluster_index.config()
    }

    pub fn set_style_config(&mut self, styles: StyleConfig) {
        self.styles = styles;
    }

    pub fn style_config(&self) -> &StyleConfig {
        &self.styles
    }

    /// Replace cluster and style config together, or neither.
    pub fn apply_config(&mut self, config: EngineConfig) -> Result<()> {
        self.set_cluster_config(config.cluster)?;
        self.set_style_config(config.styles);
        Ok(())
    }

    // ========================================================================
    // Statistics
    // ========================================================================

    /// Clear all session state. Configuration is kept.
    pub fn clear(&mut self) {
        self.initial_markers.clear();
        self.live_markers.clear();
        self.aggregates.clear();
        self.batch_dropped = 0;
        self.live_accepted = 0;
        self.live_rejected = 0;
    }

    pub fn stats(&self) -> EngineStats {
        EngineStats {
            device_count: self.aggregates.len() as u32,
            initial_marker_count: self.initial_markers.len() as u32,
            live_marker_count: self.live_markers.len() as u32,
            batch_dropped: self.batch_dropped,
            live_accepted: self.live_accepted,
            live_rejected: self.live_rejected,
        }
    }
}

impl Default for AggregationEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Order two batch timestamps: numeric ones by value and before any text
/// timestamp, text ones lexically.
fn timestamp_order(a: &str, b: &str) -> Ordering {
    match (a.parse::<f64>(), b.parse::<f64>()) {
        (Ok(x), Ok(y)) => x.total_cmp(&y),
        (Ok(_), Err(_)) => Ordering::Less,
        (Err(_), Ok(_)) => Ordering::Greater,
        (Err(_), Err(_)) => a.cmp(b),
    }
}

// ============================================================================
// Shared Access
// ============================================================================

/// Engine handle shared between the ingest worker and view readers.
pub type SharedEngine = Arc<RwLock<AggregationEngine>>;

/// Global engine instance.
pub static ENGINE: Lazy<SharedEngine> = Lazy::new(|| AggregationEngine::new().into_shared());

/// Run a mutation against the global engine.
///
/// A poisoned lock is taken over as is.
pub fn with_engine<F, R>(f: F) -> R
where
    F: FnOnce(&mut AggregationEngine) -> R,
{
    let mut engine = ENGINE.write().unwrap_or_else(|poisoned| poisoned.into_inner());
    f(&mut engine)
}

/// Read from the global engine.
pub fn with_engine_read<F, R>(f: F) -> R
where
    F: FnOnce(&AggregationEngine) -> R,
{
    let engine = ENGINE.read().unwrap_or_else(|poisoned| poisoned.into_inner());
    f(&engine)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FleetError;
    use crate::geo_utils::haversine_distance;
    use crate::GpsPoint;
    use serde_json::json;

    fn batch() -> Vec<LocationRecord> {
        vec![
            LocationRecord::new("dev001", "2026-02-02T10:00:00", 29.0, 41.0),
            LocationRecord::new("dev001", "2026-02-02T10:00:05", 29.01, 41.0),
            LocationRecord::new("dev002", "2026-02-02T10:00:00", 29.5, 41.5),
        ]
    }

    #[test]
    fn test_load_batch_seeds_counts() {
        let mut engine = AggregationEngine::new();
        let report = engine.load_batch(&batch());

        assert_eq!(report, BatchReport { accepted: 3, dropped: 0 });
        assert_eq!(engine.aggregates().point_count("dev001"), 2);
        assert_eq!(engine.aggregates().point_count("dev002"), 1);
        // Batch load never adds distance
        assert_eq!(engine.aggregates().total_distance("dev001"), 0.0);
    }

    #[test]
    fn test_load_batch_drops_malformed() {
        let mut engine = AggregationEngine::new();
        let mut records = batch();
        records.push(serde_json::from_value(json!({"device_id": "dev003", "latitude": null, "longitude": 1.0})).unwrap());
        records.push(LocationRecord::new("dev004", "t", 123.0, 0.0));

        let report = engine.load_batch(&records);
        assert_eq!(report.accepted, 3);
        assert_eq!(report.dropped, 2);
        assert!(!engine.aggregates().contains("dev003"));
        assert_eq!(engine.stats().batch_dropped, 2);
    }

    #[test]
    fn test_initial_markers_sorted_by_device_then_time() {
        let mut engine = AggregationEngine::new();
        engine.load_batch(&[
            LocationRecord::new("dev002", "10:00", 1.0, 1.0),
            LocationRecord::new("dev001", "10:05", 2.0, 2.0),
            LocationRecord::new("dev001", "10:00", 3.0, 3.0),
        ]);
        let ids: Vec<&str> = engine.initial_markers().iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["dev001#0", "dev001#1", "dev002#2"]);
        assert_eq!(engine.initial_markers()[0].point.timestamp, "10:00");
    }

    #[test]
    fn test_live_marker_replaced_in_place() {
        let mut engine = AggregationEngine::new();
        engine.ingest_live(&LocationRecord::new("dev001", "t1", 29.0, 41.0)).unwrap();
        engine.ingest_live(&LocationRecord::new("dev001", "t2", 29.0, 41.1)).unwrap();

        assert_eq!(engine.live_marker_count(), 1);
        let marker = engine.live_marker("dev001").unwrap();
        assert_eq!(marker.point.timestamp, "t2");
    }

    #[test]
    fn test_live_distance_accumulates() {
        let mut engine = AggregationEngine::new();
        engine.ingest_live(&LocationRecord::new("dev001", "t1", 29.0, 41.0)).unwrap();
        engine.ingest_live(&LocationRecord::new("dev001", "t2", 29.0, 41.1)).unwrap();

        let expected = haversine_distance(&GpsPoint::new(29.0, 41.0), &GpsPoint::new(29.0, 41.1));
        let actual = engine.aggregates().total_distance("dev001");
        assert!((actual - expected).abs() <= expected * 0.01);
        assert!((actual - 9_725.0).abs() < 10.0);
    }

    #[test]
    fn test_malformed_live_leaves_state_unchanged() {
        let mut engine = AggregationEngine::new();
        engine.load_batch(&batch());
        let before = engine.current_view();

        let record: LocationRecord = serde_json::from_value(json!({
            "device_id": "dev001",
            "latitude": "bad",
            "longitude": 41.0
        }))
        .unwrap();
        let result = engine.ingest_live(&record);

        assert!(result.unwrap_err().is_malformed_input());
        assert_eq!(engine.current_view(), before);
        assert_eq!(engine.live_marker_count(), 0);
        assert_eq!(engine.stats().live_rejected, 1);
    }

    #[test]
    fn test_live_stacks_on_batch_count() {
        let mut engine = AggregationEngine::new();
        engine.load_batch(&batch());
        // Feed echo of an already-loaded point still counts
        engine.ingest_live(&LocationRecord::new("dev001", "2026-02-02T10:00:05", 29.01, 41.0)).unwrap();
        assert_eq!(engine.aggregates().point_count("dev001"), 3);
    }

    #[test]
    fn test_summary_seeds_distance() {
        let mut engine = AggregationEngine::new();
        engine.load_summaries(&[SummaryRecord::new("dev001", 1500.0), SummaryRecord::zero("dev002")]);
        engine.ingest_live(&LocationRecord::new("dev001", "t", 29.0, 41.0)).unwrap();

        let view = engine.current_view();
        assert_eq!(view.device_aggregates["dev001"].total_distance_m, 1500.0);
        assert_eq!(view.device_aggregates["dev001"].count, 1);
        assert_eq!(view.device_aggregates["dev002"].total_distance_m, 0.0);
    }

    #[test]
    fn test_view_clusters_combined_markers() {
        let mut engine = AggregationEngine::new();
        engine.load_batch(&batch());
        engine.ingest_live(&LocationRecord::new("dev003", "t", 10.0, 10.0)).unwrap();

        engine.set_cluster_config(ClusterConfig::new(0.0, 8.0)).unwrap();
        assert_eq!(engine.current_view().clusters.len(), 4);

        engine.set_cluster_config(ClusterConfig::new(1.0e9, 8.0)).unwrap();
        let view = engine.current_view();
        assert_eq!(view.clusters.len(), 1);
        assert_eq!(view.clusters[0].member_count, 4);
        assert_eq!(view.clusters[0].member_ids.last().map(String::as_str), Some("dev003"));
    }

    #[test]
    fn test_ingest_live_message() {
        let mut engine = AggregationEngine::new();
        let applied = engine
            .ingest_live_message(
                r#"{"type":"location_update","device_id":"dev005","timestamp":"t","latitude":39.9,"longitude":32.8}"#,
            )
            .unwrap();
        assert!(applied);

        let ignored = engine.ingest_live_message(r#"{"type":"heartbeat"}"#).unwrap();
        assert!(!ignored);

        assert!(engine.ingest_live_message("not json").is_err());
        assert_eq!(engine.stats().live_accepted, 1);
    }

    #[test]
    fn test_ingest_live_batch() {
        let mut engine = AggregationEngine::new();
        let report = engine.ingest_live_batch(&[
            LocationRecord::new("dev001", "t1", 29.0, 41.0),
            LocationRecord::new("dev002", "t1", 30.0, 41.0),
            LocationRecord::new("dev001", "t2", 29.0, 41.1),
            LocationRecord::new("dev002", "t2", 91.0, 41.0),
        ]);

        assert_eq!(report, BatchReport { accepted: 3, dropped: 1 });
        assert_eq!(engine.live_marker("dev001").unwrap().point.timestamp, "t2");
        assert_eq!(engine.live_marker("dev002").unwrap().point.timestamp, "t1");
        assert!(engine.aggregates().total_distance("dev001") > 9_000.0);
    }

    #[test]
    fn test_view_json_shape() {
        let mut engine = AggregationEngine::new();
        engine.load_batch(&batch());
        let value: serde_json::Value = serde_json::from_str(&engine.current_view_json()).unwrap();
        assert!(value["clusters"].is_array());
        assert_eq!(value["deviceAggregates"]["dev001"]["count"], 2);
    }

    #[test]
    fn test_with_config_from_json() {
        let config = EngineConfig::from_json(
            r##"{ "cluster": { "distance": 0 }, "styles": { "fallback_color": "#111111" } }"##,
        )
        .unwrap();
        let mut engine = AggregationEngine::with_config(config).unwrap();
        engine.load_batch(&[LocationRecord::new("unlisted", "t", 1.0, 1.0)]);

        let view = engine.current_view();
        assert_eq!(view.clusters[0].style.color, "#111111");
        assert_eq!(engine.cluster_config().distance, 0.0);

        engine.apply_config(EngineConfig::default()).unwrap();
        assert_eq!(engine.style_config().color_for("unlisted"), "#34495e");
    }

    #[test]
    fn test_global_engine_access() {
        with_engine(|e| {
            e.clear();
            e.load_batch(&batch());
        });
        let count = with_engine_read(|e| e.aggregates().point_count("dev001"));
        assert_eq!(count, 2);
    }

    #[test]
    fn test_clear_keeps_config() {
        let mut engine = AggregationEngine::new();
        engine.set_cluster_config(ClusterConfig::new(12.0, 5.0)).unwrap();
        engine.load_batch(&batch());
        engine.clear();

        assert_eq!(engine.stats(), EngineStats::default());
        assert_eq!(engine.cluster_config().distance, 12.0);
    }

    #[test]
    fn test_invalid_cluster_config_rejected() {
        let config = EngineConfig {
            cluster: ClusterConfig::new(-5.0, 2000.0),
            ..EngineConfig::default()
        };
        assert!(matches!(
            AggregationEngine::with_config(config.clone()),
            Err(FleetError::Config { .. })
        ));

        let mut engine = AggregationEngine::new();
        engine.set_cluster_config(ClusterConfig::new(25.0, 9.0)).unwrap();
        assert!(engine.set_cluster_config(ClusterConfig::new(40.0, f64::NAN)).is_err());
        assert!(engine.set_cluster_config(ClusterConfig::new(40.0, f64::INFINITY)).is_err());
        assert!(engine.apply_config(config).is_err());

        // Rejected configs leave the previous one and the styles untouched
        assert_eq!(engine.cluster_config(), &ClusterConfig::new(25.0, 9.0));
        assert_eq!(engine.style_config(), &StyleConfig::default());
    }

    #[test]
    fn test_epoch_timestamps_sort_numerically() {
        let mut engine = AggregationEngine::new();
        engine.load_batch(&[
            LocationRecord::new("dev001", "1770026400.5", 1.0, 1.0),
            LocationRecord::new("dev001", "999999999", 2.0, 2.0),
            LocationRecord::new("dev001", "not-a-number", 3.0, 3.0),
            LocationRecord::new("dev001", "1770026400", 4.0, 4.0),
        ]);
        let order: Vec<&str> = engine
            .initial_markers()
            .iter()
            .map(|m| m.point.timestamp.as_str())
            .collect();
        assert_eq!(order, vec!["999999999", "1770026400", "1770026400.5", "not-a-number"]);
    }

    #[test]
    fn test_timestamp_order_is_consistent() {
        assert_eq!(timestamp_order("9", "10"), Ordering::Less);
        assert_eq!(timestamp_order("10", "abc"), Ordering::Less);
        assert_eq!(timestamp_order("abc", "10"), Ordering::Greater);
        assert_eq!(
            timestamp_order("2026-02-02T10:00:00", "2026-02-02T09:00:00"),
            Ordering::Greater
        );
    }
}
