//! End-to-end scenarios for the aggregation engine: batch load, summaries,
//! live updates, and the resulting view.

use fleet_tracker::geo_utils::haversine_distance;
use fleet_tracker::{
    AggregationEngine, ClusterConfig, DeviceAggregateStore, GpsPoint, LocationPoint,
    LocationRecord, MarkerOrigin, StyleConfig,
};
use serde_json::json;

fn approx_eq(a: f64, b: f64, epsilon: f64) -> bool {
    (a - b).abs() < epsilon
}

fn three_point_batch() -> Vec<LocationRecord> {
    vec![
        LocationRecord::new("dev001", "2026-02-02T10:00:00", 29.0, 41.0),
        LocationRecord::new("dev001", "2026-02-02T10:00:05", 29.01, 41.0),
        LocationRecord::new("dev002", "2026-02-02T10:00:00", 29.5, 41.5),
    ]
}

#[test]
fn test_batch_scenario_counts_and_clusters() {
    let mut engine = AggregationEngine::new();
    engine.load_batch(&three_point_batch());

    let view = engine.current_view();
    assert_eq!(view.device_aggregates["dev001"].count, 2);
    assert_eq!(view.device_aggregates["dev002"].count, 1);

    engine.set_cluster_config(ClusterConfig::new(1.0e7, 8.0)).unwrap();
    assert_eq!(engine.current_view().clusters.len(), 1);

    engine.set_cluster_config(ClusterConfig::new(0.0, 8.0)).unwrap();
    assert_eq!(engine.current_view().clusters.len(), 3);
}

#[test]
fn test_seed_count_plus_live_observations() {
    for (seed, k) in [(0u64, 0usize), (3, 1), (10, 7), (1, 25)] {
        let mut store = DeviceAggregateStore::new();
        store.seed_count("dev001", seed);
        for i in 0..k {
            let p = LocationPoint::new("dev001", "", 39.9 + i as f64 * 1e-4, 32.8).unwrap();
            store.record_live_observation(&p);
        }
        assert_eq!(store.point_count("dev001"), seed + k as u64);
    }
}

#[test]
fn test_distance_accumulation_law() {
    let track: Vec<GpsPoint> = (0..12)
        .map(|i| GpsPoint::new(39.90 + i as f64 * 0.002, 32.80 + (i % 3) as f64 * 0.001))
        .collect();

    let mut engine = AggregationEngine::new();
    engine
        .ingest_live(&LocationRecord::new("dev007", "t0", track[0].latitude, track[0].longitude))
        .unwrap();
    // The first point alone adds nothing
    assert_eq!(engine.aggregates().total_distance("dev007"), 0.0);

    for (i, p) in track.iter().enumerate().skip(1) {
        engine
            .ingest_live(&LocationRecord::new("dev007", &format!("t{}", i), p.latitude, p.longitude))
            .unwrap();
    }

    let expected: f64 = track
        .windows(2)
        .map(|w| haversine_distance(&w[0], &w[1]))
        .sum();
    assert!(approx_eq(engine.aggregates().total_distance("dev007"), expected, 1e-6));
    assert_eq!(engine.aggregates().point_count("dev007"), 12);
}

#[test]
fn test_two_live_points_distance() {
    let mut engine = AggregationEngine::new();
    engine.ingest_live(&LocationRecord::new("dev001", "t1", 29.0, 41.0)).unwrap();
    engine.ingest_live(&LocationRecord::new("dev001", "t2", 29.0, 41.1)).unwrap();

    let expected = haversine_distance(&GpsPoint::new(29.0, 41.0), &GpsPoint::new(29.0, 41.1));
    let actual = engine.current_view().device_aggregates["dev001"].total_distance_m;
    assert!(approx_eq(actual, expected, expected * 0.01));
}

#[test]
fn test_malformed_live_input_is_not_fatal() {
    let mut engine = AggregationEngine::new();
    engine.load_batch(&three_point_batch());
    engine.ingest_live(&LocationRecord::new("dev002", "t", 29.5, 41.6)).unwrap();
    let before = engine.current_view();

    let bad: LocationRecord = serde_json::from_value(json!({
        "device_id": "dev001",
        "latitude": "bad",
        "longitude": 41.0
    }))
    .unwrap();
    assert!(engine.ingest_live(&bad).is_err());

    assert_eq!(engine.current_view(), before);
    assert!(engine.live_marker("dev001").is_none());
}

#[test]
fn test_cluster_recompute_idempotent_over_engine() {
    let mut engine = AggregationEngine::new();
    engine.load_batch(&three_point_batch());
    engine.ingest_live(&LocationRecord::new("dev003", "t", 29.02, 41.01)).unwrap();

    engine.set_cluster_config(ClusterConfig::new(40.0, 10.0)).unwrap();
    let first = engine.current_view().clusters;
    let second = engine.current_view().clusters;
    assert_eq!(first, second);
}

#[test]
fn test_live_set_one_marker_per_device() {
    let mut engine = AggregationEngine::new();
    engine.load_batch(&three_point_batch());

    for i in 0..10 {
        let device = if i % 2 == 0 { "dev001" } else { "dev002" };
        engine
            .ingest_live(&LocationRecord::new(device, &format!("t{}", i), 29.0 + i as f64 * 0.01, 41.0))
            .unwrap();
    }

    let markers = engine.markers();
    let live: Vec<_> = markers.iter().filter(|m| m.origin == MarkerOrigin::Live).collect();
    let initial = markers.iter().filter(|m| m.origin == MarkerOrigin::Initial).count();
    assert_eq!(live.len(), 2);
    assert_eq!(initial, 3);
    // Initial markers are never touched by live updates
    assert_eq!(engine.initial_markers()[0].point.latitude, 29.0);
}

#[test]
fn test_injected_styles_reach_clusters() {
    let mut engine = AggregationEngine::new();
    engine.set_style_config(StyleConfig::empty().with_color("dev002", "#ff00ff"));
    engine.set_cluster_config(ClusterConfig::new(0.0, 8.0)).unwrap();
    engine.load_batch(&three_point_batch());

    let view = engine.current_view();
    let dev002 = view
        .clusters
        .iter()
        .find(|c| c.representative_device_id.as_deref() == Some("dev002"))
        .unwrap();
    assert_eq!(dev002.style.color, "#ff00ff");
    assert!(view
        .clusters
        .iter()
        .filter(|c| c.representative_device_id.as_deref() == Some("dev001"))
        .all(|c| c.style.color == "#34495e"));
}
