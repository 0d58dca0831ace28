//! Per-device track summaries.
//!
//! A summary is the precomputed distance source the engine seeds from: the
//! dashboard API serves one per device and day, and [`summarize_track`]
//! computes the same record from an ordered track.

use serde::{Deserialize, Serialize};

use crate::geo_utils::polyline_length;
use crate::{DeviceId, GpsPoint, LocationPoint};

/// The part of a summary the engine consumes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryRecord {
    pub device_id: DeviceId,
    /// Absent in the payload means 0
    #[serde(default)]
    pub total_distance_m: f64,
}

impl SummaryRecord {
    pub fn new(device_id: &str, total_distance_m: f64) -> Self {
        Self {
            device_id: device_id.to_string(),
            total_distance_m,
        }
    }

    /// Fallback used when a summary cannot be obtained.
    pub fn zero(device_id: &str) -> Self {
        Self::new(device_id, 0.0)
    }
}

/// A timestamped position at the edge of a track.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackEndpoint {
    pub timestamp: String,
    pub latitude: f64,
    pub longitude: f64,
}

impl From<&LocationPoint> for TrackEndpoint {
    fn from(point: &LocationPoint) -> Self {
        Self {
            timestamp: point.timestamp.clone(),
            latitude: point.latitude,
            longitude: point.longitude,
        }
    }
}

/// Full daily summary for a device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceSummary {
    pub device_id: DeviceId,
    pub date: String,
    pub count: u64,
    pub first: Option<TrackEndpoint>,
    pub last: Option<TrackEndpoint>,
    pub total_distance_m: f64,
}

impl DeviceSummary {
    pub fn record(&self) -> SummaryRecord {
        SummaryRecord::new(&self.device_id, self.total_distance_m)
    }
}

/// Summarize a device's track. Points must already be in time order.
///
/// Points belonging to other devices are ignored. Distance is rounded to
/// centimeters.
pub fn summarize_track(device_id: &str, date: &str, points: &[LocationPoint]) -> DeviceSummary {
    let track: Vec<&LocationPoint> = points.iter().filter(|p| p.device_id == device_id).collect();
    let positions: Vec<GpsPoint> = track.iter().map(|p| p.position()).collect();
    let total = polyline_length(&positions);

    DeviceSummary {
        device_id: device_id.to_string(),
        date: date.to_string(),
        count: track.len() as u64,
        first: track.first().map(|p| TrackEndpoint::from(*p)),
        last: track.last().map(|p| TrackEndpoint::from(*p)),
        total_distance_m: (total * 100.0).round() / 100.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(device: &str, ts: &str, lat: f64, lng: f64) -> LocationPoint {
        LocationPoint::new(device, ts, lat, lng).unwrap()
    }

    #[test]
    fn test_empty_track() {
        let summary = summarize_track("dev001", "2026-02-02", &[]);
        assert_eq!(summary.count, 0);
        assert!(summary.first.is_none());
        assert!(summary.last.is_none());
        assert_eq!(summary.total_distance_m, 0.0);
    }

    #[test]
    fn test_track_summary() {
        let points = vec![
            point("dev001", "10:00", 29.0, 41.0),
            point("dev002", "10:00", 30.0, 40.0),
            point("dev001", "10:05", 29.01, 41.0),
            point("dev001", "10:10", 29.02, 41.0),
        ];
        let summary = summarize_track("dev001", "2026-02-02", &points);

        assert_eq!(summary.count, 3);
        assert_eq!(summary.first.as_ref().unwrap().timestamp, "10:00");
        assert_eq!(summary.last.as_ref().unwrap().timestamp, "10:10");
        // Two legs of 0.01 degrees latitude, ~1111.95 m each
        assert!((summary.total_distance_m - 2223.9).abs() < 0.1);
        assert_eq!(summary.record().device_id, "dev001");
    }

    #[test]
    fn test_summary_record_defaults_distance() {
        let record: SummaryRecord = serde_json::from_str(r#"{"device_id": "dev004"}"#).unwrap();
        assert_eq!(record, SummaryRecord::zero("dev004"));
    }
}
