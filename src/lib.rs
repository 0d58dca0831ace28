//! # Fleet Tracker
//!
//! Real-time location aggregation and marker clustering for a device map
//! dashboard.
//!
//! This library provides:
//! - Batch ingestion of a historical location snapshot
//! - Live ingestion of location updates with per-device distance accounting
//! - Greedy pixel-distance clustering of the combined marker set
//!
//! ## Features
//!
//! - **`parallel`** - Fold live batches per device in parallel with rayon
//! - **`live`** - Supervised live feed worker with a fixed-delay reconnect loop
//! - **`http`** - HTTP client for batch snapshots and device summaries
//! - **`synthetic`** - Random-walk fleet generator for tests and benchmarks
//! - **`full`** - Enable all features
//!
//! ## Quick Start
//!
//! ```rust
//! use fleet_tracker::{AggregationEngine, LocationRecord};
//!
//! let mut engine = AggregationEngine::new();
//! engine.load_batch(&[
//!     LocationRecord::new("dev001", "2026-02-02T10:00:00", 29.0, 41.0),
//!     LocationRecord::new("dev001", "2026-02-02T10:00:05", 29.01, 41.0),
//!     LocationRecord::new("dev002", "2026-02-02T10:00:00", 29.5, 41.5),
//! ]);
//!
//! engine
//!     .ingest_live(&LocationRecord::new("dev002", "2026-02-02T10:01:00", 29.5, 41.51))
//!     .unwrap();
//!
//! let view = engine.current_view();
//! assert_eq!(view.device_aggregates["dev001"].count, 2);
//! assert_eq!(view.device_aggregates["dev002"].count, 2);
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

// Unified error handling
pub mod error;
pub use error::{FleetError, OptionExt, Result};

// Geographic utilities (distance, bounds, center, projection)
pub mod geo_utils;

// Per-device running statistics
pub mod aggregates;
pub use aggregates::{AggregateSummary, DeviceAggregate, DeviceAggregateStore};

// Injected display attributes per device
pub mod styles;
pub use styles::{DisplayStyle, StyleConfig};

// Greedy marker clustering
pub mod clustering;
pub use clustering::{cluster_markers, Cluster, ClusterConfig, ClusterIndex};

// Track summaries (count, first/last, total distance)
pub mod summary;
pub use summary::{summarize_track, DeviceSummary, SummaryRecord};

// Engine configuration
pub mod config;
pub use config::EngineConfig;

// Live feed message decoding and supervised worker
pub mod feed;
pub use feed::{decode_message, FeedMessage};

// Stateful aggregation engine (singleton with all session state)
pub mod engine;
pub use engine::{
    with_engine, with_engine_read, AggregationEngine, BatchReport, EngineStats, EngineView,
    SharedEngine, ENGINE,
};

// HTTP client for the dashboard API
#[cfg(feature = "http")]
pub mod http;
#[cfg(feature = "http")]
pub use http::DashboardClient;

// Synthetic fleet generator
#[cfg(feature = "synthetic")]
pub mod synthetic;

// ============================================================================
// Core Types
// ============================================================================

/// Opaque device identifier, stable across batch and live data.
pub type DeviceId = String;

/// A GPS coordinate with latitude and longitude in degrees.
///
/// # Example
/// ```
/// use fleet_tracker::GpsPoint;
/// let point = GpsPoint::new(39.9334, 32.8597); // Ankara
/// assert!(point.is_valid());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GpsPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GpsPoint {
    /// Create a new GPS point.
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Check if the point has valid coordinates.
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && self.latitude >= -90.0
            && self.latitude <= 90.0
            && self.longitude >= -180.0
            && self.longitude <= 180.0
    }
}

/// Bounding box of a set of points.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lng: f64,
    pub max_lng: f64,
}

/// A validated location observation for one device.
///
/// The timestamp is kept verbatim; nothing in the engine parses it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationPoint {
    pub device_id: DeviceId,
    pub timestamp: String,
    pub latitude: f64,
    pub longitude: f64,
}

impl LocationPoint {
    /// Build a point, validating device id and coordinates.
    pub fn new(
        device_id: impl Into<String>,
        timestamp: impl Into<String>,
        latitude: f64,
        longitude: f64,
    ) -> Result<Self> {
        let device_id = device_id.into();
        if device_id.is_empty() {
            return Err(FleetError::invalid_location("", "device_id is empty"));
        }
        if !GpsPoint::new(latitude, longitude).is_valid() {
            return Err(FleetError::invalid_location(
                &device_id,
                format!("coordinates out of range: ({}, {})", latitude, longitude),
            ));
        }
        Ok(Self {
            device_id,
            timestamp: timestamp.into(),
            latitude,
            longitude,
        })
    }

    /// The coordinate part of this observation.
    pub fn position(&self) -> GpsPoint {
        GpsPoint::new(self.latitude, self.longitude)
    }
}

/// Raw, unvalidated location record as delivered by the API or the feed.
///
/// Every field is optional and untyped so that a record with, say, a string
/// latitude still decodes and can be rejected per-record instead of failing
/// the whole batch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LocationRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latitude: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub longitude: Option<Value>,
}

impl LocationRecord {
    /// Create a well-typed record.
    pub fn new(device_id: &str, timestamp: &str, latitude: f64, longitude: f64) -> Self {
        Self {
            device_id: Some(Value::from(device_id)),
            timestamp: Some(Value::from(timestamp)),
            latitude: Some(Value::from(latitude)),
            longitude: Some(Value::from(longitude)),
        }
    }

    /// Device id as a string, if present and a string.
    pub fn device_id_str(&self) -> Option<&str> {
        self.device_id.as_ref().and_then(Value::as_str)
    }

    /// Validate into a [`LocationPoint`].
    ///
    /// Rejects a missing or empty device id, and latitude/longitude that are
    /// missing, not JSON numbers, or out of range.
    pub fn to_point(&self) -> Result<LocationPoint> {
        let device_id = self
            .device_id_str()
            .filter(|id| !id.is_empty())
            .ok_or_invalid("", "device_id is missing or not a non-empty string")?;

        let latitude = self
            .latitude
            .as_ref()
            .and_then(Value::as_f64)
            .ok_or_invalid(device_id, "latitude is missing or not a number")?;
        let longitude = self
            .longitude
            .as_ref()
            .and_then(Value::as_f64)
            .ok_or_invalid(device_id, "longitude is missing or not a number")?;

        // Epoch-seconds timestamps (as the ingest pipeline produces) are kept as text
        let timestamp = match &self.timestamp {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Null) | None => String::new(),
            Some(other) => other.to_string(),
        };

        LocationPoint::new(device_id, timestamp, latitude, longitude)
    }
}

impl TryFrom<&LocationRecord> for LocationPoint {
    type Error = FleetError;

    fn try_from(record: &LocationRecord) -> Result<Self> {
        record.to_point()
    }
}

impl From<&LocationPoint> for LocationRecord {
    fn from(point: &LocationPoint) -> Self {
        Self::new(
            &point.device_id,
            &point.timestamp,
            point.latitude,
            point.longitude,
        )
    }
}

/// Where a marker came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarkerOrigin {
    /// Part of the batch snapshot loaded at startup
    Initial,
    /// Latest live position of a device
    Live,
}

/// A positioned point on the map with provenance and a stable identity.
///
/// Live markers are keyed by device id (one per device, replaced in place);
/// initial markers are keyed by device id plus their index in the batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Marker {
    pub id: String,
    pub origin: MarkerOrigin,
    pub point: LocationPoint,
}

impl Marker {
    /// Marker for the `index`-th point of the batch snapshot.
    pub fn initial(point: LocationPoint, index: usize) -> Self {
        Self {
            id: format!("{}#{}", point.device_id, index),
            origin: MarkerOrigin::Initial,
            point,
        }
    }

    /// Live marker for a device.
    pub fn live(point: LocationPoint) -> Self {
        Self {
            id: point.device_id.clone(),
            origin: MarkerOrigin::Live,
            point,
        }
    }

    pub fn device_id(&self) -> &str {
        &self.point.device_id
    }

    pub fn position(&self) -> GpsPoint {
        self.point.position()
    }
}

// ============================================================================
// Tests
// ============================================================================
