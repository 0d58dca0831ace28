//! Marker clustering.
//!
//! Greedy single-pass grouping by screen distance:
//! 1. Walk markers in the order given (callers supply a stable order)
//! 2. Project each marker to Web Mercator pixels at the configured zoom
//! 3. Join the nearest existing cluster whose representative point is closer
//!    than `distance` pixels (ties go to the older cluster)
//! 4. Otherwise open a new cluster with this marker as its representative
//!
//! The result depends on iteration order and is not an optimal partition.
//! It reproduces the fixed-pixel-distance grouping the map layer has always
//! used, which is what users expect to see.

use rstar::primitives::GeomWithData;
use rstar::{PointDistance, RTree};
use serde::{Deserialize, Serialize};

use crate::error::{FleetError, Result};
use crate::geo_utils::{compute_bounds, compute_center, project_to_pixels};
use crate::styles::{DisplayStyle, StyleConfig};
use crate::{Bounds, DeviceId, GpsPoint, Marker};

/// Representative point of a cluster in pixel space, tagged with its index.
type Anchor = GeomWithData<[f64; 2], usize>;

/// Configuration for marker clustering.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Grouping distance in pixels at `zoom`. 0 disables grouping.
    /// Default: 40.0
    pub distance: f64,

    /// Map zoom level the pixel distance is measured at.
    /// Default: 8.0
    pub zoom: f64,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            distance: 40.0,
            zoom: 8.0,
        }
    }
}

impl ClusterConfig {
    pub fn new(distance: f64, zoom: f64) -> Self {
        Self { distance, zoom }
    }

    /// Distance must be finite and non-negative, zoom within 0..=24.
    pub fn validate(&self) -> Result<()> {
        if !self.distance.is_finite() || self.distance < 0.0 {
            return Err(FleetError::Config {
                message: format!(
                    "cluster distance must be a non-negative number, got {}",
                    self.distance
                ),
            });
        }
        if !self.zoom.is_finite() || !(0.0..=24.0).contains(&self.zoom) {
            return Err(FleetError::Config {
                message: format!("zoom must be between 0 and 24, got {}", self.zoom),
            });
        }
        Ok(())
    }

    fn groups(&self) -> bool {
        self.distance.is_finite() && self.distance > 0.0
    }
}

/// A visual group of markers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cluster {
    /// Device whose color the cluster takes (most members, first seen on ties)
    pub representative_device_id: Option<DeviceId>,
    pub member_count: usize,
    /// Marker ids in the order they joined
    pub member_ids: Vec<String>,
    /// Position of the first member; distances are measured from here
    pub anchor: GpsPoint,
    /// Mean position of all members
    pub center: GpsPoint,
    /// Extent of all members
    pub bounds: Bounds,
    pub style: DisplayStyle,
}

/// Accumulates one cluster during the pass.
struct ClusterBuilder<'a> {
    members: Vec<&'a Marker>,
    /// Device tallies in first-seen order
    device_counts: Vec<(&'a str, usize)>,
}

impl<'a> ClusterBuilder<'a> {
    fn new(first: &'a Marker) -> Self {
        Self {
            members: vec![first],
            device_counts: vec![(first.device_id(), 1)],
        }
    }

    fn push(&mut self, marker: &'a Marker) {
        self.members.push(marker);
        match self
            .device_counts
            .iter_mut()
            .find(|(id, _)| *id == marker.device_id())
        {
            Some((_, count)) => *count += 1,
            None => self.device_counts.push((marker.device_id(), 1)),
        }
    }

    fn representative(&self) -> Option<&'a str> {
        let mut best: Option<(&'a str, usize)> = None;
        for &(id, count) in &self.device_counts {
            // Strictly greater keeps the first-seen device on ties
            if best.map_or(true, |(_, best_count)| count > best_count) {
                best = Some((id, count));
            }
        }
        best.map(|(id, _)| id)
    }

    fn build(self, styles: &StyleConfig) -> Cluster {
        let positions: Vec<GpsPoint> = self.members.iter().map(|m| m.position()).collect();
        let anchor = positions[0];
        let representative = self.representative();
        let member_count = self.members.len();

        let style = if member_count == 1 {
            styles.marker_style(self.members[0].device_id())
        } else {
            styles.cluster_style(representative, member_count)
        };

        Cluster {
            representative_device_id: representative.map(str::to_string),
            member_count,
            member_ids: self.members.iter().map(|m| m.id.clone()).collect(),
            anchor,
            center: compute_center(&positions),
            bounds: compute_bounds(&positions).unwrap_or(Bounds {
                min_lat: anchor.latitude,
                max_lat: anchor.latitude,
                min_lng: anchor.longitude,
                max_lng: anchor.longitude,
            }),
            style,
        }
    }
}

/// Group markers into clusters.
///
/// Markers are visited in slice order. Empty input gives no clusters.
///
/// # Example
/// ```
/// use fleet_tracker::{cluster_markers, ClusterConfig, LocationPoint, Marker, StyleConfig};
///
/// let markers: Vec<Marker> = [(29.0, 41.0), (29.0001, 41.0001), (35.0, 30.0)]
///     .iter()
///     .enumerate()
///     .map(|(i, &(lat, lng))| {
///         Marker::initial(LocationPoint::new("dev001", "", lat, lng).unwrap(), i)
///     })
///     .collect();
///
/// let clusters = cluster_markers(&markers, &ClusterConfig::default(), &StyleConfig::default());
/// assert_eq!(clusters.len(), 2);
/// assert_eq!(clusters[0].member_count, 2);
/// ```
pub fn cluster_markers(
    markers: &[Marker],
    config: &ClusterConfig,
    styles: &StyleConfig,
) -> Vec<Cluster> {
    if markers.is_empty() {
        return Vec::new();
    }

    let mut builders: Vec<ClusterBuilder> = Vec::new();

    if !config.groups() {
        builders.extend(markers.iter().map(ClusterBuilder::new));
    } else {
        let threshold_2 = config.distance * config.distance;
        let mut anchors: RTree<Anchor> = RTree::new();

        for marker in markers {
            let pixel = project_to_pixels(&marker.position(), config.zoom);

            let nearest = anchors
                .locate_within_distance(pixel, threshold_2)
                .map(|anchor| (anchor.distance_2(&pixel), anchor.data))
                .filter(|&(d2, _)| d2 < threshold_2)
                .min_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));

            match nearest {
                Some((_, index)) => builders[index].push(marker),
                None => {
                    anchors.insert(Anchor::new(pixel, builders.len()));
                    builders.push(ClusterBuilder::new(marker));
                }
            }
        }
    }

    builders.into_iter().map(|b| b.build(styles)).collect()
}

/// Clustering settings for the current session. Clusters are never cached;
/// every [`recompute`](Self::recompute) starts from scratch.
#[derive(Debug, Clone, Default)]
pub struct ClusterIndex {
    config: ClusterConfig,
}

impl ClusterIndex {
    pub fn new(config: ClusterConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ClusterConfig {
        &self.config
    }

    /// Change the grouping distance/zoom. Rejects values that
    /// [`ClusterConfig::validate`] rejects and keeps the previous config.
    pub fn set_config(&mut self, config: ClusterConfig) -> Result<()> {
        config.validate()?;
        self.config = config;
        Ok(())
    }

    /// Cluster a marker set with the current config.
    pub fn recompute(&self, markers: &[Marker], styles: &StyleConfig) -> Vec<Cluster> {
        cluster_markers(markers, &self.config, styles)
    }
}
