//! Per-device running statistics.
//!
//! Every mutation goes through one of three operations:
//! - [`DeviceAggregateStore::seed_count`] (batch load)
//! - [`DeviceAggregateStore::seed_distance`] (precomputed summary)
//! - [`DeviceAggregateStore::record_live_observation`] (live feed)
//!
//! Distance only ever accumulates on live observations that follow a known
//! last position; seeding never touches `last_position`.

use std::collections::{BTreeMap, HashMap};

use log::debug;
use serde::{Deserialize, Serialize};

use crate::geo_utils::haversine_distance;
use crate::{DeviceId, LocationPoint};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Running statistics for one device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceAggregate {
    pub device_id: DeviceId,
    pub point_count: u64,
    pub total_distance_m: f64,
    pub last_position: Option<LocationPoint>,
}

impl DeviceAggregate {
    fn new(device_id: &str) -> Self {
        Self {
            device_id: device_id.to_string(),
            point_count: 0,
            total_distance_m: 0.0,
            last_position: None,
        }
    }

    fn observe(&mut self, point: &LocationPoint) {
        self.point_count += 1;
        if let Some(last) = &self.last_position {
            self.total_distance_m += haversine_distance(&last.position(), &point.position());
        }
        self.last_position = Some(point.clone());
    }

    pub fn summary(&self) -> AggregateSummary {
        AggregateSummary {
            count: self.point_count,
            total_distance_m: self.total_distance_m,
        }
    }
}

/// What the rendering layer sees for a device.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AggregateSummary {
    pub count: u64,
    pub total_distance_m: f64,
}

/// Keyed store of device aggregates. Devices are created on first
/// observation and never removed during a session (only [`clear`]).
///
/// [`clear`]: DeviceAggregateStore::clear
#[derive(Debug, Default, Clone)]
pub struct DeviceAggregateStore {
    aggregates: HashMap<DeviceId, DeviceAggregate>,
}

impl DeviceAggregateStore {
    pub fn new() -> Self {
        Self {
            aggregates: HashMap::new(),
        }
    }

    fn entry(&mut self, device_id: &str) -> &mut DeviceAggregate {
        self.aggregates
            .entry(device_id.to_string())
            .or_insert_with(|| DeviceAggregate::new(device_id))
    }

    /// Set the point count for a device, overwriting any previous value.
    pub fn seed_count(&mut self, device_id: &str, count: u64) {
        self.entry(device_id).point_count = count;
    }

    /// Set the cumulative distance for a device, overwriting any previous value.
    ///
    /// Negative or non-finite values are stored as 0.
    pub fn seed_distance(&mut self, device_id: &str, total_distance_m: f64) {
        let distance = if total_distance_m.is_finite() && total_distance_m > 0.0 {
            total_distance_m
        } else {
            0.0
        };
        self.entry(device_id).total_distance_m = distance;
    }

    /// Apply one live observation: count it, add the leg from the previous
    /// position (if any), and remember this point as the latest position.
    pub fn record_live_observation(&mut self, point: &LocationPoint) {
        let aggregate = self.entry(&point.device_id);
        aggregate.observe(point);
        debug!(
            "[Aggregates] {} -> count={} distance={:.1}m",
            point.device_id, aggregate.point_count, aggregate.total_distance_m
        );
    }

    /// Apply a batch of live observations.
    ///
    /// Points are split into per-device runs that keep their arrival order;
    /// each run is folded into a copy of the device's aggregate, and the
    /// copies replace the stored aggregates once every run is done.
    pub fn record_live_batch(&mut self, points: &[LocationPoint]) {
        let mut runs: HashMap<&str, Vec<&LocationPoint>> = HashMap::new();
        for point in points {
            runs.entry(point.device_id.as_str()).or_default().push(point);
        }

        let work: Vec<(DeviceAggregate, Vec<&LocationPoint>)> = runs
            .into_iter()
            .map(|(device_id, run)| {
                let current = self
                    .aggregates
                    .get(device_id)
                    .cloned()
                    .unwrap_or_else(|| DeviceAggregate::new(device_id));
                (current, run)
            })
            .collect();

        #[cfg(feature = "parallel")]
        let folded: Vec<DeviceAggregate> = work.into_par_iter().map(fold_run).collect();

        #[cfg(not(feature = "parallel"))]
        let folded: Vec<DeviceAggregate> = work.into_iter().map(fold_run).collect();

        for aggregate in folded {
            self.aggregates.insert(aggregate.device_id.clone(), aggregate);
        }
    }

    pub fn get(&self, device_id: &str) -> Option<&DeviceAggregate> {
        self.aggregates.get(device_id)
    }

    /// Point count for a device (0 if never observed).
    pub fn point_count(&self, device_id: &str) -> u64 {
        self.aggregates.get(device_id).map_or(0, |a| a.point_count)
    }

    /// Cumulative distance for a device in meters (0 if never observed).
    pub fn total_distance(&self, device_id: &str) -> f64 {
        self.aggregates
            .get(device_id)
            .map_or(0.0, |a| a.total_distance_m)
    }

    pub fn contains(&self, device_id: &str) -> bool {
        self.aggregates.contains_key(device_id)
    }

    pub fn len(&self) -> usize {
        self.aggregates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.aggregates.is_empty()
    }

    /// Owned, device-ordered copy of the counts and distances.
    pub fn snapshot(&self) -> BTreeMap<DeviceId, AggregateSummary> {
        self.aggregates
            .iter()
            .map(|(id, a)| (id.clone(), a.summary()))
            .collect()
    }

    pub fn clear(&mut self) {
        self.aggregates.clear();
    }
}

fn fold_run((mut aggregate, run): (DeviceAggregate, Vec<&LocationPoint>)) -> DeviceAggregate {
    for point in run {
        aggregate.observe(point);
    }
    aggregate
}
