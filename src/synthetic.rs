//! Synthetic fleet generator for tests and benchmarks.
//!
//! Produces a time-ordered stream of location records for a fleet of
//! devices doing a bounded random walk: each device starts at a uniform
//! position in a box and then moves by a uniform step of at most
//! `step_degrees` per axis per tick, clamped to the box.
//!
//! Feature-gated behind `synthetic`.
//!
//! # Example
//!
//! ```rust
//! use fleet_tracker::synthetic::FleetScenario;
//!
//! let scenario = FleetScenario { ticks: 10, ..FleetScenario::default() };
//! let records = scenario.generate();
//! assert_eq!(records.len(), 5 * 10);
//! assert!(records.iter().all(|r| r.to_point().is_ok()));
//! ```

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::{Bounds, LocationRecord};

/// Scenario configuration for generating a synthetic fleet.
#[derive(Debug, Clone)]
pub struct FleetScenario {
    pub device_ids: Vec<String>,
    /// Box every position stays inside
    pub bounds: Bounds,
    /// Maximum per-axis move per tick, in degrees
    pub step_degrees: f64,
    /// Number of rounds; every device reports once per round
    pub ticks: usize,
    /// Seconds between rounds, used to build timestamps
    pub interval_secs: u64,
    /// Unix time of the first round
    pub start_epoch_secs: u64,
    /// RNG seed for deterministic reproduction
    pub seed: u64,
}

impl Default for FleetScenario {
    fn default() -> Self {
        Self {
            device_ids: (1..=5).map(|i| format!("dev{:03}", i)).collect(),
            bounds: Bounds {
                min_lat: 39.85,
                max_lat: 39.98,
                min_lng: 32.75,
                max_lng: 32.95,
            },
            step_degrees: 0.001,
            ticks: 100,
            interval_secs: 5,
            start_epoch_secs: 1_770_026_400,
            seed: 42,
        }
    }
}

impl FleetScenario {
    /// Scenario with `device_count` devices named `dev001`, `dev002`, ...
    pub fn with_devices(device_count: usize, ticks: usize) -> Self {
        Self {
            device_ids: (1..=device_count).map(|i| format!("dev{:03}", i)).collect(),
            ticks,
            ..Self::default()
        }
    }

    /// Generate records in report order: round by round, devices in order.
    pub fn generate(&self) -> Vec<LocationRecord> {
        let mut rng = StdRng::seed_from_u64(self.seed);
        let b = &self.bounds;
        let mut positions: Vec<Option<(f64, f64)>> = vec![None; self.device_ids.len()];
        let mut records = Vec::with_capacity(self.device_ids.len() * self.ticks);

        for tick in 0..self.ticks {
            let timestamp = (self.start_epoch_secs + tick as u64 * self.interval_secs).to_string();

            for (device_id, position) in self.device_ids.iter().zip(positions.iter_mut()) {
                let (lat, lng) = match *position {
                    None => (
                        rng.gen_range(b.min_lat..=b.max_lat),
                        rng.gen_range(b.min_lng..=b.max_lng),
                    ),
                    Some((lat, lng)) => (
                        (lat + rng.gen_range(-self.step_degrees..=self.step_degrees))
                            .clamp(b.min_lat, b.max_lat),
                        (lng + rng.gen_range(-self.step_degrees..=self.step_degrees))
                            .clamp(b.min_lng, b.max_lng),
                    ),
                };
                let (lat, lng) = (round6(lat), round6(lng));
                *position = Some((lat, lng));
                records.push(LocationRecord::new(device_id, &timestamp, lat, lng));
            }
        }

        records
    }
}

fn round6(value: f64) -> f64 {
    (value * 1e6).round() / 1e6
}
