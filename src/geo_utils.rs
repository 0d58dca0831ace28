//! Geographic utilities: distance, bounds, center, and map projection.
//!
//! All inputs are in degrees. Nothing here validates coordinates; callers
//! filter with [`GpsPoint::is_valid`] before points reach these functions.

use geo::{BoundingRect, Centroid, MultiPoint, Point};

use crate::{Bounds, GpsPoint};

/// Earth radius in meters used by the haversine formula.
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Web Mercator tile size in pixels at zoom 0.
pub const TILE_SIZE: f64 = 256.0;

/// Latitude limit of the Web Mercator projection.
pub const MAX_MERCATOR_LAT: f64 = 85.051_128_78;

/// Great-circle distance between two points in meters (haversine formula).
///
/// Symmetric, and exactly 0 for identical points.
///
/// # Example
/// ```
/// use fleet_tracker::GpsPoint;
/// use fleet_tracker::geo_utils::haversine_distance;
///
/// let istanbul = GpsPoint::new(41.0082, 28.9784);
/// let ankara = GpsPoint::new(39.9334, 32.8597);
/// let d = haversine_distance(&istanbul, &ankara);
/// assert!((d - 350_000.0).abs() < 5_000.0);
/// ```
pub fn haversine_distance(p1: &GpsPoint, p2: &GpsPoint) -> f64 {
    let phi1 = p1.latitude.to_radians();
    let phi2 = p2.latitude.to_radians();
    let d_phi = (p2.latitude - p1.latitude).to_radians();
    let d_lambda = (p2.longitude - p1.longitude).to_radians();

    let a = (d_phi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    // Rounding can push `a` a hair past 1 for near-antipodal points
    let a = a.clamp(0.0, 1.0);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
    EARTH_RADIUS_M * c
}

/// Total length of a polyline in meters.
pub fn polyline_length(points: &[GpsPoint]) -> f64 {
    points
        .windows(2)
        .map(|pair| haversine_distance(&pair[0], &pair[1]))
        .sum()
}

fn to_multipoint(points: &[GpsPoint]) -> MultiPoint<f64> {
    points
        .iter()
        .map(|p| Point::new(p.longitude, p.latitude))
        .collect::<Vec<_>>()
        .into()
}

/// Bounding box of a set of points, `None` when empty.
pub fn compute_bounds(points: &[GpsPoint]) -> Option<Bounds> {
    let rect = to_multipoint(points).bounding_rect()?;
    Some(Bounds {
        min_lat: rect.min().y,
        max_lat: rect.max().y,
        min_lng: rect.min().x,
        max_lng: rect.max().x,
    })
}

/// Arithmetic mean of a set of points. Returns (0, 0) when empty.
pub fn compute_center(points: &[GpsPoint]) -> GpsPoint {
    to_multipoint(points)
        .centroid()
        .map(|c| GpsPoint::new(c.y(), c.x()))
        .unwrap_or_else(|| GpsPoint::new(0.0, 0.0))
}

/// Project a point into Web Mercator pixel space at a zoom level.
///
/// The world is `256 * 2^zoom` pixels wide, x grows eastward and y grows
/// southward, matching what a slippy map renders on screen.
pub fn project_to_pixels(point: &GpsPoint, zoom: f64) -> [f64; 2] {
    let world = TILE_SIZE * zoom.exp2();
    let lat = point.latitude.clamp(-MAX_MERCATOR_LAT, MAX_MERCATOR_LAT);
    let sin_lat = lat.to_radians().sin();

    let x = (point.longitude + 180.0) / 360.0 * world;
    let y = (0.5 - ((1.0 + sin_lat) / (1.0 - sin_lat)).ln() / (4.0 * std::f64::consts::PI)) * world;
    [x, y]
}
