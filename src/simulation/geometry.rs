//! Geometry helpers for range checks.
//!
//! Contains helper functions for:
//! - Squared Euclidean distance (no sqrt, for comparisons)
//! - Euclidean distance rounded the way the range test sees it
//! - The range predicate used by the connectivity graph

use super::types::Position;

/// Squared Euclidean distance between two 3D points.
///
/// Comparing d1² against d2² avoids a square root when only the ordering of
/// two distances matters.
pub fn distance2(a: &Position, b: &Position) -> f64 {
    let dx = a.x - b.x;
    let dy = a.y - b.y;
    let dz = a.z - b.z;
    dx * dx + dy * dy + dz * dz
}

/// Euclidean distance rounded to centimeters.
///
/// Rounding keeps repeated evaluations of the same pair stable when positions
/// are written with floating point noise, so an edge sitting exactly on the
/// range boundary does not flap.
pub fn distance(a: &Position, b: &Position) -> f64 {
    (distance2(a, b).sqrt() * 100.0).round() / 100.0
}

/// True when `distance` is inside `range` (boundary inclusive).
pub fn within_range(distance: f64, range: f64) -> bool {
    distance <= range
}
