//! Geodesy helpers: fixed-point coordinates, haversine, bearings and
//! segment projection.

use geo::{HaversineDistance, Point};
use serde::{Deserialize, Serialize};

/// Fixed-point factor: coordinates are stored in micro-degrees.
pub const COORDINATE_PRECISION: f64 = 1e6;

/// A WGS84 coordinate in fixed-point micro-degrees.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coordinate {
    pub lon: i32,
    pub lat: i32,
}

impl Coordinate {
    pub const INVALID: Coordinate = Coordinate {
        lon: i32::MIN,
        lat: i32::MIN,
    };

    pub fn new(lon: i32, lat: i32) -> Self {
        Self { lon, lat }
    }

    pub fn from_degrees(lon: f64, lat: f64) -> Self {
        Self {
            lon: (lon * COORDINATE_PRECISION).round() as i32,
            lat: (lat * COORDINATE_PRECISION).round() as i32,
        }
    }

    #[inline]
    pub fn lon_deg(&self) -> f64 {
        self.lon as f64 / COORDINATE_PRECISION
    }

    #[inline]
    pub fn lat_deg(&self) -> f64 {
        self.lat as f64 / COORDINATE_PRECISION
    }

    pub fn is_valid(&self) -> bool {
        *self != Coordinate::INVALID
            && self.lat_deg().abs() <= 90.0
            && self.lon_deg().abs() <= 180.0
    }
}

/// Great-circle distance in meters.
pub fn haversine_m(a: Coordinate, b: Coordinate) -> f64 {
    let pa = Point::new(a.lon_deg(), a.lat_deg());
    let pb = Point::new(b.lon_deg(), b.lat_deg());
    pa.haversine_distance(&pb)
}

/// Initial bearing from `a` to `b` in degrees, [0, 360).
pub fn bearing_deg(a: Coordinate, b: Coordinate) -> f64 {
    let lat1 = a.lat_deg().to_radians();
    let lat2 = b.lat_deg().to_radians();
    let dlon = (b.lon_deg() - a.lon_deg()).to_radians();
    let y = dlon.sin() * lat2.cos();
    let x = lat1.cos() * lat2.sin() - lat1.sin() * lat2.cos() * dlon.cos();
    let deg = y.atan2(x).to_degrees();
    (deg + 360.0) % 360.0
}

/// The bearing pointing the opposite way.
pub fn reverse_bearing(bearing: f64) -> f64 {
    if bearing >= 180.0 {
        bearing - 180.0
    } else {
        bearing + 180.0
    }
}

/// Absolute deviation between two angles on the turn circle, <= 180.
pub fn angular_deviation(a: f64, b: f64) -> f64 {
    let d = (a - b).abs() % 360.0;
    d.min(360.0 - d)
}

/// Whether `bearing` falls inside the window `center +/- range` mod 360.
pub fn bearing_in_window(bearing: f64, center: f64, range: f64) -> bool {
    angular_deviation(bearing, center) <= range
}

/// Angle at `at` for the polyline first -> at -> second, in (0, 360).
/// 180 is straight through, smaller is a right-hand deviation.
pub fn compute_angle(first: Coordinate, at: Coordinate, second: Coordinate) -> f64 {
    let entry = bearing_deg(first, at);
    let exit = bearing_deg(at, second);
    turn_angle(entry, exit)
}

/// Translate an entry/exit bearing pair to a turn angle on the turn circle.
pub fn turn_angle(entry_bearing: f64, exit_bearing: f64) -> f64 {
    let offset = 360.0 - entry_bearing;
    let rotated_exit = {
        let b = exit_bearing + offset;
        if b > 360.0 {
            b - 360.0
        } else {
            b
        }
    };
    let angle = 540.0 - rotated_exit;
    if angle > 360.0 {
        angle - 360.0
    } else {
        angle
    }
}

/// Project `point` onto the segment `a`-`b`, flat-earth locally.
/// Returns the projected coordinate, the ratio along `a`->`b` in [0, 1]
/// and the great-circle distance from `point` to the projection.
pub fn project_onto_segment(point: Coordinate, a: Coordinate, b: Coordinate) -> (Coordinate, f64, f64) {
    // Scale longitudes by cos(lat) so one unit is comparable in both axes.
    let lat_scale = (point.lat_deg().to_radians()).cos().max(1e-6);
    let px = point.lon_deg() * lat_scale;
    let py = point.lat_deg();
    let ax = a.lon_deg() * lat_scale;
    let ay = a.lat_deg();
    let bx = b.lon_deg() * lat_scale;
    let by = b.lat_deg();

    let dx = bx - ax;
    let dy = by - ay;
    let len2 = dx * dx + dy * dy;
    let ratio = if len2 <= f64::EPSILON {
        0.0
    } else {
        (((px - ax) * dx + (py - ay) * dy) / len2).clamp(0.0, 1.0)
    };

    let proj = Coordinate::from_degrees(
        a.lon_deg() + (b.lon_deg() - a.lon_deg()) * ratio,
        a.lat_deg() + (b.lat_deg() - a.lat_deg()) * ratio,
    );
    let dist = haversine_m(point, proj);
    (proj, ratio, dist)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bearings_of_cardinal_moves() {
        let origin = Coordinate::from_degrees(0.0, 0.0);
        let north = Coordinate::from_degrees(0.0, 0.1);
        let east = Coordinate::from_degrees(0.1, 0.0);
        assert!(bearing_deg(origin, north).abs() < 0.5);
        assert!((bearing_deg(origin, east) - 90.0).abs() < 0.5);
        assert!((reverse_bearing(0.0) - 180.0).abs() < f64::EPSILON);
    }

    #[test]
    fn turn_angle_straight_is_180() {
        assert!((turn_angle(0.0, 0.0) - 180.0).abs() < 1e-9);
        // north then east: a right turn, angle below 180
        let angle = turn_angle(0.0, 90.0);
        assert!((angle - 90.0).abs() < 1e-9);
        // north then west: a left turn
        let angle = turn_angle(0.0, 270.0);
        assert!((angle - 270.0).abs() < 1e-9);
    }

    #[test]
    fn projection_clamps_to_endpoints() {
        let a = Coordinate::from_degrees(0.0, 0.0);
        let b = Coordinate::from_degrees(0.01, 0.0);
        let behind = Coordinate::from_degrees(-0.01, 0.001);
        let (proj, ratio, _) = project_onto_segment(behind, a, b);
        assert_eq!(ratio, 0.0);
        assert_eq!(proj, a);

        let mid = Coordinate::from_degrees(0.005, 0.001);
        let (_, ratio, dist) = project_onto_segment(mid, a, b);
        assert!((ratio - 0.5).abs() < 0.01);
        assert!(dist > 100.0 && dist < 120.0);
    }

    #[test]
    fn angular_deviation_wraps() {
        assert!((angular_deviation(350.0, 10.0) - 20.0).abs() < 1e-9);
        assert!(bearing_in_window(355.0, 0.0, 10.0));
        assert!(!bearing_in_window(90.0, 0.0, 10.0));
    }
}
