use serde::{Deserialize, Serialize};

/// Coordinate reference system, inferred from the key set supplied to the
/// `point()` constructor function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Crs {
    Cartesian,
    Cartesian3D,
    Wgs84,
}

impl Crs {
    pub fn as_str(self) -> &'static str {
        match self {
            Crs::Cartesian => "cartesian",
            Crs::Cartesian3D => "cartesian-3d",
            Crs::Wgs84 => "wgs-84",
        }
    }
}

/// A spatial point. `z`/`height` is only present for the 3-d / geographic
/// variants.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub crs: Crs,
    pub a: f64,
    pub b: f64,
    pub c: Option<f64>,
}

/// Coordinates are never NaN (the `point()` constructor rejects them), so
/// structural equality is sound; needed for `Value`'s derived `Eq`.
impl Eq for Point {}

impl Point {
    pub fn cartesian(x: f64, y: f64) -> Self {
        Point {
            crs: Crs::Cartesian,
            a: x,
            b: y,
            c: None,
        }
    }

    pub fn cartesian_3d(x: f64, y: f64, z: f64) -> Self {
        Point {
            crs: Crs::Cartesian3D,
            a: x,
            b: y,
            c: Some(z),
        }
    }

    pub fn wgs84(latitude: f64, longitude: f64, height: Option<f64>) -> Self {
        Point {
            crs: Crs::Wgs84,
            a: latitude,
            b: longitude,
            c: height,
        }
    }

    /// Euclidean distance; only meaningful between two cartesian(-3d) points
    /// of the same CRS.
    pub fn euclidean_distance(&self, other: &Point) -> f64 {
        let dx = self.a - other.a;
        let dy = self.b - other.b;
        let dz = self.c.unwrap_or(0.0) - other.c.unwrap_or(0.0);
        (dx * dx + dy * dy + dz * dz).sqrt()
    }

    /// Great-circle distance in meters, sphere radius 6,371,000 m.
    pub fn haversine_distance(&self, other: &Point) -> f64 {
        const EARTH_RADIUS_M: f64 = 6_371_000.0;
        let lat1 = self.a.to_radians();
        let lat2 = other.a.to_radians();
        let dlat = (other.a - self.a).to_radians();
        let dlon = (other.b - self.b).to_radians();
        let h = (dlat / 2.0).sin().powi(2)
            + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
        2.0 * EARTH_RADIUS_M * h.sqrt().asin()
    }
}
