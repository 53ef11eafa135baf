//! Spherical Mercator projection.
//!
//! The projection used by slippy-map tiles. On a sphere of radius `R`:
//!
//! - `x = R * (lon - lon0)`
//! - `y = R * ln(tan(pi/4 + lat/2))`
//!
//! Latitudes are clipped to ±85.0511° so the world is a square of side
//! `2 * pi * R`.

use crate::geographic::longitude_offset;
use std::f64::consts::{FRAC_PI_2, FRAC_PI_4};

/// Latitude at which the Mercator world becomes square.
pub const MAX_LATITUDE: f64 = 85.051_128_779_806_59;

/// Spherical Mercator projection parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Mercator {
    /// Sphere radius (meters)
    pub radius: f64,
    /// Central meridian (degrees)
    pub center_lon: f64,
}

impl Mercator {
    pub fn new(radius: f64, center_lon: f64) -> Self {
        Self { radius, center_lon }
    }

    /// Convert geographic coordinates (degrees) to projected meters.
    ///
    /// Latitudes beyond [`MAX_LATITUDE`] are clamped onto the world edge.
    pub fn forward(&self, lon_deg: f64, lat_deg: f64) -> (f64, f64) {
        let lat = lat_deg.clamp(-MAX_LATITUDE, MAX_LATITUDE).to_radians();
        let x = self.radius * longitude_offset(lon_deg, self.center_lon).to_radians();
        let y = self.radius * (FRAC_PI_4 + lat / 2.0).tan().ln();
        (x, y)
    }

    /// Convert projected meters to geographic coordinates (degrees).
    pub fn inverse(&self, x: f64, y: f64) -> (f64, f64) {
        let lon = (x / self.radius).to_degrees() + self.center_lon;
        let lat = 2.0 * (y / self.radius).exp().atan() - FRAC_PI_2;
        (lon, lat.to_degrees())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    const EARTH: f64 = 6_378_137.0;
    const MARS: f64 = 3_396_190.0;

    #[test]
    fn test_web_mercator_known_point() {
        let merc = Mercator::new(EARTH, 0.0);
        let (x, y) = merc.forward(-75.0, 40.0);
        assert!((x - (-8_348_961.81)).abs() < 0.1, "x = {}", x);
        assert!((y - 4_865_942.28).abs() < 0.1, "y = {}", y);
    }

    #[test]
    fn test_world_is_square() {
        let merc = Mercator::new(MARS, 0.0);
        let (x, _) = merc.forward(180.0 - 1e-12, 0.0);
        let (_, y) = merc.forward(0.0, MAX_LATITUDE);
        assert!((x - PI * MARS).abs() < 1e-3);
        assert!((y - PI * MARS).abs() < 1e-3);
    }

    #[test]
    fn test_roundtrip() {
        let merc = Mercator::new(MARS, 0.0);
        for &(lon, lat) in &[(77.45, 18.44), (-137.8, -4.6), (0.0, 0.0), (179.9, -80.0)] {
            let (x, y) = merc.forward(lon, lat);
            let (lon2, lat2) = merc.inverse(x, y);
            assert!((lon - lon2).abs() < 1e-9);
            assert!((lat - lat2).abs() < 1e-9);
        }
    }

    #[test]
    fn test_polar_latitudes_clamp() {
        let merc = Mercator::new(MARS, 0.0);
        let (_, y_pole) = merc.forward(0.0, 90.0);
        let (_, y_max) = merc.forward(0.0, MAX_LATITUDE);
        assert_eq!(y_pole, y_max);
    }
}
