//! Equidistant cylindrical (equirectangular) projection.
//!
//! The native projection of most planetary mosaics, e.g. the HiRISE and CTX
//! products distributed in `IAU_2015:49910`.
//!
//! - `x = R * (lon - lon0) * cos(lat_ts)`
//! - `y = R * lat`

use crate::geographic::longitude_offset;

/// Equirectangular projection parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Equirectangular {
    /// Sphere radius (meters)
    pub radius: f64,
    /// Central meridian (degrees)
    pub center_lon: f64,
    /// Latitude of true scale (degrees)
    pub standard_parallel: f64,
    cos_lat_ts: f64,
}

impl Equirectangular {
    pub fn new(radius: f64, center_lon: f64, standard_parallel: f64) -> Self {
        Self {
            radius,
            center_lon,
            standard_parallel,
            cos_lat_ts: standard_parallel.to_radians().cos(),
        }
    }

    /// Convert geographic coordinates (degrees) to projected meters.
    pub fn forward(&self, lon_deg: f64, lat_deg: f64) -> (f64, f64) {
        let x = self.radius * longitude_offset(lon_deg, self.center_lon).to_radians() * self.cos_lat_ts;
        let y = self.radius * lat_deg.to_radians();
        (x, y)
    }

    /// Convert projected meters to geographic coordinates (degrees).
    ///
    /// Returns None for latitudes beyond the poles.
    pub fn inverse(&self, x: f64, y: f64) -> Option<(f64, f64)> {
        let lat = (y / self.radius).to_degrees();
        if lat.abs() > 90.0 + 1e-9 {
            return None;
        }
        let lon = (x / (self.radius * self.cos_lat_ts)).to_degrees() + self.center_lon;
        Some((lon, lat.clamp(-90.0, 90.0)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MARS: f64 = 3_396_190.0;

    #[test]
    fn test_one_degree_at_equator() {
        let eqc = Equirectangular::new(MARS, 0.0, 0.0);
        let (x, y) = eqc.forward(1.0, 1.0);
        let meters_per_degree = MARS * std::f64::consts::PI / 180.0;
        assert!((x - meters_per_degree).abs() < 1e-6);
        assert!((y - meters_per_degree).abs() < 1e-6);
    }

    #[test]
    fn test_standard_parallel_shrinks_x() {
        let eqc = Equirectangular::new(MARS, 0.0, 60.0);
        let (x, _) = eqc.forward(10.0, 0.0);
        let (x0, _) = Equirectangular::new(MARS, 0.0, 0.0).forward(10.0, 0.0);
        assert!((x - x0 * 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_roundtrip_with_center() {
        let eqc = Equirectangular::new(MARS, 180.0, 15.0);
        let (x, y) = eqc.forward(137.4, -5.4);
        let (lon, lat) = eqc.inverse(x, y).unwrap();
        assert!((lon - 137.4).abs() < 1e-9);
        assert!((lat + 5.4).abs() < 1e-9);
    }

    #[test]
    fn test_inverse_rejects_beyond_pole() {
        let eqc = Equirectangular::new(MARS, 0.0, 0.0);
        assert!(eqc.inverse(0.0, MARS * 2.0).is_none());
    }
}
