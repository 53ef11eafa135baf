//! Coordinate Reference System types and utilities.
//!
//! All supported systems are defined on a sphere. The radius is part of the
//! CRS so the same code serves Earth and other bodies (Mars by default).

use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use std::fmt;

/// Mean equatorial radius of Mars used by the IAU 2015 Mars CRS family.
pub const MARS_RADIUS_M: f64 = 3_396_190.0;

/// Sphere radius used by EPSG:3857 and friends.
pub const EARTH_RADIUS_M: f64 = 6_378_137.0;

/// Projection families supported by the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrsCode {
    /// Longitude/latitude in degrees.
    Geographic,
    /// Equidistant cylindrical (plate carrée with optional standard parallel), meters.
    Equirectangular,
    /// Spherical Mercator, meters.
    Mercator,
}

impl CrsCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            CrsCode::Geographic => "geographic",
            CrsCode::Equirectangular => "equirectangular",
            CrsCode::Mercator => "mercator",
        }
    }
}

/// Full CRS definition with projection parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Crs {
    pub code: CrsCode,
    /// Sphere radius in meters.
    pub radius: f64,
    /// Central meridian in degrees.
    #[serde(default)]
    pub center_lon: f64,
    /// Latitude of true scale in degrees (equirectangular only).
    #[serde(default)]
    pub standard_parallel: f64,
}

impl Crs {
    pub fn new(code: CrsCode, radius: f64) -> Self {
        Self {
            code,
            radius,
            center_lon: 0.0,
            standard_parallel: 0.0,
        }
    }

    pub fn geographic(radius: f64) -> Self {
        Self::new(CrsCode::Geographic, radius)
    }

    pub fn mercator(radius: f64) -> Self {
        Self::new(CrsCode::Mercator, radius)
    }

    pub fn equirectangular(radius: f64, center_lon: f64, standard_parallel: f64) -> Self {
        Self {
            code: CrsCode::Equirectangular,
            radius,
            center_lon,
            standard_parallel,
        }
    }

    /// Parse a CRS identifier.
    ///
    /// Accepts formats like:
    /// - "EPSG:4326", "CRS:84" (Earth geographic)
    /// - "EPSG:3857", "EPSG:900913" (Earth spherical Mercator)
    /// - "EPSG:4087", "EPSG:32662" (Earth equirectangular)
    /// - "IAU_2015:49900", "IAU2000:49900" (Mars geographic)
    /// - "IAU_2015:49910", "IAU2000:49910" (Mars equirectangular)
    /// - "MERCATOR", "EQUIRECTANGULAR", "GEOGRAPHIC" (Mars sphere unless overridden)
    pub fn from_identifier(s: &str) -> Result<Self, CrsParseError> {
        let normalized = s.trim().to_uppercase();

        match normalized.as_str() {
            "EPSG:4326" | "CRS:84" | "OGC:CRS84" => Ok(Crs::geographic(EARTH_RADIUS_M)),
            "EPSG:3857" | "EPSG:900913" => Ok(Crs::mercator(EARTH_RADIUS_M)),
            "EPSG:4087" | "EPSG:32662" => Ok(Crs::equirectangular(EARTH_RADIUS_M, 0.0, 0.0)),
            "IAU_2015:49900" | "IAU2000:49900" | "GEOGRAPHIC" => {
                Ok(Crs::geographic(MARS_RADIUS_M))
            }
            "IAU_2015:49910" | "IAU2000:49910" | "EQUIRECTANGULAR" => {
                Ok(Crs::equirectangular(MARS_RADIUS_M, 0.0, 0.0))
            }
            "MERCATOR" => Ok(Crs::mercator(MARS_RADIUS_M)),
            _ => Err(CrsParseError::UnsupportedCrs(s.to_string())),
        }
    }

    /// Same projection on a sphere of a different radius.
    pub fn with_radius(mut self, radius: f64) -> Self {
        self.radius = radius;
        self
    }

    /// Check if this is a geographic (lat/lon) CRS.
    pub fn is_geographic(&self) -> bool {
        self.code == CrsCode::Geographic
    }

    /// Half the circumference of the sphere, the Mercator world half-width.
    pub fn half_circumference(&self) -> f64 {
        PI * self.radius
    }

    /// Get the valid bounds for this CRS.
    pub fn valid_bounds(&self) -> crate::BoundingBox {
        use crate::BoundingBox;

        match self.code {
            CrsCode::Geographic => BoundingBox::new(-180.0, -90.0, 180.0, 90.0),
            CrsCode::Mercator => {
                let max_extent = self.half_circumference();
                BoundingBox::new(-max_extent, -max_extent, max_extent, max_extent)
            }
            CrsCode::Equirectangular => {
                let half_x = self.half_circumference() * self.standard_parallel.to_radians().cos();
                let half_y = self.half_circumference() / 2.0;
                BoundingBox::new(-half_x, -half_y, half_x, half_y)
            }
        }
    }
}

impl fmt::Display for Crs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.center_lon == 0.0 && self.standard_parallel == 0.0 {
            if self.radius == EARTH_RADIUS_M {
                let code = match self.code {
                    CrsCode::Geographic => "EPSG:4326",
                    CrsCode::Mercator => "EPSG:3857",
                    CrsCode::Equirectangular => "EPSG:4087",
                };
                return write!(f, "{}", code);
            }
            if self.radius == MARS_RADIUS_M && self.code != CrsCode::Mercator {
                let code = match self.code {
                    CrsCode::Geographic => "IAU_2015:49900",
                    _ => "IAU_2015:49910",
                };
                return write!(f, "{}", code);
            }
        }
        write!(
            f,
            "{}(R={}, lon0={}, lat_ts={})",
            self.code.as_str(),
            self.radius,
            self.center_lon,
            self.standard_parallel
        )
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CrsParseError {
    #[error("Unsupported CRS: {0}")]
    UnsupportedCrs(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_identifiers() {
        assert_eq!(
            Crs::from_identifier("epsg:3857").unwrap(),
            Crs::mercator(EARTH_RADIUS_M)
        );
        assert_eq!(
            Crs::from_identifier("IAU2000:49900").unwrap(),
            Crs::geographic(MARS_RADIUS_M)
        );
        assert_eq!(
            Crs::from_identifier("mercator").unwrap().radius,
            MARS_RADIUS_M
        );
        assert!(Crs::from_identifier("EPSG:32633").is_err());
    }

    #[test]
    fn test_display_roundtrips_known_codes() {
        for id in ["EPSG:4326", "EPSG:3857", "EPSG:4087", "IAU_2015:49900", "IAU_2015:49910"] {
            let crs = Crs::from_identifier(id).unwrap();
            assert_eq!(crs.to_string(), id);
        }
        let mars_merc = Crs::mercator(MARS_RADIUS_M);
        assert!(mars_merc.to_string().starts_with("mercator(R=3396190"));
    }

    #[test]
    fn test_mercator_bounds_scale_with_radius() {
        let bounds = Crs::mercator(MARS_RADIUS_M).valid_bounds();
        assert!((bounds.max_x - PI * MARS_RADIUS_M).abs() < 1e-6);
        assert_eq!(bounds.max_x, bounds.max_y);
    }
}
