//! Conversions between any two supported CRS.

use crate::{Equirectangular, Mercator};
use mosaic_common::{BoundingBox, Crs, CrsCode, GeoTransform};

/// A CRS turned into something that can project and unproject points.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SphereProjection {
    Geographic,
    Mercator(Mercator),
    Equirectangular(Equirectangular),
}

impl SphereProjection {
    pub fn from_crs(crs: &Crs) -> Self {
        match crs.code {
            CrsCode::Geographic => SphereProjection::Geographic,
            CrsCode::Mercator => SphereProjection::Mercator(Mercator::new(crs.radius, crs.center_lon)),
            CrsCode::Equirectangular => SphereProjection::Equirectangular(Equirectangular::new(
                crs.radius,
                crs.center_lon,
                crs.standard_parallel,
            )),
        }
    }

    /// lon/lat (degrees) to CRS coordinates.
    #[inline]
    pub fn forward(&self, lon: f64, lat: f64) -> (f64, f64) {
        match self {
            SphereProjection::Geographic => (lon, lat),
            SphereProjection::Mercator(m) => m.forward(lon, lat),
            SphereProjection::Equirectangular(e) => e.forward(lon, lat),
        }
    }

    /// CRS coordinates to lon/lat (degrees).
    #[inline]
    pub fn inverse(&self, x: f64, y: f64) -> Option<(f64, f64)> {
        match self {
            SphereProjection::Geographic => {
                if y.abs() > 90.0 {
                    None
                } else {
                    Some((x, y))
                }
            }
            SphereProjection::Mercator(m) => Some(m.inverse(x, y)),
            SphereProjection::Equirectangular(e) => e.inverse(x, y),
        }
    }

    /// Width of one full turn of longitude in CRS x units, for projections
    /// that wrap longitudes.
    pub fn x_period(&self) -> Option<f64> {
        match self {
            SphereProjection::Geographic => None,
            SphereProjection::Mercator(m) => Some(2.0 * std::f64::consts::PI * m.radius),
            SphereProjection::Equirectangular(e) => Some(
                2.0 * std::f64::consts::PI * e.radius * e.standard_parallel.to_radians().cos(),
            ),
        }
    }
}

/// Point transformation from one CRS to another through lon/lat.
///
/// Only angles survive the pivot, so differing sphere radii are ignored.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CrsTransform {
    from: SphereProjection,
    to: SphereProjection,
}

impl CrsTransform {
    pub fn new(from: &Crs, to: &Crs) -> Self {
        Self {
            from: SphereProjection::from_crs(from),
            to: SphereProjection::from_crs(to),
        }
    }

    /// Transform a point, or None if it has no image in the target CRS.
    #[inline]
    pub fn transform(&self, x: f64, y: f64) -> Option<(f64, f64)> {
        let (lon, lat) = self.from.inverse(x, y)?;
        let out = self.to.forward(lon, lat);
        if out.0.is_finite() && out.1.is_finite() {
            Some(out)
        } else {
            None
        }
    }

    /// Like [`transform`](Self::transform), with the intermediate longitude
    /// shifted by `lon_offset` degrees before projecting.
    ///
    /// Geographic targets do not wrap longitudes, so a raster published in
    /// 0..360 east longitudes is reached by retrying with +360.
    #[inline]
    pub fn transform_shifted(&self, x: f64, y: f64, lon_offset: f64) -> Option<(f64, f64)> {
        let (lon, lat) = self.from.inverse(x, y)?;
        let out = self.to.forward(lon + lon_offset, lat);
        if out.0.is_finite() && out.1.is_finite() {
            Some(out)
        } else {
            None
        }
    }
}

/// Bounding box, in the target CRS, of a raster of `width × height` pixels
/// placed by `geotransform` in the source CRS.
///
/// The raster edges are curved in the target CRS, so corners alone are not
/// enough: every edge is sampled at `samples_per_edge + 1` points. When the
/// target wraps longitudes, x values are unwrapped around the image of the
/// raster center, so an edge on the antimeridian stays on the raster's side
/// and the box may extend past the world edge.
pub fn footprint(
    transform: &CrsTransform,
    geotransform: &GeoTransform,
    width: u32,
    height: u32,
    samples_per_edge: u32,
) -> Option<BoundingBox> {
    let mut bbox = BoundingBox::empty();
    let w = width as f64;
    let h = height as f64;
    let n = samples_per_edge.max(1);
    let period = transform.to.x_period();
    let (cx, cy) = geotransform.apply(w / 2.0, h / 2.0);
    let reference = transform.transform(cx, cy).map(|(x, _)| x);

    for t in 0..=n {
        let frac = t as f64 / n as f64;
        let edge_points = [
            (frac * w, 0.0),
            (frac * w, h),
            (0.0, frac * h),
            (w, frac * h),
        ];
        for (col, row) in edge_points {
            let (x, y) = geotransform.apply(col, row);
            if let Some((mut tx, ty)) = transform.transform(x, y) {
                if let (Some(period), Some(reference)) = (period, reference) {
                    let offset = (tx - reference + period / 2.0).rem_euclid(period) - period / 2.0;
                    tx = reference + offset;
                }
                bbox.include_point(tx, ty);
            }
        }
    }

    if bbox.is_empty() {
        None
    } else {
        Some(bbox)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mosaic_common::crs::MARS_RADIUS_M;

    #[test]
    fn test_geographic_to_mercator_matches_projection() {
        let t = CrsTransform::new(&Crs::geographic(MARS_RADIUS_M), &Crs::mercator(MARS_RADIUS_M));
        let (x, y) = t.transform(77.5, 18.0).unwrap();
        let (ex, ey) = Mercator::new(MARS_RADIUS_M, 0.0).forward(77.5, 18.0);
        assert_eq!((x, y), (ex, ey));
    }

    #[test]
    fn test_radius_is_ignored_across_bodies() {
        // Earth-radius geographic coordinates land on the Mars sphere unchanged in angle
        let earth_geo = Crs::from_identifier("EPSG:4326").unwrap();
        let mars_merc = Crs::mercator(MARS_RADIUS_M);
        let (x, _) = CrsTransform::new(&earth_geo, &mars_merc)
            .transform(90.0, 0.0)
            .unwrap();
        assert!((x - MARS_RADIUS_M * std::f64::consts::FRAC_PI_2).abs() < 1e-6);
    }

    #[test]
    fn test_equirectangular_footprint_in_mercator() {
        let src = Crs::equirectangular(MARS_RADIUS_M, 0.0, 0.0);
        let dst = Crs::mercator(MARS_RADIUS_M);
        let m_per_deg = MARS_RADIUS_M.to_radians();
        // 1° × 1° raster with its top-left corner at (10°E, 5°N)
        let gt = GeoTransform::north_up(10.0 * m_per_deg, 5.0 * m_per_deg, m_per_deg / 100.0, m_per_deg / 100.0);
        let bbox = footprint(&CrsTransform::new(&src, &dst), &gt, 100, 100, 8).unwrap();

        let merc = Mercator::new(MARS_RADIUS_M, 0.0);
        let (x0, y0) = merc.forward(10.0, 4.0);
        let (x1, y1) = merc.forward(11.0, 5.0);
        assert!((bbox.min_x - x0).abs() < 1e-3);
        assert!((bbox.max_x - x1).abs() < 1e-3);
        assert!((bbox.min_y - y0).abs() < 1e-3);
        assert!((bbox.max_y - y1).abs() < 1e-3);
    }

    #[test]
    fn test_footprint_on_antimeridian_stays_narrow() {
        let geo = Crs::geographic(MARS_RADIUS_M);
        let merc = Crs::mercator(MARS_RADIUS_M);
        // 170°E..180°E, 0..10°N
        let gt = GeoTransform::north_up(170.0, 10.0, 0.1, 0.1);
        let bbox = footprint(&CrsTransform::new(&geo, &merc), &gt, 100, 100, 16).unwrap();
        let half = MARS_RADIUS_M * std::f64::consts::PI;
        assert!((bbox.max_x - half).abs() < 1e-3);
        assert!(bbox.min_x > 0.9 * half);
    }

    #[test]
    fn test_shifted_transform_reaches_east_longitudes() {
        let merc = Crs::mercator(MARS_RADIUS_M);
        let geo = Crs::geographic(MARS_RADIUS_M);
        let t = CrsTransform::new(&merc, &geo);
        let (x, _) = Mercator::new(MARS_RADIUS_M, 0.0).forward(-40.0, 0.0);
        let (lon, _) = t.transform(x, 0.0).unwrap();
        let (lon_east, _) = t.transform_shifted(x, 0.0, 360.0).unwrap();
        assert!((lon + 40.0).abs() < 1e-9);
        assert!((lon_east - 320.0).abs() < 1e-9);
    }
}
