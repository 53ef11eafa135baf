//! Longitude/latitude helpers shared by the projections.

/// Wrap a longitude in degrees into `[-180, 180)`.
#[inline]
pub fn normalize_longitude(lon: f64) -> f64 {
    if (-180.0..180.0).contains(&lon) {
        return lon;
    }
    (lon + 180.0).rem_euclid(360.0) - 180.0
}

/// Difference `lon - center` wrapped into `[-180, 180)`.
#[inline]
pub fn longitude_offset(lon: f64, center: f64) -> f64 {
    normalize_longitude(lon - center)
}
