//! GeoTIFF key directory (GeoKeyDirectoryTag and its parameter tags).
//!
//! The directory is a flat `u16` array:
//! `[version, revision, minor, key_count, (key_id, location, count, value)*]`.
//! `location == 0` stores the value inline; otherwise it names the
//! GeoDoubleParams or GeoAsciiParams tag and `value` is an offset into it.

use mosaic_common::crs::EARTH_RADIUS_M;
use mosaic_common::{Crs, CrsCode};
use std::collections::BTreeMap;

// TIFF tags
pub const MODEL_PIXEL_SCALE_TAG: u16 = 33550;
pub const MODEL_TIEPOINT_TAG: u16 = 33922;
pub const MODEL_TRANSFORMATION_TAG: u16 = 34264;
pub const GEO_KEY_DIRECTORY_TAG: u16 = 34735;
pub const GEO_DOUBLE_PARAMS_TAG: u16 = 34736;
pub const GEO_ASCII_PARAMS_TAG: u16 = 34737;
pub const GDAL_NODATA_TAG: u16 = 42113;

// GeoKeys
pub const GT_MODEL_TYPE: u16 = 1024;
pub const GT_RASTER_TYPE: u16 = 1025;
pub const GT_CITATION: u16 = 1026;
pub const GEOGRAPHIC_TYPE: u16 = 2048;
pub const GEOG_CITATION: u16 = 2049;
pub const GEOG_ANGULAR_UNITS: u16 = 2054;
pub const GEOG_SEMI_MAJOR_AXIS: u16 = 2057;
pub const GEOG_SEMI_MINOR_AXIS: u16 = 2058;
pub const PROJECTED_CS_TYPE: u16 = 3072;
pub const PROJECTION: u16 = 3074;
pub const PROJ_COORD_TRANS: u16 = 3075;
pub const PROJ_LINEAR_UNITS: u16 = 3076;
pub const PROJ_STD_PARALLEL_1: u16 = 3078;
pub const PROJ_NAT_ORIGIN_LONG: u16 = 3080;
pub const PROJ_FALSE_EASTING: u16 = 3082;
pub const PROJ_FALSE_NORTHING: u16 = 3083;
pub const PROJ_CENTER_LONG: u16 = 3088;

// Values
pub const USER_DEFINED: u16 = 32767;
pub const MODEL_TYPE_PROJECTED: u16 = 1;
pub const MODEL_TYPE_GEOGRAPHIC: u16 = 2;
pub const RASTER_PIXEL_IS_AREA: u16 = 1;
pub const RASTER_PIXEL_IS_POINT: u16 = 2;
pub const CT_MERCATOR: u16 = 7;
pub const CT_EQUIRECTANGULAR: u16 = 17;
pub const LINEAR_METER: u16 = 9001;
pub const ANGULAR_DEGREE: u16 = 9102;

/// One GeoKey value.
#[derive(Debug, Clone, PartialEq)]
pub enum GeoKeyValue {
    Short(u16),
    Double(Vec<f64>),
    Ascii(String),
}

/// Why a key directory could not be turned into a CRS.
#[derive(Debug, Clone, PartialEq)]
pub enum GeoKeyError {
    /// Positioning information is absent.
    Missing(String),
    /// Present but not something the pipeline can project.
    Unsupported(String),
}

/// Parsed GeoKey directory.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GeoKeyDirectory {
    keys: BTreeMap<u16, GeoKeyValue>,
}

impl GeoKeyDirectory {
    /// Parse the raw tag contents.
    pub fn parse(directory: &[u16], doubles: &[f64], ascii: &str) -> Result<Self, GeoKeyError> {
        if directory.len() < 4 {
            return Err(GeoKeyError::Missing("GeoKeyDirectory is truncated".into()));
        }
        let count = directory[3] as usize;
        if directory.len() < 4 + count * 4 {
            return Err(GeoKeyError::Missing(format!(
                "GeoKeyDirectory declares {} keys but holds {}",
                count,
                (directory.len() - 4) / 4
            )));
        }

        let mut keys = BTreeMap::new();
        for entry in directory[4..4 + count * 4].chunks_exact(4) {
            let (key, location, n, value) = (entry[0], entry[1], entry[2] as usize, entry[3] as usize);
            let parsed = match location {
                0 => GeoKeyValue::Short(entry[3]),
                GEO_DOUBLE_PARAMS_TAG => match doubles.get(value..value + n) {
                    Some(v) => GeoKeyValue::Double(v.to_vec()),
                    None => continue,
                },
                GEO_ASCII_PARAMS_TAG => {
                    let text: String = ascii.chars().skip(value).take(n).collect();
                    GeoKeyValue::Ascii(text.trim_end_matches(['|', '\0']).to_string())
                }
                // Keys stored in other tags are not used by the pipeline
                _ => continue,
            };
            keys.insert(key, parsed);
        }
        Ok(Self { keys })
    }

    pub fn set_short(&mut self, key: u16, value: u16) {
        self.keys.insert(key, GeoKeyValue::Short(value));
    }

    pub fn set_double(&mut self, key: u16, value: f64) {
        self.keys.insert(key, GeoKeyValue::Double(vec![value]));
    }

    pub fn set_ascii(&mut self, key: u16, value: impl Into<String>) {
        self.keys.insert(key, GeoKeyValue::Ascii(value.into()));
    }

    pub fn short(&self, key: u16) -> Option<u16> {
        match self.keys.get(&key) {
            Some(GeoKeyValue::Short(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn double(&self, key: u16) -> Option<f64> {
        match self.keys.get(&key) {
            Some(GeoKeyValue::Double(v)) => v.first().copied(),
            _ => None,
        }
    }

    pub fn ascii(&self, key: u16) -> Option<&str> {
        match self.keys.get(&key) {
            Some(GeoKeyValue::Ascii(v)) => Some(v.as_str()),
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Whether tiepoints refer to pixel centers rather than corners.
    pub fn pixel_is_point(&self) -> bool {
        self.short(GT_RASTER_TYPE) == Some(RASTER_PIXEL_IS_POINT)
    }

    /// False easting and northing of a projected CRS, in meters.
    pub fn false_origin(&self) -> (f64, f64) {
        (
            self.double(PROJ_FALSE_EASTING).unwrap_or(0.0),
            self.double(PROJ_FALSE_NORTHING).unwrap_or(0.0),
        )
    }

    /// Serialize into (directory, double params, ascii params) tag values.
    pub fn to_tags(&self) -> (Vec<u16>, Vec<f64>, String) {
        let mut directory = vec![1, 1, 0, self.keys.len() as u16];
        let mut doubles = Vec::new();
        let mut ascii = String::new();

        // Keys must be sorted by id; BTreeMap iteration guarantees it
        for (&key, value) in &self.keys {
            match value {
                GeoKeyValue::Short(v) => directory.extend_from_slice(&[key, 0, 1, *v]),
                GeoKeyValue::Double(v) => {
                    directory.extend_from_slice(&[
                        key,
                        GEO_DOUBLE_PARAMS_TAG,
                        v.len() as u16,
                        doubles.len() as u16,
                    ]);
                    doubles.extend_from_slice(v);
                }
                GeoKeyValue::Ascii(s) => {
                    let offset = ascii.chars().count() as u16;
                    ascii.push_str(s);
                    ascii.push('|');
                    directory.extend_from_slice(&[
                        key,
                        GEO_ASCII_PARAMS_TAG,
                        s.chars().count() as u16 + 1,
                        offset,
                    ]);
                }
            }
        }
        (directory, doubles, ascii)
    }

    /// Resolve the CRS described by the keys.
    pub fn crs(&self) -> Result<Crs, GeoKeyError> {
        if self.is_empty() {
            return Err(GeoKeyError::Missing("GeoKeyDirectory has no keys".into()));
        }
        let radius = self.double(GEOG_SEMI_MAJOR_AXIS);

        match self.short(GT_MODEL_TYPE) {
            Some(MODEL_TYPE_GEOGRAPHIC) => match self.short(GEOGRAPHIC_TYPE) {
                Some(USER_DEFINED) | None => radius.map(Crs::geographic).ok_or_else(|| {
                    GeoKeyError::Missing("user-defined geographic CRS without semi-major axis".into())
                }),
                // Any EPSG geographic code is treated as the Earth sphere
                Some(_) => Ok(Crs::geographic(radius.unwrap_or(EARTH_RADIUS_M))),
            },
            Some(MODEL_TYPE_PROJECTED) => {
                if let Some(units) = self.short(PROJ_LINEAR_UNITS) {
                    if units != LINEAR_METER {
                        return Err(GeoKeyError::Unsupported(format!(
                            "linear units code {} (only meters are supported)",
                            units
                        )));
                    }
                }
                match self.short(PROJECTED_CS_TYPE) {
                    Some(3857) | Some(3785) => Ok(Crs::mercator(EARTH_RADIUS_M)),
                    Some(4087) | Some(32662) => Ok(Crs::equirectangular(EARTH_RADIUS_M, 0.0, 0.0)),
                    Some(USER_DEFINED) | None => self.user_defined_projection(radius),
                    Some(code) => Err(GeoKeyError::Unsupported(format!(
                        "projected CRS EPSG:{}",
                        code
                    ))),
                }
            }
            Some(other) => Err(GeoKeyError::Unsupported(format!("model type {}", other))),
            None => Err(GeoKeyError::Missing("GTModelTypeGeoKey is absent".into())),
        }
    }

    fn user_defined_projection(&self, radius: Option<f64>) -> Result<Crs, GeoKeyError> {
        let radius = radius.unwrap_or(EARTH_RADIUS_M);
        let center_lon = self
            .double(PROJ_CENTER_LONG)
            .or_else(|| self.double(PROJ_NAT_ORIGIN_LONG))
            .unwrap_or(0.0);

        match self.short(PROJ_COORD_TRANS) {
            Some(CT_MERCATOR) => Ok(Crs {
                center_lon,
                ..Crs::mercator(radius)
            }),
            Some(CT_EQUIRECTANGULAR) => Ok(Crs::equirectangular(
                radius,
                center_lon,
                self.double(PROJ_STD_PARALLEL_1).unwrap_or(0.0),
            )),
            Some(ct) => Err(GeoKeyError::Unsupported(format!(
                "coordinate transformation code {}",
                ct
            ))),
            None => Err(GeoKeyError::Missing(
                "user-defined projection without ProjCoordTransGeoKey".into(),
            )),
        }
    }

    /// Keys describing `crs`, with pixel-is-area raster space.
    pub fn for_crs(crs: &Crs) -> Self {
        let mut dir = GeoKeyDirectory::default();
        dir.set_short(GT_RASTER_TYPE, RASTER_PIXEL_IS_AREA);

        if crs.radius == EARTH_RADIUS_M && crs.center_lon == 0.0 && crs.standard_parallel == 0.0 {
            match crs.code {
                CrsCode::Geographic => {
                    dir.set_short(GT_MODEL_TYPE, MODEL_TYPE_GEOGRAPHIC);
                    dir.set_short(GEOGRAPHIC_TYPE, 4326);
                    return dir;
                }
                CrsCode::Mercator => {
                    dir.set_short(GT_MODEL_TYPE, MODEL_TYPE_PROJECTED);
                    dir.set_short(PROJECTED_CS_TYPE, 3857);
                    return dir;
                }
                CrsCode::Equirectangular => {
                    dir.set_short(GT_MODEL_TYPE, MODEL_TYPE_PROJECTED);
                    dir.set_short(PROJECTED_CS_TYPE, 4087);
                    return dir;
                }
            }
        }

        dir.set_ascii(GT_CITATION, crs.to_string());
        dir.set_short(GEOGRAPHIC_TYPE, USER_DEFINED);
        dir.set_ascii(GEOG_CITATION, format!("sphere R={}", crs.radius));
        dir.set_short(GEOG_ANGULAR_UNITS, ANGULAR_DEGREE);
        dir.set_double(GEOG_SEMI_MAJOR_AXIS, crs.radius);
        dir.set_double(GEOG_SEMI_MINOR_AXIS, crs.radius);

        match crs.code {
            CrsCode::Geographic => {
                dir.set_short(GT_MODEL_TYPE, MODEL_TYPE_GEOGRAPHIC);
            }
            CrsCode::Mercator | CrsCode::Equirectangular => {
                dir.set_short(GT_MODEL_TYPE, MODEL_TYPE_PROJECTED);
                dir.set_short(PROJECTED_CS_TYPE, USER_DEFINED);
                dir.set_short(PROJECTION, USER_DEFINED);
                dir.set_short(PROJ_LINEAR_UNITS, LINEAR_METER);
                dir.set_double(PROJ_NAT_ORIGIN_LONG, crs.center_lon);
                dir.set_double(PROJ_FALSE_EASTING, 0.0);
                dir.set_double(PROJ_FALSE_NORTHING, 0.0);
                if crs.code == CrsCode::Mercator {
                    dir.set_short(PROJ_COORD_TRANS, CT_MERCATOR);
                } else {
                    dir.set_short(PROJ_COORD_TRANS, CT_EQUIRECTANGULAR);
                    dir.set_double(PROJ_STD_PARALLEL_1, crs.standard_parallel);
                }
            }
        }
        dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mosaic_common::crs::MARS_RADIUS_M;

    fn roundtrip(crs: Crs) -> Crs {
        let (dir, doubles, ascii) = GeoKeyDirectory::for_crs(&crs).to_tags();
        GeoKeyDirectory::parse(&dir, &doubles, &ascii)
            .unwrap()
            .crs()
            .unwrap()
    }

    #[test]
    fn test_crs_roundtrip_through_tags() {
        for crs in [
            Crs::mercator(MARS_RADIUS_M),
            Crs::mercator(EARTH_RADIUS_M),
            Crs::geographic(MARS_RADIUS_M),
            Crs::geographic(EARTH_RADIUS_M),
            Crs::equirectangular(MARS_RADIUS_M, 180.0, 10.0),
            Crs::equirectangular(EARTH_RADIUS_M, 0.0, 0.0),
        ] {
            assert_eq!(roundtrip(crs), crs, "roundtrip failed for {}", crs);
        }
    }

    #[test]
    fn test_directory_layout() {
        let (dir, _, _) = GeoKeyDirectory::for_crs(&Crs::mercator(EARTH_RADIUS_M)).to_tags();
        assert_eq!(&dir[..4], &[1, 1, 0, 3]);
        // GTModelType, GTRasterType, ProjectedCSType in ascending key order
        assert_eq!(&dir[4..8], &[GT_MODEL_TYPE, 0, 1, MODEL_TYPE_PROJECTED]);
        assert_eq!(&dir[12..16], &[PROJECTED_CS_TYPE, 0, 1, 3857]);
    }

    #[test]
    fn test_ascii_params_are_trimmed() {
        let mut dir = GeoKeyDirectory::default();
        dir.set_ascii(GT_CITATION, "Mars 2000");
        dir.set_short(GT_MODEL_TYPE, MODEL_TYPE_GEOGRAPHIC);
        let (raw, doubles, ascii) = dir.to_tags();
        let parsed = GeoKeyDirectory::parse(&raw, &doubles, &ascii).unwrap();
        assert_eq!(parsed.ascii(GT_CITATION), Some("Mars 2000"));
    }

    #[test]
    fn test_unsupported_projection() {
        let mut dir = GeoKeyDirectory::default();
        dir.set_short(GT_MODEL_TYPE, MODEL_TYPE_PROJECTED);
        dir.set_short(PROJECTED_CS_TYPE, 32633);
        assert!(matches!(dir.crs(), Err(GeoKeyError::Unsupported(_))));

        let mut dir = GeoKeyDirectory::default();
        dir.set_short(GT_MODEL_TYPE, MODEL_TYPE_PROJECTED);
        dir.set_short(PROJ_COORD_TRANS, 11); // polar stereographic
        assert!(matches!(dir.crs(), Err(GeoKeyError::Unsupported(_))));
    }

    #[test]
    fn test_missing_model_type() {
        let mut dir = GeoKeyDirectory::default();
        dir.set_short(GT_RASTER_TYPE, RASTER_PIXEL_IS_POINT);
        assert!(dir.pixel_is_point());
        assert!(matches!(dir.crs(), Err(GeoKeyError::Missing(_))));
    }

    #[test]
    fn test_truncated_directory() {
        assert!(GeoKeyDirectory::parse(&[1, 1, 0, 2, 1024, 0, 1, 2], &[], "").is_err());
    }
}
