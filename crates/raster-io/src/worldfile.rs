//! PNG/JPEG sources placed by an ESRI world file.
//!
//! A world file holds six lines `A D B E C F` where (C, F) is the center of
//! the top-left pixel. The image format carries no CRS, so one has to be
//! supplied by configuration.

use crate::source::{Georeference, RawSamples, SampleBuffer};
use image::DynamicImage;
use mosaic_common::{Crs, GeoTransform, MapperError, MapperResult};
use std::fs;
use std::path::{Path, PathBuf};

/// Sidecar names tried for `image.png`: `image.pgw`, `image.pngw`,
/// `image.wld`, each in lower and upper case.
fn candidates(path: &Path) -> Vec<PathBuf> {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    let mut names = Vec::new();
    let mut chars = ext.chars();
    if let (Some(first), Some(last)) = (chars.next(), ext.chars().last()) {
        names.push(format!("{}{}w", first, last));
    }
    names.push(format!("{}w", ext));
    names.push("wld".to_string());

    names
        .iter()
        .flat_map(|n| [n.clone(), n.to_ascii_uppercase()])
        .map(|n| path.with_extension(n))
        .collect()
}

pub(crate) fn find_world_file(path: &Path) -> Option<PathBuf> {
    candidates(path).into_iter().find(|p| p.is_file())
}

/// Parse world-file text into a pixel-corner geotransform.
pub(crate) fn parse_world_file(text: &str) -> Result<GeoTransform, String> {
    let values = text
        .split_whitespace()
        .map(|t| t.parse::<f64>().map_err(|e| format!("'{}': {}", t, e)))
        .collect::<Result<Vec<_>, _>>()?;
    if values.len() != 6 {
        return Err(format!("expected 6 values, found {}", values.len()));
    }
    let [a, d, b, e, c, f] = [values[0], values[1], values[2], values[3], values[4], values[5]];
    Ok(GeoTransform([
        c - a / 2.0 - b / 2.0,
        a,
        b,
        f - d / 2.0 - e / 2.0,
        d,
        e,
    ]))
}

pub(crate) fn read_georeference(path: &Path, crs: Option<&Crs>) -> MapperResult<Georeference> {
    let world_file = find_world_file(path)
        .ok_or_else(|| MapperError::missing_georeference(path, "no world file next to image"))?;
    let text = fs::read_to_string(&world_file).map_err(|e| MapperError::storage(&world_file, e))?;
    let geotransform = parse_world_file(&text).map_err(|reason| {
        MapperError::missing_georeference(path, format!("{}: {}", world_file.display(), reason))
    })?;
    let crs = *crs.ok_or_else(|| {
        MapperError::missing_georeference(path, "world-file images need world_file_crs to be configured")
    })?;

    let (width, height) = image::image_dimensions(path).map_err(|e| image_error(path, e))?;

    Ok(Georeference {
        width,
        height,
        geotransform,
        crs,
        nodata: None,
    })
}

fn image_error(path: &Path, err: image::ImageError) -> MapperError {
    MapperError::unsupported(path, err.to_string())
}

pub(crate) fn read_samples(path: &Path) -> MapperResult<RawSamples> {
    let img = image::open(path).map_err(|e| image_error(path, e))?;
    let (width, height) = (img.width(), img.height());

    let (samples, samples_per_pixel, has_alpha) = match img {
        DynamicImage::ImageLuma8(b) => (SampleBuffer::U8(b.into_raw()), 1, false),
        DynamicImage::ImageLumaA8(b) => (SampleBuffer::U8(b.into_raw()), 2, true),
        DynamicImage::ImageRgb8(b) => (SampleBuffer::U8(b.into_raw()), 3, false),
        DynamicImage::ImageRgba8(b) => (SampleBuffer::U8(b.into_raw()), 4, true),
        DynamicImage::ImageLuma16(b) => (SampleBuffer::U16(b.into_raw()), 1, false),
        DynamicImage::ImageLumaA16(b) => (SampleBuffer::U16(b.into_raw()), 2, true),
        DynamicImage::ImageRgb16(b) => (SampleBuffer::U16(b.into_raw()), 3, false),
        DynamicImage::ImageRgba16(b) => (SampleBuffer::U16(b.into_raw()), 4, true),
        other => (SampleBuffer::U8(other.to_rgba8().into_raw()), 4, true),
    };

    Ok(RawSamples {
        width,
        height,
        samples,
        samples_per_pixel,
        has_alpha,
    })
}
