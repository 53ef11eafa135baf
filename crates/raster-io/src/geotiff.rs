//! GeoTIFF source decoding.

use crate::geokeys::{
    GeoKeyDirectory, GeoKeyError, GDAL_NODATA_TAG, GEO_ASCII_PARAMS_TAG, GEO_DOUBLE_PARAMS_TAG,
    GEO_KEY_DIRECTORY_TAG, MODEL_PIXEL_SCALE_TAG, MODEL_TIEPOINT_TAG, MODEL_TRANSFORMATION_TAG,
};
use crate::source::{Georeference, RawSamples, SampleBuffer};
use mosaic_common::{GeoTransform, MapperError, MapperResult};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use tiff::decoder::{Decoder, DecodingResult, Limits};
use tiff::tags::Tag;
use tiff::{ColorType, TiffError};

type TiffDecoder = Decoder<BufReader<File>>;

fn open(path: &Path) -> MapperResult<TiffDecoder> {
    let file = File::open(path).map_err(|e| MapperError::storage(path, e))?;
    Ok(Decoder::new(BufReader::new(file))
        .map_err(|e| decode_error(path, e))?
        .with_limits(Limits::unlimited()))
}

/// A file that opened but fails to decode is malformed, whatever the
/// decoder's error kind; truncation surfaces as an I/O error.
fn decode_error(path: &Path, err: TiffError) -> MapperError {
    MapperError::unsupported(path, err.to_string())
}

fn f64_tag(decoder: &mut TiffDecoder, code: u16, path: &Path) -> MapperResult<Option<Vec<f64>>> {
    match decoder
        .find_tag(Tag::from_u16_exhaustive(code))
        .map_err(|e| decode_error(path, e))?
    {
        Some(value) => value
            .into_f64_vec()
            .map(Some)
            .map_err(|e| decode_error(path, e)),
        None => Ok(None),
    }
}

fn ascii_tag(decoder: &mut TiffDecoder, code: u16, path: &Path) -> MapperResult<Option<String>> {
    match decoder
        .find_tag(Tag::from_u16_exhaustive(code))
        .map_err(|e| decode_error(path, e))?
    {
        Some(value) => value
            .into_string()
            .map(Some)
            .map_err(|e| decode_error(path, e)),
        None => Ok(None),
    }
}

/// Pixel-corner geotransform from the model tags.
///
/// `ModelTransformation` wins over tiepoint + pixel scale when present.
fn model_geotransform(decoder: &mut TiffDecoder, path: &Path) -> MapperResult<GeoTransform> {
    if let Some(m) = f64_tag(decoder, MODEL_TRANSFORMATION_TAG, path)? {
        if m.len() >= 16 {
            return Ok(GeoTransform([m[3], m[0], m[1], m[7], m[4], m[5]]));
        }
    }

    let scale = f64_tag(decoder, MODEL_PIXEL_SCALE_TAG, path)?;
    let tiepoint = f64_tag(decoder, MODEL_TIEPOINT_TAG, path)?;
    match (scale, tiepoint) {
        (Some(s), Some(t)) if s.len() >= 2 && t.len() >= 6 => {
            let (sx, sy) = (s[0], s[1]);
            Ok(GeoTransform([
                t[3] - t[0] * sx,
                sx,
                0.0,
                t[4] + t[1] * sy,
                0.0,
                -sy,
            ]))
        }
        _ => Err(MapperError::missing_georeference(
            path,
            "no ModelTransformation or ModelTiepoint/ModelPixelScale tags",
        )),
    }
}

pub(crate) fn read_georeference(path: &Path) -> MapperResult<Georeference> {
    let mut decoder = open(path)?;
    let (width, height) = decoder.dimensions().map_err(|e| decode_error(path, e))?;

    let directory = match decoder
        .find_tag(Tag::from_u16_exhaustive(GEO_KEY_DIRECTORY_TAG))
        .map_err(|e| decode_error(path, e))?
    {
        Some(value) => value.into_u16_vec().map_err(|e| decode_error(path, e))?,
        None => {
            return Err(MapperError::missing_georeference(
                path,
                "no GeoKeyDirectory tag",
            ))
        }
    };
    let doubles = f64_tag(&mut decoder, GEO_DOUBLE_PARAMS_TAG, path)?.unwrap_or_default();
    let ascii = ascii_tag(&mut decoder, GEO_ASCII_PARAMS_TAG, path)?.unwrap_or_default();

    let keys = GeoKeyDirectory::parse(&directory, &doubles, &ascii)
        .and_then(|keys| keys.crs().map(|crs| (keys, crs)));
    let (keys, crs) = match keys {
        Ok(found) => found,
        Err(GeoKeyError::Missing(reason)) => {
            return Err(MapperError::missing_georeference(path, reason))
        }
        Err(GeoKeyError::Unsupported(reason)) => return Err(MapperError::unsupported(path, reason)),
    };

    let mut gt = model_geotransform(&mut decoder, path)?.0;
    if keys.pixel_is_point() {
        // Tiepoints name pixel centers; move the origin to the corner
        gt[0] -= 0.5 * (gt[1] + gt[2]);
        gt[3] -= 0.5 * (gt[4] + gt[5]);
    }
    if !crs.is_geographic() {
        let (false_easting, false_northing) = keys.false_origin();
        gt[0] -= false_easting;
        gt[3] -= false_northing;
    }

    let nodata = ascii_tag(&mut decoder, GDAL_NODATA_TAG, path)?
        .and_then(|s| s.trim_matches(|c: char| c.is_whitespace() || c == '\0').parse::<f64>().ok());

    Ok(Georeference {
        width,
        height,
        geotransform: GeoTransform(gt),
        crs,
        nodata,
    })
}

pub(crate) fn read_samples(path: &Path) -> MapperResult<RawSamples> {
    let mut decoder = open(path)?;
    let (width, height) = decoder.dimensions().map_err(|e| decode_error(path, e))?;

    let (samples_per_pixel, has_alpha) =
        match decoder.colortype().map_err(|e| decode_error(path, e))? {
            ColorType::Gray(_) => (1, false),
            ColorType::GrayA(_) => (2, true),
            ColorType::RGB(_) => (3, false),
            ColorType::RGBA(_) => (4, true),
            other => {
                return Err(MapperError::unsupported(
                    path,
                    format!("color type {:?}", other),
                ))
            }
        };

    let samples = match decoder.read_image().map_err(|e| decode_error(path, e))? {
        DecodingResult::U8(v) => SampleBuffer::U8(v),
        DecodingResult::U16(v) => SampleBuffer::U16(v),
        DecodingResult::I16(v) => SampleBuffer::I16(v),
        DecodingResult::U32(v) => SampleBuffer::U32(v),
        DecodingResult::I32(v) => SampleBuffer::I32(v),
        DecodingResult::F32(v) => SampleBuffer::F32(v),
        DecodingResult::F64(v) => SampleBuffer::F64(v),
        _ => return Err(MapperError::unsupported(path, "unsupported sample type")),
    };

    Ok(RawSamples {
        width,
        height,
        samples,
        samples_per_pixel,
        has_alpha,
    })
}
