// src/codecs/heif.rs
//
// Safe wrapper around libheif for decoding the primary image of a HEIC/HEIF container.
// libheif-rs owns the context and image handles (RAII), so no raw pointers escape here.

use crate::engine::{MAX_DIMENSION, MAX_PIXELS};
use crate::error::ConvertError;
use image::RgbImage;
use libheif_rs::{ColorSpace, HeifContext, LibHeif, RgbChroma};

/// Decode the primary image of a HEIF container to 8-bit interleaved RGB.
pub fn decode_primary_rgb(data: &[u8]) -> Result<RgbImage, ConvertError> {
    let lib = LibHeif::new();
    let ctx = HeifContext::read_from_bytes(data)
        .map_err(|e| ConvertError::heic_conversion_failed(format!("libheif: {e}")))?;
    let handle = ctx
        .primary_image_handle()
        .map_err(|e| ConvertError::heic_conversion_failed(format!("libheif: {e}")))?;

    let (width, height) = (handle.width(), handle.height());
    validate_dimensions(width, height)?;

    let decoded = lib
        .decode(&handle, ColorSpace::Rgb(RgbChroma::Rgb), None)
        .map_err(|e| ConvertError::heic_conversion_failed(format!("libheif: {e}")))?;

    let planes = decoded.planes();
    let plane = planes
        .interleaved
        .ok_or_else(|| ConvertError::heic_conversion_failed("libheif: no interleaved plane"))?;

    // Rows may be padded; copy only the visible width of each one
    let row_len = width as usize * 3;
    let mut pixels = Vec::with_capacity(row_len * height as usize);
    for row in plane.data.chunks(plane.stride).take(height as usize) {
        let visible = row.get(..row_len).ok_or_else(|| {
            ConvertError::heic_conversion_failed("libheif: plane row shorter than width")
        })?;
        pixels.extend_from_slice(visible);
    }

    RgbImage::from_raw(width, height, pixels)
        .ok_or_else(|| ConvertError::heic_conversion_failed("libheif: pixel buffer size mismatch"))
}

fn validate_dimensions(width: u32, height: u32) -> Result<(), ConvertError> {
    if width == 0 || height == 0 {
        return Err(ConvertError::heic_conversion_failed(
            "libheif: primary image has zero dimensions",
        ));
    }
    if width > MAX_DIMENSION || height > MAX_DIMENSION {
        return Err(ConvertError::dimension_exceeds_limit(
            width.max(height),
            MAX_DIMENSION,
        ));
    }
    let pixels = width as u64 * height as u64;
    if pixels > MAX_PIXELS {
        return Err(ConvertError::pixel_count_exceeds_limit(pixels, MAX_PIXELS));
    }
    Ok(())
}
