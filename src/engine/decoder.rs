// src/engine/decoder.rs
//
// Pixel decoding for non-HEIC uploads, routed by magic bytes

use crate::engine::common::run_with_panic_policy;
use crate::engine::{MAX_DIMENSION, MAX_PIXELS};
use crate::error::ConvertError;
use image::{
    DynamicImage, GrayAlphaImage, GrayImage, ImageFormat, ImageReader, RgbImage, RgbaImage,
};
use mozjpeg::Decompress;
use std::io::Cursor;
use tracing::debug;
use webp::{BitstreamFeatures, Decoder as WebPDecoder};
use zune_core::bytestream::ZCursor;
use zune_core::colorspace::ColorSpace;
use zune_core::options::DecoderOptions;
use zune_core::result::DecodingResult;
use zune_png::PngDecoder;

type DecoderResult<T> = std::result::Result<T, ConvertError>;

fn bad(codec: &str, what: impl std::fmt::Display) -> ConvertError {
    ConvertError::decode_failed(format!("{codec}: {what}"))
}

/// Baseline or progressive JPEG through libjpeg-turbo, always as RGB8.
///
/// A stream without an EOI marker is refused here so the lenient fallback in
/// [`decode_image`] gets a chance at it.
pub fn decode_jpeg(data: &[u8]) -> DecoderResult<DynamicImage> {
    run_with_panic_policy("decode:jpeg", || {
        if !data.windows(2).any(|w| w == [0xFF, 0xD9]) {
            return Err(bad("jpeg", "stream has no end-of-image marker"));
        }
        let mut started = Decompress::new_mem(data)
            .map_err(|e| bad("jpeg", format_args!("header rejected ({e:?})")))?
            .rgb()
            .map_err(|e| bad("jpeg", format_args!("cannot start RGB output ({e:?})")))?;

        let (w, h) = (
            u32::try_from(started.width()).unwrap_or(u32::MAX),
            u32::try_from(started.height()).unwrap_or(u32::MAX),
        );
        check_dimensions(w, h)?;

        let rows: Vec<[u8; 3]> = started
            .read_scanlines()
            .map_err(|e| bad("jpeg", format_args!("scanline read failed ({e:?})")))?;
        let raw = rows.into_iter().flatten().collect::<Vec<u8>>();
        RgbImage::from_raw(w, h, raw)
            .map(DynamicImage::ImageRgb8)
            .ok_or_else(|| bad("jpeg", "scanlines do not cover the frame"))
    })
}

/// TIFF, GIF, BMP and anything else the `image` crate can open.
pub fn decode_with_image_crate(data: &[u8]) -> DecoderResult<DynamicImage> {
    run_with_panic_policy("decode:image", || {
        image::load_from_memory(data).map_err(|e| bad("image", e))
    })
}

fn png_to_dynamic(
    space: ColorSpace,
    w: u32,
    h: u32,
    buf: Vec<u8>,
) -> DecoderResult<Option<DynamicImage>> {
    Ok(match space {
        ColorSpace::Luma => GrayImage::from_raw(w, h, buf).map(DynamicImage::ImageLuma8),
        ColorSpace::LumaA => GrayAlphaImage::from_raw(w, h, buf).map(DynamicImage::ImageLumaA8),
        ColorSpace::RGB => RgbImage::from_raw(w, h, buf).map(DynamicImage::ImageRgb8),
        ColorSpace::RGBA => RgbaImage::from_raw(w, h, buf).map(DynamicImage::ImageRgba8),
        other => return Err(bad("png", format_args!("colorspace {other:?} not handled"))),
    })
}

/// PNG through zune-png; 16-bit samples are narrowed to 8 bits.
pub fn decode_png(data: &[u8]) -> DecoderResult<DynamicImage> {
    run_with_panic_policy("decode:png", || {
        let mut decoder = PngDecoder::new_with_options(
            ZCursor::new(data),
            DecoderOptions::default().png_set_strip_to_8bit(true),
        );
        let DecodingResult::U8(buf) = decoder.decode().map_err(|e| bad("png", e))? else {
            return Err(bad("png", "decoder produced wide samples"));
        };
        let (w, h) = decoder
            .info()
            .map(|info| (info.width as u32, info.height as u32))
            .ok_or_else(|| bad("png", "no IHDR after decode"))?;
        check_dimensions(w, h)?;
        let space = decoder
            .colorspace()
            .ok_or_else(|| bad("png", "no colorspace after decode"))?;

        png_to_dynamic(space, w, h, buf)?
            .ok_or_else(|| bad("png", format_args!("{w}x{h} buffer has the wrong length")))
    })
}

/// Still WebP through libwebp. Animations fall back to the `image` crate,
/// which yields the first frame.
pub fn decode_webp(data: &[u8]) -> DecoderResult<DynamicImage> {
    run_with_panic_policy("decode:webp", || {
        let header =
            BitstreamFeatures::new(data).ok_or_else(|| bad("webp", "unreadable VP8 header"))?;
        check_dimensions(header.width(), header.height())?;
        if header.has_animation() {
            return image::load_from_memory(data).map_err(|e| bad("webp/animated", e));
        }
        let frame = WebPDecoder::new(data)
            .decode()
            .ok_or_else(|| bad("webp", "libwebp returned no frame"))?;
        Ok(frame.to_image())
    })
}

/// Magic-byte sniff. `None` for anything the `image` crate does not recognise.
pub fn detect_format(bytes: &[u8]) -> Option<ImageFormat> {
    image::guess_format(bytes).ok()
}

/// Decode any supported raster upload.
///
/// Oversized images are refused from the header before pixel work starts.
/// JPEG, PNG and WebP go to their dedicated decoders; when one of those
/// refuses the bytes, the `image` crate gets a second try, which tolerates
/// some damage (a truncated JPEG tail, for instance) that mozjpeg does not.
pub fn decode_image(bytes: &[u8]) -> DecoderResult<(DynamicImage, Option<ImageFormat>)> {
    if bytes.is_empty() {
        return Err(ConvertError::decode_failed("empty input"));
    }
    precheck_header(bytes)?;

    let detected = detect_format(bytes);
    let dedicated = match detected {
        Some(ImageFormat::Jpeg) => Some(decode_jpeg(bytes)),
        Some(ImageFormat::Png) => Some(decode_png(bytes)),
        Some(ImageFormat::WebP) => Some(decode_webp(bytes)),
        _ => None,
    };

    let img = match dedicated {
        None => decode_with_image_crate(bytes)?,
        Some(Ok(img)) => img,
        Some(Err(err)) if err.is_limit() => return Err(err),
        Some(Err(err)) => {
            debug!(format = ?detected, error = %err, "dedicated decoder refused input, retrying with image crate");
            decode_with_image_crate(bytes).map_err(|retry| {
                ConvertError::decode_failed(format!("{err}; retry: {retry}"))
            })?
        }
    };

    check_dimensions(img.width(), img.height())?;
    Ok((img, detected))
}

/// Per-side and total pixel ceilings shared by every decoder.
pub fn check_dimensions(width: u32, height: u32) -> DecoderResult<()> {
    let longest = width.max(height);
    if longest > MAX_DIMENSION {
        return Err(ConvertError::dimension_exceeds_limit(longest, MAX_DIMENSION));
    }
    match u64::from(width) * u64::from(height) {
        total if total > MAX_PIXELS => {
            Err(ConvertError::pixel_count_exceeds_limit(total, MAX_PIXELS))
        }
        _ => Ok(()),
    }
}

/// Rejects oversized images from the header alone. Unparseable headers
/// pass; the decoder reports those.
pub fn precheck_header(bytes: &[u8]) -> DecoderResult<()> {
    read_dimensions(bytes).map_or(Ok(()), |(w, h)| check_dimensions(w, h))
}

/// Header-only dimension probe. `None` when the header cannot be parsed.
pub fn read_dimensions(bytes: &[u8]) -> Option<(u32, u32)> {
    ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .ok()?
        .into_dimensions()
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GenericImageView, Rgb};

    fn solid_webp(w: u32, h: u32) -> Vec<u8> {
        let rgb = [10u8, 20, 30].repeat((w * h) as usize);
        webp::Encoder::from_rgb(&rgb, w, h).encode_lossless().to_vec()
    }

    fn ramp(w: u32, h: u32, format: ImageFormat) -> Vec<u8> {
        let mut out = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(RgbImage::from_fn(w, h, |x, y| Rgb([x as u8, y as u8, 40])))
            .write_to(&mut out, format)
            .unwrap();
        out.into_inner()
    }

    #[test]
    fn header_precheck_refuses_wide_png() {
        let png = ramp(MAX_DIMENSION + 1, 1, ImageFormat::Png);
        assert!(matches!(
            precheck_header(&png),
            Err(ConvertError::DimensionExceedsLimit { .. })
        ));
        assert!(matches!(
            decode_image(&png),
            Err(ConvertError::DimensionExceedsLimit { .. })
        ));
    }

    #[test]
    fn png_pixels_survive() {
        let (img, fmt) = decode_image(&ramp(3, 1, ImageFormat::Png)).unwrap();
        assert_eq!(fmt, Some(ImageFormat::Png));
        assert_eq!(img.to_rgb8().get_pixel(2, 0).0, [2, 0, 40]);
    }

    #[test]
    fn jpeg_dimensions_survive() {
        let (img, fmt) = decode_image(&ramp(2, 2, ImageFormat::Jpeg)).unwrap();
        assert_eq!(fmt, Some(ImageFormat::Jpeg));
        assert_eq!(img.dimensions(), (2, 2));
    }

    #[test]
    fn lossless_webp_is_exact() {
        let (img, fmt) = decode_image(&solid_webp(3, 2)).unwrap();
        assert_eq!(fmt, Some(ImageFormat::WebP));
        assert_eq!(img.dimensions(), (3, 2));
        assert_eq!(img.to_rgb8().get_pixel(0, 0).0, [10, 20, 30]);
    }

    #[test]
    fn bmp_goes_through_image_crate() {
        let (img, fmt) = decode_image(&ramp(4, 3, ImageFormat::Bmp)).unwrap();
        assert_eq!(fmt, Some(ImageFormat::Bmp));
        assert_eq!(img.dimensions(), (4, 3));
    }

    #[test]
    fn text_and_empty_input_are_decode_failures() {
        for input in [&b"definitely not an image"[..], &[]] {
            assert!(matches!(
                decode_image(input),
                Err(ConvertError::DecodeFailed { .. })
            ));
        }
    }

    #[test]
    fn png_with_trashed_body_is_a_decode_failure() {
        let mut png = ramp(16, 16, ImageFormat::Png);
        // signature and IHDR stay intact
        png[40..].fill(0xAB);
        assert!(matches!(
            decode_image(&png),
            Err(ConvertError::DecodeFailed { .. })
        ));
    }

    #[test]
    fn dimensions_come_from_the_header() {
        assert_eq!(read_dimensions(&ramp(17, 9, ImageFormat::Png)), Some((17, 9)));
        assert_eq!(read_dimensions(b"nope"), None);
    }

    #[test]
    fn pixel_ceiling_is_inclusive() {
        assert!(check_dimensions(16_383, 16_383).is_ok());
        assert!(matches!(
            check_dimensions(MAX_DIMENSION, MAX_DIMENSION),
            Err(ConvertError::PixelCountExceedsLimit { .. })
        ));
    }
}
