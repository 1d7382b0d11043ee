// src/engine/encoder.rs
//
// Encoder operations: JPEG (mozjpeg), PNG (imagequant + oxipng), WebP (libwebp) with quality settings

use crate::engine::common::run_with_panic_policy;
use crate::error::ConvertError;
use crate::ops::OutputFormat;
use image::{DynamicImage, ImageFormat, RgbaImage};
use imagequant::{Attributes, Image as LiqImage};
use mozjpeg::{ColorSpace, Compress, ScanMode};
use std::borrow::Cow;
use std::io::Cursor;

use crate::engine::MAX_DIMENSION;

// Always ConvertError so encode failures stay in the Codec category.
type EncoderResult<T> = std::result::Result<T, ConvertError>;

/// Single source of truth for deriving per-format encoder parameters from a
/// 1-100 quality value.
///
/// - JPEG: 4:2:0 chroma below 80, 4:4:4 from 80 up; smoothing rises as quality falls
/// - PNG: lossless above 89, palette-reduced (imagequant) below 90
/// - WebP: lossy photo tuning up to 90, near-lossless above
#[derive(Debug, Clone, Copy)]
pub struct QualitySettings {
    quality: u8,
}

impl QualitySettings {
    pub fn new(quality: u8) -> Self {
        Self {
            quality: quality.clamp(1, 100),
        }
    }

    pub fn quality(&self) -> u8 {
        self.quality
    }

    /// Horizontal/vertical pixel sizes for the Cb and Cr planes.
    pub fn jpeg_chroma_sampling(&self) -> ((u8, u8), (u8, u8)) {
        if self.quality < 80 {
            ((2, 2), (2, 2))
        } else {
            ((1, 1), (1, 1))
        }
    }

    pub fn jpeg_smoothing(&self) -> u8 {
        match self.quality {
            90..=100 => 0,
            70..=89 => 5,
            60..=69 => 10,
            _ => 18,
        }
    }

    /// Palette size for lossy PNG, `None` when the image stays truecolor.
    pub fn png_max_colors(&self) -> Option<u32> {
        if self.quality >= 90 {
            return None;
        }
        Some((self.quality as u32 * 256 / 100).clamp(16, 256))
    }

    pub fn png_oxipng_preset(&self) -> u8 {
        6
    }

    pub fn webp_method(&self) -> i32 {
        6
    }

    pub fn webp_sns_strength(&self) -> i32 {
        80
    }

    pub fn webp_filter_strength(&self) -> i32 {
        30
    }

    pub fn webp_filter_sharpness(&self) -> i32 {
        3
    }

    pub fn webp_lossless(&self) -> bool {
        self.quality > 90
    }

    /// Near-lossless preprocessing level, only meaningful in lossless mode.
    pub fn webp_near_lossless(&self) -> i32 {
        self.quality as i32
    }
}

/// Encode `img` in `format` at `quality` (clamped to 1-100).
///
/// Same image, format and quality always give byte-identical output.
pub fn encode_image(img: &DynamicImage, format: OutputFormat, quality: u8) -> EncoderResult<Vec<u8>> {
    let settings = QualitySettings::new(quality);
    match format {
        OutputFormat::Jpg => encode_jpeg(img, &settings),
        OutputFormat::Png => encode_png(img, &settings),
        OutputFormat::WebP => encode_webp(img, &settings),
    }
}

fn validate_for_encode(format: &'static str, width: u32, height: u32) -> EncoderResult<()> {
    if width == 0 || height == 0 {
        return Err(ConvertError::encode_failed(
            format,
            "invalid image dimensions: width or height is zero",
        ));
    }
    if width > MAX_DIMENSION || height > MAX_DIMENSION {
        return Err(ConvertError::dimension_exceeds_limit(
            width.max(height),
            MAX_DIMENSION,
        ));
    }
    Ok(())
}

fn as_rgb8(img: &DynamicImage) -> Cow<'_, image::RgbImage> {
    match img {
        DynamicImage::ImageRgb8(rgb_img) => Cow::Borrowed(rgb_img),
        _ => Cow::Owned(img.to_rgb8()),
    }
}

fn as_rgba8(img: &DynamicImage) -> Cow<'_, RgbaImage> {
    match img {
        DynamicImage::ImageRgba8(rgba_img) => Cow::Borrowed(rgba_img),
        _ => Cow::Owned(img.to_rgba8()),
    }
}

/// Encode to JPEG using mozjpeg: optimized Huffman tables, optimized progressive
/// scans, quality-dependent chroma subsampling and smoothing.
pub fn encode_jpeg(img: &DynamicImage, settings: &QualitySettings) -> EncoderResult<Vec<u8>> {
    run_with_panic_policy("encode:jpeg", || {
        let rgb = as_rgb8(img);
        let (w, h) = rgb.dimensions();
        validate_for_encode("jpg", w, h)?;

        let mut comp = Compress::new(ColorSpace::JCS_RGB);
        comp.set_size(w as usize, h as usize);
        comp.set_color_space(ColorSpace::JCS_YCbCr);

        let (cb, cr) = settings.jpeg_chroma_sampling();
        comp.set_chroma_sampling_pixel_sizes(cb, cr);
        comp.set_progressive_mode();
        // Trellis quantization is part of mozjpeg's default max-compression profile
        comp.set_optimize_coding(true);
        comp.set_optimize_scans(true);
        comp.set_scan_optimization_mode(ScanMode::AllComponentsTogether);
        comp.set_smoothing_factor(settings.jpeg_smoothing());
        // Must come after set_optimize_scans, which reloads the default quant tables
        comp.set_quality(settings.quality() as f32);

        write_jpeg(comp, rgb.as_raw(), w)
    })
}

/// Baseline JPEG for the HEIC intermediate step: 4:4:4, no progressive scans.
pub fn encode_jpeg_baseline(img: &DynamicImage, quality: u8) -> EncoderResult<Vec<u8>> {
    run_with_panic_policy("encode:jpeg:baseline", || {
        let rgb = as_rgb8(img);
        let (w, h) = rgb.dimensions();
        validate_for_encode("jpg", w, h)?;

        let mut comp = Compress::new(ColorSpace::JCS_RGB);
        comp.set_size(w as usize, h as usize);
        comp.set_color_space(ColorSpace::JCS_YCbCr);
        comp.set_chroma_sampling_pixel_sizes((1, 1), (1, 1));
        comp.set_quality(quality.clamp(1, 100) as f32);

        write_jpeg(comp, rgb.as_raw(), w)
    })
}

fn write_jpeg(comp: Compress, pixels: &[u8], width: u32) -> EncoderResult<Vec<u8>> {
    let mut output = Vec::with_capacity((pixels.len() / 10).max(4096));
    {
        let mut writer = comp.start_compress(&mut output).map_err(|e| {
            ConvertError::encode_failed("jpg", format!("mozjpeg: failed to start compress: {e:?}"))
        })?;

        let stride = width as usize * 3;
        for row in pixels.chunks(stride) {
            writer.write_scanlines(row).map_err(|e| {
                ConvertError::encode_failed(
                    "jpg",
                    format!("mozjpeg: failed to write scanlines: {e:?}"),
                )
            })?;
        }

        writer.finish().map_err(|e| {
            ConvertError::encode_failed("jpg", format!("mozjpeg: failed to finish: {e:?}"))
        })?;
    }
    Ok(output)
}

/// Encode to PNG. Below quality 90 the image is palette-reduced with imagequant
/// first, then everything goes through oxipng with metadata stripped.
pub fn encode_png(img: &DynamicImage, settings: &QualitySettings) -> EncoderResult<Vec<u8>> {
    run_with_panic_policy("encode:png", || {
        let (w, h) = (img.width(), img.height());
        validate_for_encode("png", w, h)?;

        let source: Cow<'_, DynamicImage> = match settings.png_max_colors() {
            Some(max_colors) => Cow::Owned(quantize_rgba(img, max_colors)?),
            None => Cow::Borrowed(img),
        };

        let mut buf = Vec::new();
        source
            .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
            .map_err(|e| ConvertError::encode_failed("png", format!("PNG encode failed: {e}")))?;

        let mut options = oxipng::Options::from_preset(settings.png_oxipng_preset());
        options.strip = oxipng::StripChunks::Safe;

        oxipng::optimize_from_memory(&buf, &options).map_err(|e| {
            ConvertError::encode_failed("png", format!("oxipng optimization failed: {e}"))
        })
    })
}

/// Palette-reduce to at most `max_colors` with full dithering. The result is
/// expanded back to RGBA; oxipng turns it into an indexed PNG.
fn quantize_rgba(img: &DynamicImage, max_colors: u32) -> EncoderResult<DynamicImage> {
    let rgba = as_rgba8(img);
    let (w, h) = rgba.dimensions();
    let liq_err = |e: imagequant::Error| ConvertError::encode_failed("png", format!("imagequant: {e}"));

    let mut attr = Attributes::new();
    attr.set_max_colors(max_colors).map_err(liq_err)?;
    attr.set_quality(0, 100).map_err(liq_err)?;

    let pixels: Vec<rgb::RGBA<u8>> = rgba
        .as_raw()
        .chunks_exact(4)
        .map(|px| rgb::RGBA::new(px[0], px[1], px[2], px[3]))
        .collect();

    let mut liq_img =
        LiqImage::new(&attr, pixels, w as usize, h as usize, 0.0).map_err(liq_err)?;
    let mut res = attr.quantize(&mut liq_img).map_err(liq_err)?;
    res.set_dithering_level(1.0).map_err(liq_err)?;
    let (palette, indices) = res.remapped(&mut liq_img).map_err(liq_err)?;

    let mut expanded = Vec::with_capacity(indices.len() * 4);
    for idx in indices {
        let p = palette.get(idx as usize).ok_or_else(|| {
            ConvertError::encode_failed("png", "imagequant: palette index out of range")
        })?;
        expanded.extend_from_slice(&[p.r, p.g, p.b, p.a]);
    }

    RgbaImage::from_raw(w, h, expanded)
        .map(DynamicImage::ImageRgba8)
        .ok_or_else(|| ConvertError::encode_failed("png", "failed to rebuild quantized image"))
}

/// Encode to WebP with libwebp. Alpha is kept only when the source has it.
pub fn encode_webp(img: &DynamicImage, settings: &QualitySettings) -> EncoderResult<Vec<u8>> {
    run_with_panic_policy("encode:webp", || {
        let (w, h) = (img.width(), img.height());
        validate_for_encode("webp", w, h)?;

        let mut config = webp::WebPConfig::new()
            .map_err(|_| ConvertError::internal_panic("failed to create WebPConfig"))?;

        config.quality = settings.quality() as f32;
        config.method = settings.webp_method();
        config.sns_strength = settings.webp_sns_strength();
        config.autofilter = 0;
        config.filter_strength = settings.webp_filter_strength();
        config.filter_sharpness = settings.webp_filter_sharpness();
        config.use_sharp_yuv = 1;
        if settings.webp_lossless() {
            config.lossless = 1;
            config.near_lossless = settings.webp_near_lossless();
        }

        let encoded = if img.color().has_alpha() {
            let rgba = as_rgba8(img);
            webp::Encoder::from_rgba(rgba.as_raw(), w, h).encode_advanced(&config)
        } else {
            let rgb = as_rgb8(img);
            webp::Encoder::from_rgb(rgb.as_raw(), w, h).encode_advanced(&config)
        };
        let mem = encoded
            .map_err(|e| ConvertError::encode_failed("webp", format!("WebP encode failed: {e:?}")))?;

        Ok(mem.to_vec())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GenericImageView, RgbImage};

    fn create_test_image(width: u32, height: u32) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, y| {
            image::Rgb([(x % 256) as u8, (y % 256) as u8, 128])
        }))
    }

    fn create_test_image_rgba(width: u32, height: u32) -> DynamicImage {
        DynamicImage::ImageRgba8(RgbaImage::from_fn(width, height, |x, y| {
            image::Rgba([(x % 256) as u8, (y % 256) as u8, 128, (x * 4 % 256) as u8])
        }))
    }

    /// Gradient under heavy grain, so every quantizer step changes the size.
    fn grainy_photo(width: u32, height: u32) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, y| {
            let h = (x.wrapping_mul(73_856_093) ^ y.wrapping_mul(19_349_663))
                .wrapping_mul(2_654_435_761);
            let grain = |shift: u32| ((h >> shift) & 0xFF) * 4 / 5;
            let base = [x * 51 / width, y * 51 / height, (x + y) * 51 / (width + height)];
            image::Rgb([
                (base[0] + grain(24)) as u8,
                (base[1] + grain(8)) as u8,
                (base[2] + grain(16)) as u8,
            ])
        }))
    }

    mod quality_settings_tests {
        use super::*;

        #[test]
        fn jpeg_chroma_switches_at_80() {
            assert_eq!(
                QualitySettings::new(79).jpeg_chroma_sampling(),
                ((2, 2), (2, 2))
            );
            assert_eq!(
                QualitySettings::new(80).jpeg_chroma_sampling(),
                ((1, 1), (1, 1))
            );
        }

        #[test]
        fn png_palette_only_below_90() {
            assert_eq!(QualitySettings::new(90).png_max_colors(), None);
            assert_eq!(QualitySettings::new(89).png_max_colors(), Some(227));
            assert_eq!(QualitySettings::new(50).png_max_colors(), Some(128));
            assert_eq!(QualitySettings::new(1).png_max_colors(), Some(16));
        }

        #[test]
        fn webp_lossless_above_90() {
            assert!(!QualitySettings::new(90).webp_lossless());
            let s = QualitySettings::new(95);
            assert!(s.webp_lossless());
            assert_eq!(s.webp_near_lossless(), 95);
        }

        #[test]
        fn quality_is_clamped() {
            assert_eq!(QualitySettings::new(0).quality(), 1);
            assert_eq!(QualitySettings::new(255).quality(), 100);
        }

        #[test]
        fn smoothing_rises_as_quality_falls() {
            let s = |q| QualitySettings::new(q).jpeg_smoothing();
            assert!(s(95) <= s(75));
            assert!(s(75) <= s(65));
            assert!(s(65) <= s(20));
        }
    }

    mod encode_tests {
        use super::*;

        #[test]
        fn test_encode_jpeg_magic_bytes() {
            let img = create_test_image(64, 64);
            let data = encode_image(&img, OutputFormat::Jpg, 80).unwrap();
            assert_eq!(&data[0..2], &[0xFF, 0xD8]);
            assert_eq!(&data[data.len() - 2..], &[0xFF, 0xD9]);
        }

        #[test]
        fn test_encode_png_magic_bytes_both_paths() {
            let img = create_test_image(64, 64);
            for q in [40, 95] {
                let data = encode_image(&img, OutputFormat::Png, q).unwrap();
                assert_eq!(&data[0..8], &[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A]);
            }
        }

        #[test]
        fn test_encode_webp_magic_bytes_lossy_and_lossless() {
            let img = create_test_image(64, 64);
            for q in [50, 95] {
                let data = encode_image(&img, OutputFormat::WebP, q).unwrap();
                assert_eq!(&data[0..4], b"RIFF");
                assert_eq!(&data[8..12], b"WEBP");
            }
        }

        #[test]
        fn test_encode_webp_keeps_alpha() {
            let img = create_test_image_rgba(32, 32);
            let data = encode_image(&img, OutputFormat::WebP, 80).unwrap();
            let decoded = image::load_from_memory(&data).unwrap();
            assert!(decoded.color().has_alpha());
        }

        #[test]
        fn test_encode_is_deterministic() {
            let img = create_test_image(48, 40);
            for format in [OutputFormat::Jpg, OutputFormat::Png, OutputFormat::WebP] {
                let a = encode_image(&img, format, 63).unwrap();
                let b = encode_image(&img, format, 63).unwrap();
                assert_eq!(a, b, "{format} output differs between runs");
            }
        }

        #[test]
        fn test_lower_jpeg_quality_is_smaller() {
            let img = create_test_image(128, 128);
            let high = encode_image(&img, OutputFormat::Jpg, 95).unwrap();
            let low = encode_image(&img, OutputFormat::Jpg, 10).unwrap();
            assert!(low.len() < high.len());
        }

        #[test]
        fn test_jpeg_size_follows_requested_quality() {
            let img = grainy_photo(640, 400);
            let sizes: Vec<usize> = [5u8, 40, 75, 95]
                .iter()
                .map(|&q| encode_image(&img, OutputFormat::Jpg, q).unwrap().len())
                .collect();
            assert!(
                sizes.windows(2).all(|pair| pair[0] < pair[1]),
                "sizes not increasing with quality: {sizes:?}"
            );
        }

        #[test]
        fn test_palette_png_round_trips_dimensions() {
            let img = create_test_image_rgba(40, 30);
            let data = encode_image(&img, OutputFormat::Png, 30).unwrap();
            let decoded = image::load_from_memory(&data).unwrap();
            assert_eq!(decoded.dimensions(), (40, 30));
        }

        #[test]
        fn test_baseline_jpeg_for_intermediate() {
            let img = create_test_image(16, 16);
            let data = encode_jpeg_baseline(&img, 100).unwrap();
            assert_eq!(&data[0..2], &[0xFF, 0xD8]);
        }

        #[test]
        fn test_zero_sized_image_rejected() {
            let img = DynamicImage::new_rgb8(0, 0);
            let err = encode_image(&img, OutputFormat::Jpg, 80).unwrap_err();
            assert!(matches!(err, ConvertError::EncodeFailed { .. }));
        }
    }
}
